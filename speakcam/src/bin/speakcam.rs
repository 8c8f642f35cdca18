//! Speakcam binary.
//!
use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Env, TimestampPrecision};
use speakcam::{
    config::Config,
    debounce::AnnouncementDebouncer,
    detection_loop::DetectionLoop,
    display::Display,
    endpoints::router,
    meter::spawn_meter_logger,
    nn::{CocoModel, DEFAULT_MODEL_FILE},
    render::Renderer,
    sensors::{CameraSource, FrameSource, StillImageSource},
    speech::{Announcer, SilentAnnouncer, SpeechQueue},
    utils::cache_dir,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Setup logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let display = Display::new(config.jpeg_quality);

    // Serve HTTP server, showing the loading page until frames arrive
    let addr: SocketAddr = config
        .server_address
        .parse()
        .with_context(|| format!("invalid server address {}", config.server_address))?;
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(router(display.handle()).into_make_service());
    log::info!("Serving on http://{addr}");
    tokio::spawn(async move {
        if let Err(err) = server.await {
            log::error!("HTTP server failed: {err}");
        }
    });

    // Camera first, then the model, then the loop
    match &config.image {
        Some(path) => {
            let source = StillImageSource::open(path)?;
            run_detection(&config, source, display).await
        }
        None => {
            let source = CameraSource::open(&config.camera_preference())?;
            run_detection(&config, source, display).await
        }
    }
}

async fn run_detection<S: FrameSource>(
    config: &Config,
    source: S,
    display: Display,
) -> Result<()> {
    let (width, height) = source.resolution();
    log::info!("Frames are {width}x{height}");

    let model_path = match &config.model {
        Some(path) => path.clone(),
        None => cache_dir()?.join(DEFAULT_MODEL_FILE),
    };
    let detector = CocoModel::new(&config.model_config(model_path))
        .await
        .context("failed to load detection model")?;

    let announcer: Arc<dyn Announcer> = if config.mute {
        Arc::new(SilentAnnouncer)
    } else {
        let (queue, _speech_handle) =
            SpeechQueue::spawn(config.speech_program.clone(), config.speech_params());
        Arc::new(queue)
    };

    spawn_meter_logger(Duration::from_secs(2));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Stopping");
                cancel.cancel();
            }
        });
    }

    DetectionLoop::new(
        source,
        detector,
        Renderer::with_font_file(&config.font),
        AnnouncementDebouncer::new(config.cooldown()),
        announcer,
        display,
        config.refresh_interval(),
    )
    .run(cancel)
    .await
}
