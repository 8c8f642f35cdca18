//! Command line configuration.
//!
use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::{
    nn::ModelConfig,
    sensors::CameraPreference,
    speech::SpeechParams,
};

/// Default location of the label font on Debian-like systems.
pub const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf";

#[derive(Parser, Debug, Clone)]
#[clap(author, version)]
pub struct Config {
    /// Address to serve the annotated stream on
    #[clap(long, env = "SPEAKCAM_SERVER_ADDRESS", default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Preferred video device
    #[clap(long, env = "SPEAKCAM_DEVICE", default_value = "/dev/video0")]
    pub device: String,

    /// Do not try other video devices if the preferred one fails
    #[clap(long, env = "SPEAKCAM_NO_DEVICE_FALLBACK")]
    pub no_device_fallback: bool,

    /// Pixel format to request from the camera (MJPG or RGB3)
    #[clap(long, env = "SPEAKCAM_FORMAT", default_value = "MJPG")]
    pub format: String,

    /// Camera resolution as WIDTHxHEIGHT, highest available if unset
    #[clap(long, env = "SPEAKCAM_RESOLUTION", value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,

    /// Camera frame rate in frames per second, highest available if unset
    #[clap(long, env = "SPEAKCAM_FRAME_RATE")]
    pub frame_rate: Option<u32>,

    /// Repeat this image instead of capturing from a camera
    #[clap(long, env = "SPEAKCAM_IMAGE")]
    pub image: Option<PathBuf>,

    /// ONNX model file, defaults to `yolov8n.onnx` in the cache directory
    #[clap(long, env = "SPEAKCAM_MODEL")]
    pub model: Option<PathBuf>,

    /// Where to download the model from if the model file is missing
    #[clap(long, env = "SPEAKCAM_MODEL_URL")]
    pub model_url: Option<String>,

    /// Square input size of the model in pixels
    #[clap(long, env = "SPEAKCAM_INPUT_SIZE", default_value_t = 640)]
    pub input_size: u32,

    /// Minimum confidence of reported detections
    #[clap(long, env = "SPEAKCAM_MIN_SCORE", default_value_t = 0.5)]
    pub min_score: f32,

    /// Maximum overlap of two reported detections
    #[clap(long, env = "SPEAKCAM_MAX_IOU", default_value_t = 0.5)]
    pub max_iou: f32,

    /// Maximum number of detections per frame
    #[clap(long, env = "SPEAKCAM_MAX_BOXES", default_value_t = 20)]
    pub max_boxes: usize,

    /// Minimum time between two announcements in milliseconds
    #[clap(long, env = "SPEAKCAM_COOLDOWN_MS", default_value_t = 2000)]
    pub cooldown_ms: u64,

    /// Detection loop rate in iterations per second
    #[clap(long, env = "SPEAKCAM_REFRESH_HZ", default_value_t = 60)]
    pub refresh_hz: u32,

    /// Text-to-speech program understanding espeak flags (-s, -p, -a)
    #[clap(long, env = "SPEAKCAM_SPEECH_PROGRAM", default_value = "espeak-ng")]
    pub speech_program: String,

    /// Speaking rate, 1.0 is normal
    #[clap(long, env = "SPEAKCAM_SPEECH_RATE", default_value_t = 1.0)]
    pub speech_rate: f32,

    /// Voice pitch, 1.0 is normal
    #[clap(long, env = "SPEAKCAM_SPEECH_PITCH", default_value_t = 1.0)]
    pub speech_pitch: f32,

    /// Speech volume, 1.0 is normal
    #[clap(long, env = "SPEAKCAM_SPEECH_VOLUME", default_value_t = 1.0)]
    pub speech_volume: f32,

    /// Log announcements instead of speaking them
    #[clap(long, env = "SPEAKCAM_MUTE")]
    pub mute: bool,

    /// TrueType font for box labels
    #[clap(long, env = "SPEAKCAM_FONT", default_value = DEFAULT_FONT)]
    pub font: PathBuf,

    /// JPEG quality of the served stream
    #[clap(long, env = "SPEAKCAM_JPEG_QUALITY", default_value_t = 90)]
    pub jpeg_quality: i32,
}

impl Config {
    pub fn camera_preference(&self) -> CameraPreference {
        CameraPreference {
            device: self.device.clone(),
            fallback: !self.no_device_fallback,
            format: self.format.clone(),
            resolution: self.resolution,
            frame_rate: self.frame_rate,
        }
    }

    /// Model settings; `model_path` is resolved by the caller since the
    /// default lives in the cache directory.
    pub fn model_config(&self, model_path: PathBuf) -> ModelConfig {
        ModelConfig {
            model_path,
            model_url: self.model_url.clone(),
            input_width: self.input_size,
            input_height: self.input_size,
            min_score: self.min_score,
            max_iou: self.max_iou,
            max_boxes: self.max_boxes,
        }
    }

    pub fn speech_params(&self) -> SpeechParams {
        SpeechParams {
            rate: self.speech_rate,
            pitch: self.speech_pitch,
            volume: self.speech_volume,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_hz.max(1) as f64)
    }
}

/// Parse `WIDTHxHEIGHT`.
fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {value:?}"))?;
    Ok((width.trim().parse()?, height.trim().parse()?))
}
