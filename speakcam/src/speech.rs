//! Speech output.
//!
use std::{io, process::Stdio};

use tokio::{
    process::Command,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

/// Announcements waiting to be spoken before new ones are dropped.
const QUEUE_LENGTH: usize = 8;

/// Says text out loud without blocking the caller.
pub trait Announcer: Send + Sync {
    fn speak(&self, text: &str);
}

/// Voice settings, `1.0` is the engine default for each.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl SpeechParams {
    /// Flags for `espeak`/`espeak-ng`: words per minute, pitch `0..=99` and
    /// amplitude `0..=200`.
    pub fn espeak_args(&self) -> Vec<String> {
        let words_per_minute = (175.0 * self.rate).round().max(80.0) as u32;
        let pitch = (50.0 * self.pitch).round().clamp(0.0, 99.0) as u32;
        let amplitude = (100.0 * self.volume).round().clamp(0.0, 200.0) as u32;

        vec![
            "-s".into(),
            words_per_minute.to_string(),
            "-p".into(),
            pitch.to_string(),
            "-a".into(),
            amplitude.to_string(),
        ]
    }
}

/// Speaks announcements one after another on a background task.
///
/// If the speech program is missing, announcements are only logged.
pub struct SpeechQueue {
    tx: mpsc::Sender<String>,
}

impl SpeechQueue {
    /// Spawn the speaking task. It ends once the queue is dropped.
    pub fn spawn(program: impl Into<String>, params: SpeechParams) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_LENGTH);
        let handle = tokio::spawn(run_speech(program.into(), params, rx));

        (Self { tx }, handle)
    }
}

impl Announcer for SpeechQueue {
    fn speak(&self, text: &str) {
        match self.tx.try_send(text.to_owned()) {
            Ok(()) => log::debug!("Queued announcement {text:?}"),
            Err(TrySendError::Full(text)) => {
                log::warn!("Speech queue full, dropping {text:?}")
            }
            Err(TrySendError::Closed(text)) => {
                log::debug!("Speech stopped, dropping {text:?}")
            }
        }
    }
}

async fn run_speech(program: String, params: SpeechParams, mut rx: mpsc::Receiver<String>) {
    let mut speaker = Speaker::new(program, params);
    while let Some(text) = rx.recv().await {
        speaker.say(&text).await;
    }
}

/// Runs the speech program, and stops trying once it turns out to be missing.
struct Speaker {
    program: String,
    params: SpeechParams,
    available: bool,
}

impl Speaker {
    fn new(program: String, params: SpeechParams) -> Self {
        Self {
            program,
            params,
            available: true,
        }
    }

    /// Returns whether `text` was spoken.
    async fn say(&mut self, text: &str) -> bool {
        if !self.available {
            log::debug!("Speech synthesis not available, skipping {text:?}");
            return false;
        }

        log::info!("Saying {text:?}");
        let program = &self.program;
        let status = Command::new(program)
            .args(self.params.espeak_args())
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => return true,
            Ok(status) => log::warn!("{program} exited with {status}"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!("Speech synthesis not supported: {program} not found");
                self.available = false;
            }
            Err(err) => log::warn!("Failed to run {program}: {err}"),
        }
        false
    }
}

/// Logs announcements instead of speaking them.
#[derive(Default)]
pub struct SilentAnnouncer;

impl Announcer for SilentAnnouncer {
    fn speak(&self, text: &str) {
        log::info!("Muted announcement {text:?}");
    }
}
