//! Capture, detect, render and announce, once per display refresh.
//!
use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    debounce::AnnouncementDebouncer, display::Display, meter::METER, nn::Detector,
    render::Renderer, sensors::FrameSource, speech::Announcer,
};

/// Owns everything one iteration touches, including the announcement state.
pub struct DetectionLoop<S, D> {
    source: S,
    detector: D,
    renderer: Renderer,
    debouncer: AnnouncementDebouncer,
    announcer: Arc<dyn Announcer>,
    display: Display,
    refresh_interval: Duration,
}

impl<S: FrameSource, D: Detector> DetectionLoop<S, D> {
    pub fn new(
        source: S,
        detector: D,
        renderer: Renderer,
        debouncer: AnnouncementDebouncer,
        announcer: Arc<dyn Announcer>,
        display: Display,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            detector,
            renderer,
            debouncer,
            announcer,
            display,
            refresh_interval,
        }
    }

    /// Run one iteration and return the number of detections.
    ///
    /// Capture and detection errors are returned as they are. Failing to
    /// publish the rendered frame only skips that frame.
    pub fn step(&mut self, now: std::time::Instant) -> Result<usize> {
        let frame = self.source.next_frame()?;
        METER.tick_captured();

        let detections = self.detector.detect(&frame)?;
        METER.tick_inferred(detections.len());
        log::debug!("Detected {} objects", detections.len());

        let rendered = self.renderer.render(&frame, &detections);
        if let Err(err) = self.display.show(&rendered) {
            log::warn!("Dropping frame: {err:#}");
        }

        if let Some(announcement) = self.debouncer.observe(&detections, now) {
            self.announcer.speak(&announcement.to_string());
            METER.tick_announced();
        }

        Ok(detections.len())
    }

    /// Iterate until `cancel` fires or an iteration fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Detection loop started");

        loop {
            let tick = tokio::select! {
                _ = cancel.cancelled() => break,
                tick = ticker.tick() => tick,
            };

            if let Err(err) = self.step(Instant::into_std(tick)) {
                log::error!("Detection loop halted: {err:#}");
                return Err(err);
            }
        }

        log::info!("Detection loop stopped");
        Ok(())
    }

    pub fn debouncer(&self) -> &AnnouncementDebouncer {
        &self.debouncer
    }
}

#[cfg(test)]
mod test {

    use std::sync::Mutex;

    use anyhow::bail;
    use common::{BoundingBox, Detection};
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{debounce::DEFAULT_COOLDOWN, sensors::StillImageSource};

    /// Replays one detection list per frame, then fails.
    struct ScriptedDetector {
        frames: Mutex<Vec<Vec<Detection>>>,
    }

    impl ScriptedDetector {
        fn new(mut frames: Vec<Vec<Detection>>) -> Self {
            frames.reverse();
            Self {
                frames: Mutex::new(frames),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>> {
            match self.frames.lock().unwrap().pop() {
                Some(detections) => Ok(detections),
                None => bail!("out of frames"),
            }
        }
    }

    #[derive(Default)]
    struct RecordingAnnouncer {
        said: Mutex<Vec<String>>,
    }

    impl Announcer for RecordingAnnouncer {
        fn speak(&self, text: &str) {
            self.said.lock().unwrap().push(text.to_owned());
        }
    }

    fn detections(classes: &[&str]) -> Vec<Detection> {
        classes
            .iter()
            .map(|class| Detection::new(*class, 0.92, BoundingBox::new(10.0, 10.0, 50.0, 100.0)))
            .collect()
    }

    fn detection_loop(
        frames: Vec<Vec<Detection>>,
        announcer: Arc<RecordingAnnouncer>,
    ) -> DetectionLoop<StillImageSource, ScriptedDetector> {
        DetectionLoop::new(
            StillImageSource::new(RgbImage::from_pixel(160, 120, Rgb([0, 0, 0]))),
            ScriptedDetector::new(frames),
            Renderer::new(None),
            AnnouncementDebouncer::new(DEFAULT_COOLDOWN),
            announcer,
            Display::new(80),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_step_announces_through_cooldown() -> Result<()> {
        let announcer = Arc::new(RecordingAnnouncer::default());
        let mut detection_loop = detection_loop(
            vec![
                detections(&["person"]),
                detections(&["person", "dog"]),
                detections(&["person", "dog"]),
            ],
            announcer.clone(),
        );
        let count = detection_loop.display.handle();
        let start = std::time::Instant::now();

        assert_eq!(detection_loop.step(start)?, 1);
        assert_eq!(count.count(), 1);
        assert_eq!(detection_loop.step(start + Duration::from_millis(500))?, 2);
        assert_eq!(count.count(), 2);
        assert_eq!(detection_loop.step(start + Duration::from_millis(2500))?, 2);

        assert_eq!(*announcer.said.lock().unwrap(), ["I see person.", "I see dog."]);
        let mut spoken: Vec<_> = detection_loop.debouncer().spoken_classes().iter().collect();
        spoken.sort();
        assert_eq!(spoken, ["dog", "person"]);

        Ok(())
    }

    #[test]
    fn test_step_propagates_detector_failure() {
        let announcer = Arc::new(RecordingAnnouncer::default());
        let mut detection_loop = detection_loop(vec![], announcer.clone());

        assert!(detection_loop.step(std::time::Instant::now()).is_err());
        assert!(announcer.said.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_halts_on_failure() {
        let announcer = Arc::new(RecordingAnnouncer::default());
        let frames = vec![detections(&["cat"]), detections(&[]), detections(&["cat"])];
        let detection_loop = detection_loop(frames, announcer.clone());

        let result = detection_loop.run(CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(*announcer.said.lock().unwrap(), ["I see cat."]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() -> Result<()> {
        let announcer = Arc::new(RecordingAnnouncer::default());
        let detection_loop = detection_loop(vec![detections(&["cup"]); 10_000], announcer.clone());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(detection_loop.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        handle.await??;
        assert_eq!(*announcer.said.lock().unwrap(), ["I see cup."]);

        Ok(())
    }
}
