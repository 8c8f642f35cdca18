//! Throughput accounting for the detection loop.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Counters since the last report.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterReport {
    pub captured_frames: u64,
    pub inferred_frames: u64,
    pub detections: u64,
    pub announcements: u64,
}

impl MeterReport {
    /// Average number of detections per inferred frame.
    pub fn detections_per_frame(&self) -> f32 {
        if self.inferred_frames == 0 {
            return 0.0;
        }
        self.detections as f32 / self.inferred_frames as f32
    }
}

#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    inferred_frames: AtomicU64,
    detections: AtomicU64,
    announcements: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            inferred_frames: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            announcements: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one inferred frame holding `detections` objects.
    pub fn tick_inferred(&self, detections: usize) {
        self.inferred_frames.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(detections as u64, Ordering::Relaxed);
    }

    pub fn tick_announced(&self) {
        self.announcements.fetch_add(1, Ordering::Relaxed);
    }

    /// Take all counters and start over from zero.
    pub fn take_report(&self) -> MeterReport {
        MeterReport {
            captured_frames: self.captured_frames.swap(0, Ordering::Relaxed),
            inferred_frames: self.inferred_frames.swap(0, Ordering::Relaxed),
            detections: self.detections.swap(0, Ordering::Relaxed),
            announcements: self.announcements.swap(0, Ordering::Relaxed),
        }
    }
}

/// Log frame rates and detection load every `period`.
pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let report = METER.take_report();
            let elapsed = start.elapsed().as_secs_f32();

            if report.inferred_frames == 0 {
                if report.captured_frames > 0 {
                    log::info!("Captured {} frames but inferred none", report.captured_frames);
                }
                continue;
            }

            log::info!(
                "Captured {:.2} fps, inferred {:.2} fps, {:.1} objects per frame, {} spoken",
                report.captured_frames as f32 / elapsed,
                report.inferred_frames as f32 / elapsed,
                report.detections_per_frame(),
                report.announcements,
            );
        }
    })
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_take_report_resets() {
        let meter = Meter::new();
        meter.tick_captured();
        meter.tick_captured();
        meter.tick_inferred(3);
        meter.tick_inferred(0);
        meter.tick_announced();

        let report = meter.take_report();
        assert_eq!(
            report,
            MeterReport {
                captured_frames: 2,
                inferred_frames: 2,
                detections: 3,
                announcements: 1,
            }
        );
        assert_eq!(report.detections_per_frame(), 1.5);
        assert_eq!(meter.take_report(), MeterReport::default());
    }

    #[test]
    fn test_detections_per_frame_without_frames() {
        assert_eq!(MeterReport::default().detections_per_frame(), 0.0);
    }
}
