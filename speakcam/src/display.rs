//! Publish rendered frames to HTTP viewers.
//!
use anyhow::Result;
use bytes::Bytes;
use tokio::sync::{broadcast, watch};

use crate::{as_jpeg_stream_item, render::RenderedFrame};

/// Frames kept for slow viewers before they start skipping.
const FRAME_BUFFER: usize = 4;

/// Display surface fed by the detection loop.
pub struct Display {
    frames_tx: broadcast::Sender<Bytes>,
    count_tx: watch::Sender<usize>,
    count_rx: watch::Receiver<usize>,
    jpeg_quality: i32,
}

impl Display {
    pub fn new(jpeg_quality: i32) -> Self {
        let (frames_tx, _) = broadcast::channel(FRAME_BUFFER);
        let (count_tx, count_rx) = watch::channel(0);

        Self {
            frames_tx,
            count_tx,
            count_rx,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Handle for the HTTP endpoints.
    pub fn handle(&self) -> DisplayHandle {
        DisplayHandle {
            frames_tx: self.frames_tx.clone(),
            count_rx: self.count_rx.clone(),
        }
    }

    /// Show a rendered frame.
    ///
    /// The frame is only encoded while somebody is watching the stream.
    pub fn show(&self, rendered: &RenderedFrame) -> Result<()> {
        self.count_tx.send_replace(rendered.count);

        if self.frames_tx.receiver_count() == 0 {
            return Ok(());
        }

        let buf = turbojpeg::compress_image(
            &rendered.image,
            self.jpeg_quality,
            turbojpeg::Subsamp::Sub2x2,
        )?;
        // Viewers may have left since the check above
        self.frames_tx.send(as_jpeg_stream_item(&buf)).ok();

        Ok(())
    }
}

/// Read side of the display, shared with the HTTP server.
#[derive(Clone)]
pub struct DisplayHandle {
    frames_tx: broadcast::Sender<Bytes>,
    count_rx: watch::Receiver<usize>,
}

impl DisplayHandle {
    /// Subscribe to the stream of annotated JPEG frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames_tx.subscribe()
    }

    /// Number of detections in the most recent frame.
    pub fn count(&self) -> usize {
        *self.count_rx.borrow()
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::render::Renderer;
    use common::{BoundingBox, Detection};
    use image::{Rgb, RgbImage};

    fn rendered(num_detections: usize) -> RenderedFrame {
        let detections: Vec<_> = (0..num_detections)
            .map(|i| {
                Detection::new(
                    "bottle",
                    0.8,
                    BoundingBox::new(10.0 + 20.0 * i as f32, 40.0, 10.0, 10.0),
                )
            })
            .collect();
        Renderer::new(None).render(&RgbImage::from_pixel(160, 120, Rgb([0, 0, 0])), &detections)
    }

    #[test]
    fn test_count_without_viewers() -> Result<()> {
        let display = Display::new(90);
        let handle = display.handle();
        assert_eq!(handle.count(), 0);

        display.show(&rendered(3))?;
        assert_eq!(handle.count(), 3);

        display.show(&rendered(1))?;
        assert_eq!(handle.count(), 1);

        Ok(())
    }

    #[test]
    fn test_viewers_receive_jpeg_items() -> Result<()> {
        let display = Display::new(90);
        let mut rx = display.handle().subscribe();

        display.show(&rendered(2))?;

        let item = rx.try_recv()?;
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        // JPEG start of image marker right after the part header
        assert_eq!(&item[37..39], &[0xff, 0xd8]);

        Ok(())
    }
}
