//! Watch a camera, draw what a pretrained detector sees and say new objects out loud.
//!
pub mod config;
pub mod debounce;
pub mod detection_loop;
pub mod display;
pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod render;
pub mod sensors;
pub mod speech;
pub mod utils;

use bytes::Bytes;

/// Wrap a JPEG image into one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
