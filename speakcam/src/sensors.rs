//! Sensors module.
//!
use std::{fmt, io, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use rscam::{Camera, Config};

/// Continuous sequence of frames.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<RgbImage>;

    /// Native `(width, height)` of the frames.
    fn resolution(&self) -> (u32, u32);
}

/// Which camera to open and how.
#[derive(Clone, Debug)]
pub struct CameraPreference {
    /// Device tried first, e.g. `/dev/video0`.
    pub device: String,
    /// Try `/dev/video0` to `/dev/video9` if `device` cannot be opened.
    pub fallback: bool,
    /// FourCC pixel format, `MJPG` or `RGB3`.
    pub format: String,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<u32>,
}

/// Initialized V4L2 camera.
pub struct CameraSource {
    cam: Camera,
    device: String,
    format: [u8; 4],
    resolution: (u32, u32),
}

impl CameraSource {
    /// Open and start the preferred camera.
    ///
    /// A device that cannot be opened or started is skipped in favour of the
    /// fallback devices. A denied permission on the preferred device is
    /// reported right away and is not masked by the fallback devices.
    pub fn open(preference: &CameraPreference) -> Result<Self> {
        let format = fourcc(&preference.format)?;

        let mut failures = OpenFailures::default();
        for device in candidate_devices(preference) {
            let result = Camera::new(&device)
                .map_err(|err| open_error(&device, err))
                .and_then(|cam| Self::start(cam, device.clone(), format, preference));

            match result {
                Ok(source) => return Ok(source),
                Err(err) if err.is::<AccessDenied>() && device == preference.device => {
                    return Err(err)
                }
                Err(err) => failures.record(err),
            }
        }

        Err(failures.into_error())
    }

    fn start(
        mut cam: Camera,
        device: String,
        format: [u8; 4],
        preference: &CameraPreference,
    ) -> Result<Self> {
        log_supported_formats(&cam, &preference.format);
        log::info!("Trying camera {}", device);

        let resolution = match preference.resolution {
            Some(resolution) => resolution,
            None => get_max_resolution(&cam, &format)
                .with_context(|| format!("no resolution for {device}"))?,
        };

        let interval = match preference.frame_rate {
            Some(frame_rate) => (1, frame_rate.max(1)),
            None => get_min_interval(&cam, &format, resolution)
                .with_context(|| format!("no frame interval for {device}"))?,
        };

        cam.start(&Config {
            interval,
            resolution,
            format: &format,
            ..Default::default()
        })
        .map_err(|err| start_error(&device, err))?;

        log::info!(
            "Camera {} started with {}x{} at {}/{} s per frame",
            device,
            resolution.0,
            resolution.1,
            interval.0,
            interval.1
        );

        Ok(Self {
            cam,
            device,
            format,
            resolution,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<RgbImage> {
        let frame = self
            .cam
            .capture()
            .with_context(|| format!("failed to capture from {}", self.device))?;
        let (width, height) = frame.resolution;

        match &self.format {
            b"MJPG" => Ok(turbojpeg::decompress_image(&frame[..])?),
            _ => RgbImage::from_raw(width, height, frame[..].to_vec()).ok_or_else(|| {
                anyhow!("frame of {} bytes is not {width}x{height} RGB", frame.len())
            }),
        }
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

/// Repeats one still image, for running without a camera.
pub struct StillImageSource {
    image: RgbImage,
}

impl StillImageSource {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?
            .to_rgb8();
        log::info!("Using still image {}", path.display());

        Ok(Self::new(image))
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<RgbImage> {
        Ok(self.image.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Permission to use the camera device was refused.
#[derive(Debug)]
pub struct AccessDenied {
    device: String,
    reason: io::Error,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera access denied: {}: {}", self.device, self.reason)
    }
}

impl std::error::Error for AccessDenied {}

fn open_error(device: &str, err: io::Error) -> anyhow::Error {
    if err.kind() == io::ErrorKind::PermissionDenied {
        AccessDenied {
            device: device.into(),
            reason: err,
        }
        .into()
    } else {
        anyhow!("could not open {device}: {err}")
    }
}

fn start_error(device: &str, err: rscam::Error) -> anyhow::Error {
    match err {
        rscam::Error::Io(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            AccessDenied {
                device: device.into(),
                reason: err,
            }
            .into()
        }
        err => anyhow!("failed to start camera {device}: {err}"),
    }
}

/// Why no candidate device could be used. The first denied permission is
/// kept over any later error.
#[derive(Default)]
struct OpenFailures {
    denied: Option<anyhow::Error>,
    last: Option<anyhow::Error>,
}

impl OpenFailures {
    fn record(&mut self, err: anyhow::Error) {
        log::debug!("Skipping camera: {err:#}");
        if err.is::<AccessDenied>() && self.denied.is_none() {
            self.denied = Some(err);
        } else {
            self.last = Some(err);
        }
    }

    fn into_error(self) -> anyhow::Error {
        match (self.denied, self.last) {
            (Some(denied), _) => denied,
            (None, Some(last)) => last.context("no usable camera"),
            (None, None) => anyhow!("no camera device configured"),
        }
    }
}

/// Preferred device first, then the usual device nodes if allowed.
fn candidate_devices(preference: &CameraPreference) -> Vec<String> {
    let mut devices = vec![preference.device.clone()];
    if preference.fallback {
        devices.extend(
            (0..10)
                .map(|index| format!("/dev/video{index}"))
                .filter(|device| *device != preference.device),
        );
    }
    devices
}

fn fourcc(format: &str) -> Result<[u8; 4]> {
    match format.as_bytes() {
        b"MJPG" => Ok(*b"MJPG"),
        b"RGB3" => Ok(*b"RGB3"),
        _ => bail!("unsupported pixel format {format:?}, use MJPG or RGB3"),
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .into_iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|&(width, height)| width * height),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| anyhow!("No resolution found"))
}

/// Get the shortest frame interval, i.e. the highest frame rate, for the given
/// format and resolution.
///
/// Intervals are `(numerator, denominator)` fractions of a second.
fn get_min_interval(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => shortest_interval(&intervals),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| anyhow!("No frame rate found"))
}

fn shortest_interval(intervals: &[(u32, u32)]) -> Option<(u32, u32)> {
    intervals
        .iter()
        .filter(|(_, denominator)| *denominator > 0)
        .min_by(|(n_a, d_a), (n_b, d_b)| {
            (*n_a as u64 * *d_b as u64).cmp(&(*n_b as u64 * *d_a as u64))
        })
        .copied()
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
