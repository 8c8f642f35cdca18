//! Object detection with a COCO-trained ONNX model.
//!
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use common::{labels::coco_label, BoundingBox, Detection};
use image::RgbImage;
use ndarray::{ArrayView3, Axis, Ix3};
use tract_onnx::prelude::*;

use crate::utils::download_file;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Default file name of the model in the cache directory.
pub const DEFAULT_MODEL_FILE: &str = "yolov8n.onnx";

/// Turns a frame into the objects visible on it.
pub trait Detector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Settings of the detection model.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    /// Fetched to `model_path` when the file does not exist yet.
    pub model_url: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub min_score: f32,
    pub max_iou: f32,
    pub max_boxes: usize,
}

/// Thresholds applied to raw model output.
#[derive(Clone, Copy, Debug)]
pub struct PostprocParams {
    pub min_score: f32,
    pub max_iou: f32,
    pub max_boxes: usize,
}

/// Single-stage detector with output layout `[1, 4 + classes, candidates]`.
///
/// Every candidate column holds the box center, width and height in model
/// input pixels followed by one score per COCO class.
pub struct CocoModel {
    model: NnModel,
    width: u32,
    height: u32,
    params: PostprocParams,
}

impl CocoModel {
    /// Load the model, downloading it first if it is missing and a URL is set.
    pub async fn new(config: &ModelConfig) -> Result<Self> {
        if !config.model_path.exists() {
            match &config.model_url {
                Some(url) => {
                    log::info!(
                        "Downloading model from {} to {}",
                        url,
                        config.model_path.display()
                    );
                    let client = reqwest::Client::new();
                    download_file(&client, url, &config.model_path)
                        .await
                        .with_context(|| format!("failed to download model from {url}"))?;
                }
                None => bail!(
                    "model file {} not found, pass --model or --model-url",
                    config.model_path.display()
                ),
            }
        }

        let model = load_model(config)?;
        log::info!("Model {} loaded", config.model_path.display());

        Ok(Self {
            model,
            width: config.input_width,
            height: config.input_height,
            params: PostprocParams {
                min_score: config.min_score,
                max_iou: config.max_iou,
                max_boxes: config.max_boxes,
            },
        })
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            frame,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }

    fn postproc(
        &self,
        raw_out: &Tensor,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>> {
        let output = raw_out.to_array_view::<f32>()?.into_dimensionality::<Ix3>()?;

        let scale = (
            frame_width as f32 / self.width as f32,
            frame_height as f32 / self.height as f32,
        );

        Ok(decode_predictions(
            output,
            scale,
            (frame_width, frame_height),
            &self.params,
        ))
    }
}

impl Detector for CocoModel {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let (frame_width, frame_height) = frame.dimensions();
        let valid_input = tvec!(self.preproc(frame).into());
        let raw_nn_out = self.model.run(valid_input)?;

        self.postproc(&raw_nn_out[0], frame_width, frame_height)
    }
}

fn load_model(config: &ModelConfig) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(
            1,
            3,
            config.input_height as usize,
            config.input_width as usize
        ),
    );
    let model = tract_onnx::onnx()
        .model_for_path(&config.model_path)
        .with_context(|| format!("failed to read model {}", config.model_path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Turn raw output of shape `[1, 4 + classes, candidates]` into detections in
/// frame pixels.
///
/// `scale` maps model input pixels to frame pixels per axis. Candidates are
/// filtered by their best class score, then reduced by class-agnostic
/// non-maximum suppression.
pub fn decode_predictions(
    output: ArrayView3<f32>,
    scale: (f32, f32),
    frame_size: (u32, u32),
    params: &PostprocParams,
) -> Vec<Detection> {
    let output = output.index_axis(Axis(0), 0);
    if output.nrows() <= 4 {
        return vec![];
    }

    let mut candidates: Vec<(f32, usize, [f32; 4])> = output
        .axis_iter(Axis(1))
        .filter_map(|column| {
            let (class_id, score) = column
                .iter()
                .skip(4)
                .cloned()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if score < params.min_score {
                return None;
            }

            let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
            let corners = [
                (cx - w / 2.0) * scale.0,
                (cy - h / 2.0) * scale.1,
                (cx + w / 2.0) * scale.0,
                (cy + h / 2.0) * scale.1,
            ];
            Some((score, class_id, corners))
        })
        .collect();

    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

    non_maximum_suppression(candidates, params.max_iou, params.max_boxes)
        .into_iter()
        .filter_map(|(score, class_id, [x_tl, y_tl, x_br, y_br])| {
            let class = coco_label(class_id)?;
            let bbox =
                BoundingBox::from_corners(x_tl, y_tl, x_br, y_br, frame_size.0, frame_size.1);
            Some(Detection::new(class, score, bbox))
        })
        .collect()
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Start with the most confident bounding box and iterate over all other bounding boxes in the
/// order of sinking confidence. Grow the vector of selected bounding boxes by adding only those
/// candidates which do not have an IoU above `max_iou` with already chosen bounding boxes. Stop
/// once `max_boxes` boxes are selected.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<(f32, usize, [f32; 4])>,
    max_iou: f32,
    max_boxes: usize,
) -> Vec<(f32, usize, [f32; 4])> {
    let mut selected: Vec<(f32, usize, [f32; 4])> = vec![];
    'candidates: while selected.len() < max_boxes {
        // Get next most confident bbox from the back of ascending-sorted vector.
        let Some(candidate) = sorted_candidates.pop() else {
            break 'candidates;
        };

        for (_, _, selected_bbox) in selected.iter() {
            if iou(&candidate.2, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // If the boxes do not overlap, the top left corner of the overlap box
    // lies below/right of its bottom right corner and the area is zero.
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    // Avoid division-by-zero with `EPS`
    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// The bounding box is passed as four-element array defining two points:
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}
