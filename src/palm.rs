//! Palm detection.
//!
//! The palm detection network is a Single Shot MultiBox Detector (SSD). For each of its anchors it
//! regresses a bounding box and 7 keypoints on the palm, and outputs one score. The hand landmark
//! network is then run on a region derived from the most confident palm.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use image::RgbImage;
use nalgebra::Vector2;

use crate::{
    detector::{Estimator, DEFAULT_MIN_CONFIDENCE},
    image::Rect,
    nn::{Cnn, ColorMapper, NeuralNetwork, Outputs},
    num::{sigmoid, TotalF32},
};

/// A keypoint of a [`PalmDetection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

pub const NUM_KEYPOINTS: usize = 7;

/// Values regressed per anchor: box center offset and size, then the keypoint offsets.
const BOX_VALUES: usize = 4 + NUM_KEYPOINTS * 2;

/// SSD feature map layers, as `(stride, anchors per cell)`.
const LAYERS: &[(u32, usize)] = &[(8, 2), (16, 6)];

/// Palms overlapping at least this much are merged.
const IOU_THRESHOLD: f32 = 0.3;

/// Side length of the hand region, relative to the palm box.
const HAND_SCALE: f32 = 2.6;
/// Distance from the palm center to the hand region center, relative to the palm box.
const HAND_SHIFT: f32 = 0.5;

/// Runs the palm detection network on an image.
///
/// Cloning is cheap and shares the loaded network.
#[derive(Clone)]
pub struct PalmDetector {
    cnn: Cnn,
    anchors: Arc<Anchors>,
    threshold: f32,
}

impl PalmDetector {
    /// Loads the palm detection network from an ONNX file.
    ///
    /// The first two outputs must be the box regressors and the scores.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .with_output_selection([0, 1])
            .load()
            .with_context(|| {
                format!("failed to load palm detection network '{}'", path.display())
            })?;
        let cnn = Cnn::new(nn, ColorMapper::linear(0.0, 1.0))?;
        let anchors = Anchors::for_input(cnn.input_resolution());
        Ok(Self {
            cnn,
            anchors: Arc::new(anchors),
            threshold: DEFAULT_MIN_CONFIDENCE,
        })
    }

    /// Sets the minimum confidence of reported palms.
    #[inline]
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }
}

impl Estimator for PalmDetector {
    type Estimate = Vec<PalmDetection>;

    /// Detects palms inside `roi`, most confident first.
    fn estimate(&mut self, image: &RgbImage, roi: &Rect) -> anyhow::Result<Vec<PalmDetection>> {
        let roi = roi.grow_to_fit_aspect(self.cnn.input_aspect());
        let outputs = self.cnn.estimate(image, &roi)?;
        let detections = extract(
            &outputs,
            &self.anchors,
            self.threshold,
            &roi,
            self.cnn.input_resolution(),
        )?;
        log::trace!("{} palm candidates", detections.len());
        Ok(non_max_averaging(detections, IOU_THRESHOLD))
    }
}

/// A detected palm, in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PalmDetection {
    confidence: f32,
    rect: Rect,
    keypoints: [Vector2<f32>; NUM_KEYPOINTS],
}

impl PalmDetection {
    pub fn new(confidence: f32, rect: Rect, keypoints: [Vector2<f32>; NUM_KEYPOINTS]) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[inline]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoint(&self, keypoint: Keypoint) -> Vector2<f32> {
        self.keypoints[keypoint as usize]
    }

    /// Computes the region containing the whole hand this palm belongs to.
    ///
    /// This is a square around the palm, moved towards the fingers along the direction from the
    /// wrist to the middle finger's knuckle. The region is not rotated with the hand.
    pub fn hand_roi(&self) -> Rect {
        let (cx, cy) = self.rect.center();
        let size = self.rect.width().max(self.rect.height());
        let towards_fingers = (self.keypoint(Keypoint::MiddleFingerMcp)
            - self.keypoint(Keypoint::Wrist))
        .try_normalize(f32::EPSILON)
        .unwrap_or(-Vector2::y());

        let center = Vector2::new(cx, cy) + towards_fingers * (size * HAND_SHIFT);
        let side = size * HAND_SCALE;
        Rect::from_center(center.x, center.y, side, side)
    }
}

/// SSD anchor centers, in network input pixels.
#[derive(Debug)]
struct Anchors(Vec<Vector2<f32>>);

impl Anchors {
    fn for_input((width, height): (u32, u32)) -> Self {
        let mut centers = Vec::new();
        for &(stride, per_cell) in LAYERS {
            let (cols, rows) = (width.div_ceil(stride), height.div_ceil(stride));
            for y in 0..rows {
                for x in 0..cols {
                    let center = Vector2::new(
                        (x as f32 + 0.5) * width as f32 / cols as f32,
                        (y as f32 + 0.5) * height as f32 / rows as f32,
                    );
                    centers.extend(std::iter::repeat(center).take(per_cell));
                }
            }
        }
        Self(centers)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Decodes all palms scoring at least `threshold` and maps them from the network input back to
/// the image region `roi`.
fn extract(
    outputs: &Outputs,
    anchors: &Anchors,
    threshold: f32,
    roi: &Rect,
    (input_w, input_h): (u32, u32),
) -> anyhow::Result<Vec<PalmDetection>> {
    let boxes = outputs.f32_slice(0, &[1, anchors.len(), BOX_VALUES])?;
    let scores = outputs.f32_slice(1, &[1, anchors.len(), 1])?;

    let (input_w, input_h) = (input_w as f32, input_h as f32);
    let to_image = |p: Vector2<f32>| {
        let (x, y) = roi.transform_out(p.x / input_w, p.y / input_h);
        Vector2::new(x, y)
    };

    let mut detections = Vec::new();
    for ((anchor, params), &score) in anchors.0.iter().zip(boxes.chunks_exact(BOX_VALUES)).zip(scores)
    {
        let confidence = sigmoid(score);
        if confidence < threshold {
            continue;
        }

        // Positions are offsets from the anchor center.
        let point = |i: usize| to_image(anchor + Vector2::new(params[i], params[i + 1]));
        let center = point(0);
        let rect = Rect::from_center(
            center.x,
            center.y,
            params[2] * roi.width() / input_w,
            params[3] * roi.height() / input_h,
        );
        let keypoints = std::array::from_fn(|k| point(4 + k * 2));
        detections.push(PalmDetection::new(confidence, rect, keypoints));
    }

    Ok(detections)
}

/// Non-maximum averaging: replaces every group of overlapping palms with their
/// confidence-weighted average.
///
/// A merged palm keeps the confidence of its most confident member. The result is sorted by
/// descending confidence.
fn non_max_averaging(mut detections: Vec<PalmDetection>, iou_threshold: f32) -> Vec<PalmDetection> {
    // Sort by ascending confidence, so that popping yields the most confident palm.
    detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

    let mut merged = Vec::new();
    while let Some(seed) = detections.pop() {
        let (overlapping, rest): (Vec<_>, Vec<_>) = detections
            .into_iter()
            .partition(|other| seed.rect.iou(&other.rect) >= iou_threshold);
        detections = rest;
        merged.push(weighted_average(&seed, &overlapping));
    }
    merged
}

fn weighted_average(seed: &PalmDetection, others: &[PalmDetection]) -> PalmDetection {
    let mut center = Vector2::zeros();
    let mut size = Vector2::zeros();
    let mut keypoints = [Vector2::zeros(); NUM_KEYPOINTS];
    let mut total = 0.0;
    for det in std::iter::once(seed).chain(others) {
        let weight = det.confidence;
        let (cx, cy) = det.rect.center();
        center += Vector2::new(cx, cy) * weight;
        size += Vector2::new(det.rect.width(), det.rect.height()) * weight;
        for (acc, kp) in keypoints.iter_mut().zip(&det.keypoints) {
            *acc += kp * weight;
        }
        total += weight;
    }
    if total <= 0.0 {
        return seed.clone();
    }

    center /= total;
    size /= total;
    for kp in &mut keypoints {
        *kp /= total;
    }
    PalmDetection::new(
        seed.confidence,
        Rect::from_center(center.x, center.y, size.x, size.y),
        keypoints,
    )
}
