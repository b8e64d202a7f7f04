//! Shared test fixtures.

use std::{
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, Rgb, RgbImage};
use nalgebra::Vector2;

use crate::{
    body::{self, PoseEstimate},
    classifier::Classifier,
    detector::{Detector, Estimator},
    hand::{self, HandEstimate},
    image::Rect,
    landmark::{Detection, Landmarks, Part},
    palm::{Keypoint, PalmDetection, NUM_KEYPOINTS},
};

/// An upright right hand showing the peace sign, with index and middle finger extended.
pub fn peace_hand() -> Landmarks {
    Landmarks::from_xy(
        Part::RightHand,
        [
            [0.50, 0.80],
            // thumb, folded over the palm
            [0.45, 0.77],
            [0.41, 0.73],
            [0.40, 0.69],
            [0.42, 0.66],
            // index
            [0.46, 0.65],
            [0.44, 0.57],
            [0.43, 0.52],
            [0.42, 0.47],
            // middle
            [0.50, 0.64],
            [0.51, 0.56],
            [0.52, 0.51],
            [0.53, 0.46],
            // ring, curled
            [0.54, 0.66],
            [0.53, 0.62],
            [0.51, 0.65],
            [0.50, 0.68],
            // pinky, curled
            [0.57, 0.68],
            [0.56, 0.65],
            [0.54, 0.67],
            [0.53, 0.70],
        ],
    )
    .unwrap()
}

/// A person standing upright, facing the camera. The shoulders are centered at `x = 0.5`.
pub fn standing_pose() -> Landmarks {
    Landmarks::from_xy(
        Part::Pose,
        [
            // face
            [0.50, 0.20],
            [0.49, 0.18],
            [0.48, 0.18],
            [0.47, 0.18],
            [0.51, 0.18],
            [0.52, 0.18],
            [0.53, 0.18],
            [0.45, 0.19],
            [0.55, 0.19],
            [0.49, 0.23],
            [0.51, 0.23],
            // shoulders, elbows, wrists
            [0.40, 0.35],
            [0.60, 0.35],
            [0.37, 0.50],
            [0.63, 0.50],
            [0.36, 0.63],
            [0.64, 0.63],
            // hands
            [0.355, 0.66],
            [0.645, 0.66],
            [0.36, 0.67],
            [0.64, 0.67],
            [0.37, 0.65],
            [0.63, 0.65],
            // hips, knees, ankles
            [0.43, 0.65],
            [0.57, 0.65],
            [0.43, 0.80],
            [0.57, 0.80],
            [0.43, 0.94],
            [0.57, 0.94],
            // feet
            [0.43, 0.96],
            [0.57, 0.96],
            [0.44, 0.98],
            [0.56, 0.98],
        ],
    )
    .unwrap()
}

pub fn flatten(landmarks: &Landmarks) -> Vec<f32> {
    let mut row = Vec::new();
    landmarks.flatten_into(&mut row);
    row
}

/// Creates a pose estimate in which only the given landmarks are placed (and visible).
pub fn pose_estimate(
    presence: f32,
    landmarks: &[(body::LandmarkIdx, [f32; 2], f32)],
) -> PoseEstimate {
    let mut positions = vec![nalgebra::Vector2::zeros(); body::NUM_LANDMARKS];
    let mut visibility = vec![0.0; body::NUM_LANDMARKS];
    for &(idx, [x, y], vis) in landmarks {
        positions[idx as usize] = nalgebra::Vector2::new(x, y);
        visibility[idx as usize] = vis;
    }
    PoseEstimate::from_parts(presence, positions, visibility)
}

/// Creates a hand estimate with all landmarks at the origin.
pub fn hand_estimate(presence: f32, raw_handedness: f32) -> HandEstimate {
    HandEstimate::from_parts(
        presence,
        raw_handedness,
        vec![Vector2::zeros(); hand::NUM_LANDMARKS],
    )
}

/// A 40x40 upright palm centered at `(cx, cy)`, fingers pointing up.
pub fn palm(confidence: f32, (cx, cy): (f32, f32)) -> PalmDetection {
    let mut keypoints = [Vector2::new(cx, cy); NUM_KEYPOINTS];
    keypoints[Keypoint::Wrist as usize] = Vector2::new(cx, cy + 20.0);
    keypoints[Keypoint::MiddleFingerMcp as usize] = Vector2::new(cx, cy - 20.0);
    PalmDetection::new(confidence, Rect::from_center(cx, cy, 40.0, 40.0), keypoints)
}

/// An [`Estimator`] that computes its estimate from the region of interest with a closure, and
/// records every region it was given.
pub struct FnEstimator<F, E> {
    f: F,
    rois: Arc<Mutex<Vec<Rect>>>,
    _estimate: PhantomData<fn() -> E>,
}

impl<F, E> FnEstimator<F, E>
where
    F: FnMut(&Rect) -> anyhow::Result<E> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            rois: Arc::default(),
            _estimate: PhantomData,
        }
    }

    pub fn rois(&self) -> Arc<Mutex<Vec<Rect>>> {
        self.rois.clone()
    }
}

impl<F, E> Estimator for FnEstimator<F, E>
where
    F: FnMut(&Rect) -> anyhow::Result<E> + Send,
{
    type Estimate = E;

    fn estimate(&mut self, _: &RgbImage, roi: &Rect) -> anyhow::Result<E> {
        self.rois.lock().unwrap().push(*roi);
        (self.f)(roi)
    }
}

/// Encodes a single-color PNG image.
pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut data = Vec::new();
    PngEncoder::new(&mut data)
        .write_image(&image, width, height, ColorType::Rgb8)
        .unwrap();
    data
}

/// Always returns the same detection.
pub struct StubDetector {
    detection: Detection,
}

impl StubDetector {
    pub fn new(detection: Detection) -> Self {
        Self { detection }
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, _: &RgbImage) -> anyhow::Result<Detection> {
        Ok(self.detection.clone())
    }
}

pub struct PanickingDetector;

impl Detector for PanickingDetector {
    fn detect(&mut self, _: &RgbImage) -> anyhow::Result<Detection> {
        panic!("detector exploded");
    }
}

/// Always predicts the same class, and records the feature vectors it was given.
pub struct StubClassifier {
    label: i64,
    seen: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl StubClassifier {
    pub fn new(label: i64) -> Self {
        Self {
            label,
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<Vec<f32>>>> {
        self.seen.clone()
    }
}

impl Classifier for StubClassifier {
    fn predict(&self, features: &[f32]) -> anyhow::Result<i64> {
        self.seen.lock().unwrap().push(features.to_vec());
        Ok(self.label)
    }
}

pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn predict(&self, _: &[f32]) -> anyhow::Result<i64> {
        anyhow::bail!("model is on fire")
    }
}
