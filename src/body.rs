//! Body pose landmark estimation.

use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use nalgebra::Vector2;

use crate::{
    detector::Estimator,
    image::Rect,
    landmark::{Landmarks, Part, Position},
    nn::{Cnn, ColorMapper, NeuralNetwork, Outputs},
    num::sigmoid,
};

/// Number of landmarks in a pose landmark set.
pub const NUM_LANDMARKS: usize = 33;

/// The network also outputs auxiliary landmarks after the regular ones, which we discard.
const NUM_NETWORK_LANDMARKS: usize = 39;

/// Names for the body pose landmarks.
///
/// "Left" and "right" refer to the person's own body sides, not the sides of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

/// Runs the pose landmark network on an image region.
#[derive(Clone)]
pub struct PoseLandmarker {
    cnn: Cnn,
}

impl PoseLandmarker {
    /// Loads the pose landmark network from an ONNX file.
    ///
    /// Only the screen landmarks and the pose flag (the first two outputs) are computed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .with_output_selection([0, 1])
            .load()
            .with_context(|| format!("failed to load pose landmark network '{}'", path.display()))?;
        Ok(Self {
            cnn: Cnn::new(nn, ColorMapper::linear(0.0, 1.0))?,
        })
    }
}

impl Estimator for PoseLandmarker {
    type Estimate = PoseEstimate;

    /// Estimates the pose of the person inside `roi`, after fitting it to the network's aspect
    /// ratio.
    fn estimate(&mut self, image: &RgbImage, roi: &Rect) -> anyhow::Result<PoseEstimate> {
        let roi = roi.grow_to_fit_aspect(self.cnn.input_aspect());
        let outputs = self.cnn.estimate(image, &roi)?;
        extract(
            &outputs,
            &roi,
            self.cnn.input_resolution(),
            image.dimensions(),
        )
    }
}

/// A pose landmark estimate.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    presence: f32,
    positions: Vec<Position>,
    visibility: Vec<f32>,
}

impl PoseEstimate {
    /// Returns the network's confidence that the region contains a person.
    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// Returns the position of a landmark, in image-normalized coordinates.
    pub fn position(&self, idx: LandmarkIdx) -> Position {
        self.positions[idx as usize]
    }

    /// Returns the probability that a landmark is visible (not occluded or outside the image).
    pub fn visibility(&self, idx: LandmarkIdx) -> f32 {
        self.visibility[idx as usize]
    }

    pub fn into_landmarks(self) -> Landmarks {
        Landmarks::new(Part::Pose, self.positions).expect("pose estimate always has 33 landmarks")
    }
}

#[cfg(test)]
impl PoseEstimate {
    pub(crate) fn from_parts(presence: f32, positions: Vec<Position>, visibility: Vec<f32>) -> Self {
        assert_eq!(positions.len(), NUM_LANDMARKS);
        assert_eq!(visibility.len(), NUM_LANDMARKS);
        Self {
            presence,
            positions,
            visibility,
        }
    }
}

fn extract(
    outputs: &Outputs,
    roi: &Rect,
    (input_w, input_h): (u32, u32),
    (image_w, image_h): (u32, u32),
) -> anyhow::Result<PoseEstimate> {
    // x, y, z, visibility, presence
    let screen_landmarks = outputs.f32_slice(0, &[1, NUM_NETWORK_LANDMARKS * 5])?;
    let presence = outputs.f32_slice(1, &[1, 1])?[0];

    let mut positions = Vec::with_capacity(NUM_LANDMARKS);
    let mut visibility = Vec::with_capacity(NUM_LANDMARKS);
    for lm in screen_landmarks.chunks_exact(5).take(NUM_LANDMARKS) {
        let (x, y) = roi.transform_out(lm[0] / input_w as f32, lm[1] / input_h as f32);
        positions.push(Vector2::new(x / image_w as f32, y / image_h as f32));
        visibility.push(sigmoid(lm[3]));
    }

    Ok(PoseEstimate {
        presence,
        positions,
        visibility,
    })
}
