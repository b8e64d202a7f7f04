//! Hand landmark estimation.

use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use nalgebra::Vector2;

use crate::{
    detector::Estimator,
    image::Rect,
    landmark::{Landmarks, Part, Position},
    nn::{Cnn, ColorMapper, NeuralNetwork, Outputs},
};

/// Number of landmarks in a hand landmark set.
pub const NUM_LANDMARKS: usize = 21;

/// Names for the hand pose landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Returns the landmark [`Part`] a hand of this handedness is stored as.
    pub fn part(self) -> Part {
        match self {
            Handedness::Left => Part::LeftHand,
            Handedness::Right => Part::RightHand,
        }
    }
}

/// Runs the hand landmark network on a region of an image.
///
/// Cloning is cheap and shares the loaded network.
#[derive(Clone)]
pub struct HandLandmarker {
    cnn: Cnn,
}

impl HandLandmarker {
    /// Loads the hand landmark network from an ONNX file.
    ///
    /// The network must take a single RGB image input and produce the screen landmarks, the
    /// presence flag and the handedness as its first three outputs.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .with_output_selection([0, 1, 2])
            .load()
            .with_context(|| format!("failed to load hand landmark network '{}'", path.display()))?;
        Ok(Self {
            cnn: Cnn::new(nn, ColorMapper::linear(0.0, 1.0))?,
        })
    }
}

impl Estimator for HandLandmarker {
    type Estimate = HandEstimate;

    /// Estimates hand landmarks inside `roi`.
    ///
    /// `roi` is enlarged to match the network's aspect ratio before sampling. The resulting
    /// landmark positions are normalized to the whole `image`.
    fn estimate(&mut self, image: &RgbImage, roi: &Rect) -> anyhow::Result<HandEstimate> {
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

/// A hand landmark estimate, not yet filtered by confidence.
#[derive(Debug, Clone)]
pub struct HandEstimate {
    presence: f32,
    raw_handedness: f32,
    positions: Vec<Position>,
}

impl HandEstimate {
    /// Returns the network's confidence that the region contains a hand.
    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// Returns the estimated handedness of the hand in the image.
    ///
    /// This assumes that the camera image is passed in as-is, and the returned value should only be
    /// relied on when the `presence` is over some threshold.
    pub fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Converts the estimate into a landmark set for the hand slot given by [`Self::handedness`].
    pub fn into_landmarks(self) -> Landmarks {
        let handedness = self.handedness();
        self.into_landmarks_as(handedness)
    }

    /// Converts the estimate into a landmark set for an explicitly chosen hand slot.
    pub fn into_landmarks_as(self, handedness: Handedness) -> Landmarks {
        Landmarks::new(handedness.part(), self.positions)
            .expect("hand estimate always has 21 landmarks")
    }
}

#[cfg(test)]
impl HandEstimate {
    pub(crate) fn from_parts(presence: f32, raw_handedness: f32, positions: Vec<Position>) -> Self {
        assert_eq!(positions.len(), NUM_LANDMARKS);
        Self {
            presence,
            raw_handedness,
            positions,
        }
    }
}

fn extract(
    outputs: &Outputs,
    roi: &Rect,
    (input_w, input_h): (u32, u32),
    (image_w, image_h): (u32, u32),
) -> anyhow::Result<HandEstimate> {
    let screen_landmarks = outputs.f32_slice(0, &[1, NUM_LANDMARKS * 3])?;
    let presence = outputs.f32_slice(1, &[1, 1])?[0];
    let raw_handedness = outputs.f32_slice(2, &[1, 1])?[0];

    // Landmarks are in network input pixels; z is dropped.
    let positions = screen_landmarks
        .chunks_exact(3)
        .map(|xyz| {
            let (x, y) = roi.transform_out(xyz[0] / input_w as f32, xyz[1] / input_h as f32);
            Vector2::new(x / image_w as f32, y / image_h as f32)
        })
        .collect();

    Ok(HandEstimate {
        presence,
        raw_handedness,
        positions,
    })
}
