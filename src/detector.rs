//! Landmark detectors.
//!
//! A [`Detector`] turns an RGB image into a [`Detection`], with at most one landmark set for each
//! of pose, left hand and right hand.

use image::RgbImage;
use nalgebra::Vector2;

use crate::{
    body::{LandmarkIdx as PoseIdx, PoseEstimate, PoseLandmarker},
    hand::{HandEstimate, HandLandmarker, Handedness},
    image::Rect,
    landmark::Detection,
    num::TotalF32,
    palm::{PalmDetection, PalmDetector},
};

/// Default minimum confidence for a detected part to be accepted.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Finds pose and hand landmarks in an image.
///
/// Detectors may keep per-instance state, so each one is only ever used by one thread at a time.
pub trait Detector: Send {
    /// Detects landmarks in `image`.
    ///
    /// Finding nothing is not an error and yields [`Detection::empty`].
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Detection>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Detection> {
        (**self).detect(image)
    }
}

/// A network stage that estimates something about a region of an image.
///
/// Estimates are returned unfiltered; the detectors apply the confidence thresholds.
pub trait Estimator: Send {
    type Estimate;

    fn estimate(&mut self, image: &RgbImage, roi: &Rect) -> anyhow::Result<Self::Estimate>;
}

/// Detects a single hand: the most confident palm is located first, then hand landmarks are
/// estimated in the region around it.
#[derive(Clone)]
pub struct HandDetector<P = PalmDetector, H = HandLandmarker> {
    palms: P,
    landmarker: H,
    min_confidence: f32,
}

impl<P, H> HandDetector<P, H>
where
    P: Estimator<Estimate = Vec<PalmDetection>>,
    H: Estimator<Estimate = HandEstimate>,
{
    pub fn new(palms: P, landmarker: H, min_confidence: f32) -> Self {
        Self {
            palms,
            landmarker,
            min_confidence,
        }
    }
}

impl<P, H> Detector for HandDetector<P, H>
where
    P: Estimator<Estimate = Vec<PalmDetection>>,
    H: Estimator<Estimate = HandEstimate>,
{
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Detection> {
        let palms = self.palms.estimate(image, &Rect::of_image(image))?;
        let Some(palm) = palms
            .into_iter()
            .max_by_key(|palm| TotalF32(palm.confidence()))
        else {
            log::trace!("no palm");
            return Ok(Detection::empty());
        };

        let estimate = self.landmarker.estimate(image, &palm.hand_roi())?;
        let mut detection = Detection::empty();
        if estimate.presence() >= self.min_confidence {
            detection.set_hand(estimate.into_landmarks());
        } else {
            log::trace!(
                "no hand at palm {:?} (presence {:.2})",
                palm.rect(),
                estimate.presence()
            );
        }
        Ok(detection)
    }
}

/// Minimum visibility of a wrist for a hand region to be derived from it.
const MIN_WRIST_VISIBILITY: f32 = 0.5;
/// Forearms shorter than this (in pixels) are too unreliable to place a hand region.
const MIN_FOREARM_LENGTH: f32 = 30.0;
/// Hand center, as a multiple of the forearm vector, measured from the wrist.
const HAND_OFFSET: f32 = 0.6;
/// Side length of the hand region, as a multiple of the forearm length.
const HAND_BOX_SCALE: f32 = 2.5;
/// Clipped hand regions must be larger than this in both dimensions (in pixels).
const MIN_HAND_BOX: f32 = 20.0;

/// Detects the body pose, then both hands in regions derived from the forearms.
#[derive(Clone)]
pub struct HolisticDetector<P = PoseLandmarker, H = HandLandmarker> {
    pose: P,
    hand: H,
    min_confidence: f32,
}

impl<P, H> HolisticDetector<P, H>
where
    P: Estimator<Estimate = PoseEstimate>,
    H: Estimator<Estimate = HandEstimate>,
{
    pub fn new(pose: P, hand: H, min_confidence: f32) -> Self {
        Self {
            pose,
            hand,
            min_confidence,
        }
    }
}

impl<P, H> Detector for HolisticDetector<P, H>
where
    P: Estimator<Estimate = PoseEstimate>,
    H: Estimator<Estimate = HandEstimate>,
{
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Detection> {
        let pose = self.pose.estimate(image, &Rect::of_image(image))?;
        if pose.presence() < self.min_confidence {
            log::trace!("no pose (presence {:.2})", pose.presence());
            return Ok(Detection::empty());
        }

        let mut detection = Detection::empty();
        for handedness in [Handedness::Left, Handedness::Right] {
            let Some(roi) = hand_roi(&pose, handedness, image.dimensions()) else {
                continue;
            };

            let estimate = self.hand.estimate(image, &roi)?;
            if estimate.presence() >= self.min_confidence {
                // The pose side decides the slot, not the hand network's handedness guess.
                detection.set_hand(estimate.into_landmarks_as(handedness));
            }
        }

        detection.pose = Some(pose.into_landmarks());
        Ok(detection)
    }
}

/// Computes the image region that should contain the hand at the end of a forearm.
///
/// Returns [`None`] if the wrist is not visible enough, the forearm is too short, or the region
/// is too small after clipping it to the image.
fn hand_roi(pose: &PoseEstimate, side: Handedness, (w, h): (u32, u32)) -> Option<Rect> {
    let (wrist, elbow) = match side {
        Handedness::Left => (PoseIdx::LeftWrist, PoseIdx::LeftElbow),
        Handedness::Right => (PoseIdx::RightWrist, PoseIdx::RightElbow),
    };
    if pose.visibility(wrist) <= MIN_WRIST_VISIBILITY {
        return None;
    }

    let to_pixels = |p: Vector2<f32>| Vector2::new(p.x * w as f32, p.y * h as f32);
    let wrist = to_pixels(pose.position(wrist));
    let forearm = wrist - to_pixels(pose.position(elbow));
    let length = forearm.norm();
    if length <= MIN_FOREARM_LENGTH {
        return None;
    }

    let center = wrist + forearm * HAND_OFFSET;
    let size = length * HAND_BOX_SCALE;
    let roi = Rect::from_center(center.x, center.y, size, size)
        .intersection(&Rect::new(0.0, 0.0, w as f32, h as f32))?;
    if roi.width() <= MIN_HAND_BOX || roi.height() <= MIN_HAND_BOX {
        return None;
    }
    Some(roi)
}
