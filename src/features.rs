//! Feature row assembly.

use crate::{
    landmark::{Detection, Landmarks, Part},
    normalize::Layout,
};

/// Which landmark sets make up a feature row, and how the classifier was trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Variant {
    /// A single hand, 42 features.
    Hand,
    /// Pose followed by the left and right hands, 150 features.
    Holistic,
}

impl Variant {
    pub fn layout(self) -> Layout {
        match self {
            Variant::Hand => Layout::hand(),
            Variant::Holistic => Layout::holistic(),
        }
    }

    /// Assembles the raw (unnormalized) feature row from a detection.
    ///
    /// Returns [`None`] if the detection lacks the part this variant needs: any hand for
    /// [`Variant::Hand`], the pose for [`Variant::Holistic`]. Absent hands in a holistic row are
    /// filled with zeros, which the normalizer passes through unchanged.
    pub fn feature_row(self, detection: &Detection) -> Option<Vec<f32>> {
        let mut row = Vec::with_capacity(self.layout().row_len());
        match self {
            Variant::Hand => detection.any_hand()?.flatten_into(&mut row),
            Variant::Holistic => {
                detection.pose.as_ref()?.flatten_into(&mut row);
                for (hand, part) in [
                    (&detection.left_hand, Part::LeftHand),
                    (&detection.right_hand, Part::RightHand),
                ] {
                    match hand {
                        Some(hand) => hand.flatten_into(&mut row),
                        None => Landmarks::zeroed(part).flatten_into(&mut row),
                    }
                }
            }
        }
        Some(row)
    }

    /// Returns the label set a classifier for this variant is trained on, in label-encoder order.
    pub fn default_labels(self) -> &'static [&'static str] {
        match self {
            Variant::Hand => &["NONE", "PEACE", "THUMBS_DOWN", "THUMBS_UP"],
            Variant::Holistic => &[
                "ARMS_CROSSED",
                "NONE",
                "ONE_ARM_UP",
                "PEACE",
                "THUMBS_DOWN",
                "THUMBS_UP",
            ],
        }
    }
}
