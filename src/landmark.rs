//! Landmark sets produced by the detectors.
//!
//! Landmark coordinates are normalized to the input image: `(0, 0)` is the top left corner and
//! `(1, 1)` the bottom right corner. Values outside of that range are allowed, since detectors
//! can place landmarks outside of the visible image.

use nalgebra::Vector2;
use thiserror::Error;

/// A landmark position in 2D image-normalized coordinates.
pub type Position = Vector2<f32>;

/// The body part a [`Landmarks`] set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Pose,
    LeftHand,
    RightHand,
}

impl Part {
    /// Returns the fixed number of landmarks in a set of this kind.
    pub const fn num_landmarks(self) -> usize {
        match self {
            Part::Pose => crate::body::NUM_LANDMARKS,
            Part::LeftHand | Part::RightHand => crate::hand::NUM_LANDMARKS,
        }
    }
}

/// A [`Landmarks`] set was constructed with the wrong number of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{part:?} landmark set needs {expected} landmarks, got {actual}")]
pub struct LandmarkCountMismatch {
    pub part: Part,
    pub expected: usize,
    pub actual: usize,
}

/// An ordered set of landmarks with a fixed length and fixed semantic indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    part: Part,
    positions: Box<[Position]>,
}

impl Landmarks {
    /// Creates a landmark set from a list of positions.
    ///
    /// Returns an error if the number of positions does not match [`Part::num_landmarks`].
    pub fn new<I>(part: Part, positions: I) -> Result<Self, LandmarkCountMismatch>
    where
        I: IntoIterator<Item = Position>,
    {
        let positions: Box<[Position]> = positions.into_iter().collect();
        if positions.len() != part.num_landmarks() {
            return Err(LandmarkCountMismatch {
                part,
                expected: part.num_landmarks(),
                actual: positions.len(),
            });
        }

        Ok(Self { part, positions })
    }

    /// Creates a landmark set from `[x, y]` pairs.
    pub fn from_xy<I>(part: Part, coords: I) -> Result<Self, LandmarkCountMismatch>
    where
        I: IntoIterator<Item = [f32; 2]>,
    {
        Self::new(part, coords.into_iter().map(|[x, y]| Vector2::new(x, y)))
    }

    /// Creates a landmark set with every landmark at `(0, 0)`.
    ///
    /// This is what an undetected part looks like in a feature row.
    pub fn zeroed(part: Part) -> Self {
        Self {
            part,
            positions: vec![Vector2::zeros(); part.num_landmarks()].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn part(&self) -> Part {
        self.part
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Appends the flattened `x, y` pairs of all landmarks to `row`.
    pub fn flatten_into(&self, row: &mut Vec<f32>) {
        row.reserve(self.positions.len() * 2);
        for pos in self.positions.iter() {
            row.extend([pos.x, pos.y]);
        }
    }
}

/// The landmark sets found in a single image.
///
/// Each part is either present with its full set of landmarks, or absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub pose: Option<Landmarks>,
    pub left_hand: Option<Landmarks>,
    pub right_hand: Option<Landmarks>,
}

impl Detection {
    /// A detection result in which nothing was found.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `true` if no part was detected.
    pub fn is_empty(&self) -> bool {
        self.pose.is_none() && self.left_hand.is_none() && self.right_hand.is_none()
    }

    /// Returns the first detected hand, preferring the right hand.
    pub fn any_hand(&self) -> Option<&Landmarks> {
        self.right_hand.as_ref().or(self.left_hand.as_ref())
    }

    /// Stores a hand in the slot matching its [`Part`].
    ///
    /// # Panics
    ///
    /// Panics if `hand` is a pose landmark set.
    pub fn set_hand(&mut self, hand: Landmarks) {
        match hand.part() {
            Part::LeftHand => self.left_hand = Some(hand),
            Part::RightHand => self.right_hand = Some(hand),
            Part::Pose => panic!("`set_hand` called with pose landmarks"),
        }
    }
}
