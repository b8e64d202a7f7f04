//! The gesture recognition pipeline.
//!
//! A [`Recognizer`] takes encoded image bytes and runs them through decoding, landmark
//! detection, normalization and classification. Every failure along the way yields the
//! [`NONE`] label; the cause is kept in [`Recognition::error`].

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use image::RgbImage;
use thiserror::Error;

use crate::{
    classifier::{GestureModel, UnknownLabel},
    detector::Detector,
    features::Variant,
    image::ImageError,
    normalize::{Layout, LayoutMismatch, Normalizer},
    timer::Timer,
    NONE,
};

/// Why a recognition attempt fell back to [`NONE`].
#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] ImageError),
    #[error("landmark detection failed: {0:#}")]
    Detect(anyhow::Error),
    #[error(transparent)]
    Layout(#[from] LayoutMismatch),
    #[error("classification failed: {0:#}")]
    Classify(anyhow::Error),
    #[error(transparent)]
    Label(#[from] UnknownLabel),
    #[error("recognition panicked: {0}")]
    Panicked(String),
}

/// The outcome of recognizing one image.
#[derive(Debug)]
pub struct Recognition {
    pub label: String,
    /// Set when `label` is [`NONE`] because something went wrong, rather than because nothing
    /// was detected.
    pub error: Option<RecognizeError>,
}

impl Recognition {
    fn none() -> Self {
        Self {
            label: NONE.to_string(),
            error: None,
        }
    }

    fn failed(error: RecognizeError) -> Self {
        Self {
            label: NONE.to_string(),
            error: Some(error),
        }
    }
}

/// Recognizes gestures in images, one at a time.
///
/// Each recognizer owns its detector; the classifier and labels are shared.
pub struct Recognizer {
    variant: Variant,
    layout: Layout,
    normalizer: Normalizer,
    detector: Box<dyn Detector>,
    model: Arc<GestureModel>,
    decode: fn(&[u8]) -> Result<RgbImage, ImageError>,
    t_decode: Timer,
    t_detect: Timer,
    t_classify: Timer,
}

impl Recognizer {
    pub fn new(
        variant: Variant,
        normalizer: Normalizer,
        detector: Box<dyn Detector>,
        model: Arc<GestureModel>,
    ) -> Self {
        Self {
            variant,
            layout: variant.layout(),
            normalizer,
            detector,
            model,
            decode: crate::image::decode,
            t_decode: Timer::new("decode"),
            t_detect: Timer::new("detect"),
            t_classify: Timer::new("classify"),
        }
    }

    /// Recognizes the gesture in an encoded image.
    ///
    /// Never fails: undecodable images, detector and classifier errors, and panics inside any of
    /// them all produce [`NONE`], with the cause in [`Recognition::error`].
    pub fn recognize(&mut self, image_bytes: &[u8]) -> Recognition {
        self.guarded(|this| {
            let decode = this.decode;
            let image = this.t_decode.time(|| decode(image_bytes))?;
            this.run(&image)
        })
    }

    /// Like [`Recognizer::recognize`], but only returns the label.
    pub fn recognize_label(&mut self, image_bytes: &[u8]) -> String {
        self.recognize(image_bytes).label
    }

    /// Recognizes the gesture in an already decoded image.
    pub fn recognize_image(&mut self, image: &RgbImage) -> Recognition {
        self.guarded(|this| this.run(image))
    }

    /// Returns the stage timers, for periodic logging.
    pub fn timers(&self) -> [&Timer; 3] {
        [&self.t_decode, &self.t_detect, &self.t_classify]
    }

    /// Runs detection and classification. `Ok(None)` means nothing usable was detected.
    fn run(&mut self, image: &RgbImage) -> Result<Option<String>, RecognizeError> {
        let detector = &mut self.detector;
        let detection = self
            .t_detect
            .time(|| detector.detect(image))
            .map_err(RecognizeError::Detect)?;

        let Some(row) = self.variant.feature_row(&detection) else {
            log::trace!("no {:?} landmarks detected", self.variant);
            return Ok(None);
        };

        let _guard = self.t_classify.start();
        let features = self.normalizer.normalize(&row, &self.layout)?;
        let index = self
            .model
            .classifier()
            .predict(&features)
            .map_err(RecognizeError::Classify)?;
        let label = self.model.labels().decode(index)?;
        Ok(Some(label.to_string()))
    }

    /// Runs one recognition attempt, turning its errors and panics into [`NONE`].
    fn guarded<F>(&mut self, attempt: F) -> Recognition
    where
        F: FnOnce(&mut Self) -> Result<Option<String>, RecognizeError>,
    {
        let result = panic::catch_unwind(AssertUnwindSafe(|| attempt(&mut *self)));
        match result {
            Ok(Ok(Some(label))) => Recognition { label, error: None },
            Ok(Ok(None)) => Recognition::none(),
            Ok(Err(e)) => self.fail(e),
            Err(payload) => self.fail(RecognizeError::Panicked(panic_message(&*payload))),
        }
    }

    fn fail(&self, error: RecognizeError) -> Recognition {
        log::warn!("recognition failed, answering {NONE}: {error}");
        Recognition::failed(error)
    }

    #[cfg(test)]
    fn with_decoder(mut self, decode: fn(&[u8]) -> Result<RgbImage, ImageError>) -> Self {
        self.decode = decode;
        self
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
