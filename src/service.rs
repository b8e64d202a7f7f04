//! Process-wide recognition service.

use std::sync::Arc;

use anyhow::Context;
use itertools::Itertools;

use crate::{
    body::PoseLandmarker,
    classifier::{GestureModel, Labels, OnnxClassifier},
    config::Config,
    detector::{Detector, HandDetector, HolisticDetector},
    features::Variant,
    hand::HandLandmarker,
    normalize::Normalizer,
    palm::PalmDetector,
    recognizer::Recognizer,
    NONE,
};

type DetectorFactory = Box<dyn Fn() -> Box<dyn Detector> + Send + Sync>;

/// Everything that is loaded once and shared: the classifier, the labels, and the landmark
/// networks (behind the detector factory).
///
/// Hands out one [`Recognizer`] per worker, each with its own detector instance.
pub struct Service {
    variant: Variant,
    normalizer: Normalizer,
    model: Arc<GestureModel>,
    detectors: DetectorFactory,
}

impl Service {
    /// Validates `config` and loads all model artifacts it names.
    pub fn load(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let variant = config.variant;

        let labels = match &config.labels {
            Some(path) => Labels::load(path)?,
            None => Labels::new(variant.default_labels().iter().copied()),
        };
        if labels.index_of(NONE).is_none() {
            log::warn!(
                "label set [{}] has no {NONE} class",
                labels.names().iter().format(", ")
            );
        }

        let classifier = OnnxClassifier::load(&config.classifier, variant.layout().row_len())?;
        let hand = HandLandmarker::load(&config.hand_model)?;
        let min_confidence = config.min_detection_confidence;
        let detectors: DetectorFactory = match variant {
            Variant::Hand => {
                let path = config
                    .palm_model
                    .as_ref()
                    .context("no palm detection network configured")?;
                let mut palms = PalmDetector::load(path)?;
                palms.set_threshold(min_confidence);
                Box::new(move || -> Box<dyn Detector> {
                    Box::new(HandDetector::new(
                        palms.clone(),
                        hand.clone(),
                        min_confidence,
                    ))
                })
            }
            Variant::Holistic => {
                let path = config
                    .pose_model
                    .as_ref()
                    .context("no pose landmark network configured")?;
                let pose = PoseLandmarker::load(path)?;
                Box::new(move || -> Box<dyn Detector> {
                    Box::new(HolisticDetector::new(
                        pose.clone(),
                        hand.clone(),
                        min_confidence,
                    ))
                })
            }
        };

        log::info!(
            "loaded {:?} pipeline with {} classes from '{}'",
            variant,
            labels.len(),
            config.classifier.display()
        );

        Ok(Self::new(
            variant,
            Normalizer::new(config.thresholds()),
            GestureModel::new(Box::new(classifier), labels),
            detectors,
        ))
    }

    /// Assembles a service from already constructed parts.
    ///
    /// `detectors` is called once per [`Recognizer`].
    pub fn new<F>(variant: Variant, normalizer: Normalizer, model: GestureModel, detectors: F) -> Self
    where
        F: Fn() -> Box<dyn Detector> + Send + Sync + 'static,
    {
        Self {
            variant,
            normalizer,
            model: Arc::new(model),
            detectors: Box::new(detectors),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Creates a recognizer with a fresh detector instance.
    pub fn recognizer(&self) -> Recognizer {
        Recognizer::new(
            self.variant,
            self.normalizer,
            (self.detectors)(),
            self.model.clone(),
        )
    }
}
