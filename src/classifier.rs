//! Gesture classification of normalized feature vectors.

use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use thiserror::Error;
use tract_onnx::prelude::*;

use crate::{nn::NeuralNetwork, num::argmax};

/// Maps a normalized feature vector to a numeric class label.
///
/// Classifiers are shared between worker threads and must not need exclusive access to predict.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f32]) -> anyhow::Result<i64>;
}

/// A classifier exported to ONNX, for example a scikit-learn pipeline converted with `skl2onnx`.
///
/// The network's first output is used as the prediction: integer outputs are taken as the class
/// label directly, floating point outputs are treated as per-class scores and reduced with argmax.
#[derive(Clone)]
pub struct OnnxClassifier {
    nn: NeuralNetwork,
    num_features: usize,
}

impl OnnxClassifier {
    /// Loads a classifier that takes a `[1, num_features]` float input.
    pub fn load<P: AsRef<Path>>(path: P, num_features: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .with_input_shape([1, num_features])
            .with_output_selection([0])
            .load()
            .with_context(|| format!("failed to load classifier '{}'", path.display()))?;
        if nn.num_inputs() != 1 {
            bail!(
                "classifier has to take exactly 1 input, this one takes {}",
                nn.num_inputs()
            );
        }

        Ok(Self { nn, num_features })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: &[f32]) -> anyhow::Result<i64> {
        if features.len() != self.num_features {
            bail!(
                "classifier expects {} features, got {}",
                self.num_features,
                features.len()
            );
        }

        let input = Tensor::from_shape(&[1, features.len()], features)?;
        let outputs = self.nn.estimate([input])?;
        prediction(&outputs[0])
    }
}

fn prediction(output: &Tensor) -> anyhow::Result<i64> {
    let label = match output.datum_type() {
        DatumType::I64 => output.as_slice::<i64>()?.first().copied(),
        DatumType::I32 => output.as_slice::<i32>()?.first().map(|&l| i64::from(l)),
        DatumType::F32 => argmax(output.as_slice::<f32>()?).map(|i| i as i64),
        ty => bail!("unsupported classifier output type {:?}", ty),
    };
    label.context("classifier produced an empty output")
}

/// A predicted class index has no label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("class index {index} is out of range for {count} labels")]
pub struct UnknownLabel {
    pub index: i64,
    pub count: usize,
}

/// The text labels of a classifier's classes, in class index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
    List(Vec<String>),
    Classes { classes: Vec<String> },
    IndexToClass { index_to_class: HashMap<String, String> },
}

impl Labels {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a label-encoder file.
    ///
    /// Accepted forms are a plain array of class names, an object with a `classes` array, or an
    /// object with an `index_to_class` map from decimal indices to names.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let names = match serde_json::from_str(json)? {
            LabelFile::List(names) | LabelFile::Classes { classes: names } => names,
            LabelFile::IndexToClass { index_to_class } => {
                let mut pairs = index_to_class
                    .into_iter()
                    .map(|(index, name)| {
                        index
                            .parse::<usize>()
                            .map(|index| (index, name))
                            .with_context(|| format!("invalid class index '{index}'"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                pairs.sort_by_key(|(index, _)| *index);
                if pairs.iter().enumerate().any(|(i, (index, _))| i != *index) {
                    bail!("class indices must be contiguous and start at 0");
                }
                pairs.into_iter().map(|(_, name)| name).collect()
            }
        };

        let labels = Self { names };
        if labels.is_empty() {
            bail!("label file contains no classes");
        }
        Ok(labels)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file '{}'", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid label file '{}'", path.display()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn decode(&self, index: i64) -> Result<&str, UnknownLabel> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
            .ok_or(UnknownLabel {
                index,
                count: self.names.len(),
            })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A classifier together with its label decoder.
///
/// Loaded once at startup and shared read-only between all workers.
pub struct GestureModel {
    classifier: Box<dyn Classifier>,
    labels: Labels,
}

impl GestureModel {
    pub fn new(classifier: Box<dyn Classifier>, labels: Labels) -> Self {
        Self { classifier, labels }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        &*self.classifier
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_label_output() {
        assert_eq!(prediction(&tensor1(&[3i64])).unwrap(), 3);
        assert_eq!(prediction(&tensor1(&[2i32])).unwrap(), 2);
    }

    #[test]
    fn score_output_uses_argmax() {
        assert_eq!(prediction(&tensor2(&[[0.1f32, 0.7, 0.2]])).unwrap(), 1);
    }

    #[test]
    fn bad_outputs() {
        assert!(prediction(&tensor1(&[1u8])).is_err());
        assert!(prediction(&tensor1::<i64>(&[])).is_err());
    }

    #[test]
    fn label_file_forms() {
        let expected = Labels::new(["NONE", "PEACE"]);
        assert_eq!(Labels::from_json(r#"["NONE", "PEACE"]"#).unwrap(), expected);
        assert_eq!(
            Labels::from_json(r#"{"classes": ["NONE", "PEACE"]}"#).unwrap(),
            expected
        );
        assert_eq!(
            Labels::from_json(r#"{"index_to_class": {"1": "PEACE", "0": "NONE"}}"#).unwrap(),
            expected
        );
    }

    #[test]
    fn invalid_label_files() {
        assert!(Labels::from_json("[]").is_err());
        assert!(Labels::from_json(r#"{"labels": ["A"]}"#).is_err());
        assert!(Labels::from_json(r#"{"index_to_class": {"0": "A", "2": "B"}}"#).is_err());
        assert!(Labels::from_json(r#"{"index_to_class": {"x": "A"}}"#).is_err());
    }

    #[test]
    fn decode_out_of_range() {
        let labels = Labels::new(["NONE", "PEACE", "THUMBS_DOWN", "THUMBS_UP"]);
        assert_eq!(labels.decode(1), Ok("PEACE"));
        assert_eq!(labels.index_of("THUMBS_UP"), Some(3));
        assert_eq!(
            labels.decode(4),
            Err(UnknownLabel {
                index: 4,
                count: 4
            })
        );
        assert!(labels.decode(-1).is_err());
    }
}
