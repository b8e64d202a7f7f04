//! Hand and body gesture recognition.
//!
//! An image is turned into a gesture label in four steps:
//!
//! 1. The image is decoded ([`image`]).
//! 2. A [`Detector`](detector::Detector) finds hand and pose landmarks using landmark networks
//!    ([`hand`], [`body`]). Hands are located either through palm detection ([`palm`]) or at the
//!    end of the forearms of the detected pose.
//! 3. The landmarks are flattened into a feature row ([`features`]) and normalized so that they
//!    no longer depend on position and size ([`normalize`]).
//! 4. A [`Classifier`](classifier::Classifier) predicts a class index, which is mapped to a label.
//!
//! [`Recognizer`](recognizer::Recognizer) ties these together and [`server`] exposes it over
//! HTTP. If anything goes wrong, or nothing is detected, the label is [`NONE`].
//!
//! # Environment Variables
//!
//! All command line options can also be set through `HANDSIGN_*` environment variables (for
//! example `HANDSIGN_CLASSIFIER` for `--classifier`). Logging is configured with `RUST_LOG`.

pub mod body;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod features;
pub mod hand;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod normalize;
pub mod num;
pub mod palm;
pub mod recognizer;
pub mod server;
pub mod service;
pub mod timer;

#[cfg(test)]
mod test;

use log::LevelFilter;

/// The label reported when no gesture could be recognized.
pub const NONE: &str = "NONE";

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .filter(Some("tract_hir"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and this library log at *debug* level, the `tract` inference crates at
/// *warn* level. `RUST_LOG` overrides both.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
