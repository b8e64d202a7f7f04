//! Command line and environment configuration.

use std::path::PathBuf;

use anyhow::bail;

use crate::{detector::DEFAULT_MIN_CONFIDENCE, features::Variant, normalize::Thresholds};

/// Default limit for request bodies, 10 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration of the recognition pipeline and its model artifacts.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Which landmark sets the classifier was trained on.
    #[arg(long, value_enum, default_value_t = Variant::Hand, env = "HANDSIGN_VARIANT")]
    pub variant: Variant,

    /// Path to the ONNX gesture classifier.
    #[arg(long, env = "HANDSIGN_CLASSIFIER")]
    pub classifier: PathBuf,

    /// Path to a JSON label-encoder file. Defaults to the variant's built-in label set.
    #[arg(long, env = "HANDSIGN_LABELS")]
    pub labels: Option<PathBuf>,

    /// Path to the ONNX hand landmark network.
    #[arg(long, env = "HANDSIGN_HAND_MODEL")]
    pub hand_model: PathBuf,

    /// Path to the ONNX palm detection network. Required for the hand variant.
    #[arg(long, env = "HANDSIGN_PALM_MODEL")]
    pub palm_model: Option<PathBuf>,

    /// Path to the ONNX pose landmark network. Required for the holistic variant.
    #[arg(long, env = "HANDSIGN_POSE_MODEL")]
    pub pose_model: Option<PathBuf>,

    /// Minimum presence score for a detected hand or pose to be used.
    #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE, env = "HANDSIGN_MIN_DETECTION_CONFIDENCE")]
    pub min_detection_confidence: f32,

    /// Shoulder-to-hip distances at or below this are not used for scaling.
    #[arg(long, default_value_t = Thresholds::DEFAULT_POSE_SCALE, env = "HANDSIGN_POSE_SCALE_THRESHOLD")]
    pub pose_scale_threshold: f32,

    /// Hand spans at or below this are not used for scaling.
    #[arg(long, default_value_t = Thresholds::DEFAULT_HAND_SCALE, env = "HANDSIGN_HAND_SCALE_THRESHOLD")]
    pub hand_scale_threshold: f32,
}

impl Config {
    /// Checks the configuration for consistency, without touching the filesystem.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.min_detection_confidence) {
            bail!(
                "minimum detection confidence must be in 0..=1, got {}",
                self.min_detection_confidence
            );
        }
        for (name, value) in [
            ("pose scale threshold", self.pose_scale_threshold),
            ("hand scale threshold", self.hand_scale_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a non-negative number, got {value}");
            }
        }
        match self.variant {
            Variant::Hand if self.palm_model.is_none() => {
                bail!("the hand variant needs a palm detection network (`--palm-model`)");
            }
            Variant::Holistic if self.pose_model.is_none() => {
                bail!("the holistic variant needs a pose landmark network (`--pose-model`)");
            }
            _ => {}
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            pose_scale: self.pose_scale_threshold,
            hand_scale: self.hand_scale_threshold,
        }
    }
}

/// Configuration of the HTTP server.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:5001", env = "HANDSIGN_LISTEN")]
    pub listen: String,

    /// Number of worker threads, each with its own detector.
    #[arg(long, default_value_t = 1, env = "HANDSIGN_WORKERS")]
    pub workers: usize,

    /// Requests with larger bodies are rejected with 413.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, env = "HANDSIGN_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,

    /// Read and write timeout for client connections.
    #[arg(long, default_value_t = 30, env = "HANDSIGN_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Include the cause of failed recognitions in responses.
    #[arg(long, env = "HANDSIGN_EXPOSE_ERRORS")]
    pub expose_errors: bool,
}

impl ServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("at least one worker is required");
        }
        if self.max_body_bytes == 0 {
            bail!("maximum body size must not be 0");
        }
        if self.timeout_secs == 0 {
            bail!("connection timeout must not be 0");
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5001".into(),
            workers: 1,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            timeout_secs: 30,
            expose_errors: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: Config,
        #[command(flatten)]
        server: ServerConfig,
    }

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(
            ["handsign", "--classifier", "c.onnx", "--hand-model", "h.onnx"]
                .iter()
                .chain(args)
                .copied(),
        )
    }

    #[test]
    fn defaults() {
        let cli = parse(&["--palm-model", "p.onnx"]).unwrap();
        assert_eq!(cli.config.variant, Variant::Hand);
        assert_eq!(cli.config.min_detection_confidence, 0.5);
        assert_eq!(cli.config.thresholds(), Thresholds::default());
        cli.config.validate().unwrap();

        assert_eq!(cli.server.listen, "0.0.0.0:5001");
        assert_eq!(cli.server.workers, 1);
        assert_eq!(cli.server.max_body_bytes, 10 * 1024 * 1024);
        assert!(!cli.server.expose_errors);
        cli.server.validate().unwrap();
    }

    #[test]
    fn hand_needs_palm_model() {
        let cli = parse(&[]).unwrap();
        let err = cli.config.validate().unwrap_err();
        assert!(err.to_string().contains("--palm-model"), "{err}");

        // The holistic variant finds hands through the pose instead.
        let cli = parse(&["--variant", "holistic", "--pose-model", "p.onnx"]).unwrap();
        assert_eq!(cli.config.palm_model, None);
        cli.config.validate().unwrap();
    }

    #[test]
    fn holistic_needs_pose_model() {
        let cli = parse(&["--variant", "holistic"]).unwrap();
        assert!(cli.config.validate().is_err());

        let cli = parse(&["--variant", "holistic", "--pose-model", "p.onnx"]).unwrap();
        cli.config.validate().unwrap();
    }

    #[test]
    fn invalid_values() {
        let cli = parse(&["--palm-model", "p.onnx", "--min-detection-confidence", "1.5"]).unwrap();
        assert!(cli.config.validate().is_err());

        let cli = parse(&["--palm-model", "p.onnx", "--hand-scale-threshold=-1"]).unwrap();
        assert!(cli.config.validate().is_err());

        let cli = parse(&["--workers", "0"]).unwrap();
        assert!(cli.server.validate().is_err());

        assert!(parse(&["--variant", "face"]).is_err());
    }
}
