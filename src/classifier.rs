//! Bean classification.
//!
//! The dispatcher only depends on the [`Classifier`] trait. The alternating stub
//! proves the pipeline end to end; a model-backed classifier plugs in with the same
//! signature. [`classify_or_fail_safe`] is the only way the dispatcher calls a
//! classifier, so an error or panic inside one becomes the fail-safe label.

use crate::camera::ImageArtifact;
use crate::config::ClassifierConfig;
use crate::error::{BridgeError, BridgeResult};
use anyhow::Result;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

/// Classification label sent in `RES` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u8);

impl Label {
    /// Bean passes
    pub const ACCEPT: Label = Label(0);
    /// Bean is sorted out
    pub const REJECT: Label = Label(1);
    /// Label used when no classification is possible
    pub const FAIL_SAFE: Label = Label::REJECT;

    /// Wrap a raw label value
    pub const fn new(value: u8) -> Self {
        Label(value)
    }

    /// Raw label value
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a persisted image to a label.
pub trait Classifier: Send {
    /// Name for logs
    fn name(&self) -> &str;

    /// Classify one artifact
    fn classify(&mut self, artifact: &ImageArtifact) -> Result<Label>;
}

/// Reference stub: 0, 1, 0, 1, ... across calls.
#[derive(Debug, Default)]
pub struct AlternatingClassifier {
    next: u8,
}

impl AlternatingClassifier {
    /// Start at [`Label::ACCEPT`]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for AlternatingClassifier {
    fn name(&self) -> &str {
        "alternating"
    }

    fn classify(&mut self, _artifact: &ImageArtifact) -> Result<Label> {
        let label = Label(self.next);
        self.next = 1 - self.next;
        Ok(label)
    }
}

/// Always returns the same label.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    label: Label,
}

impl FixedClassifier {
    /// Classifier that always answers `label`
    pub fn new(label: Label) -> Self {
        Self { label }
    }
}

impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    fn classify(&mut self, _artifact: &ImageArtifact) -> Result<Label> {
        Ok(self.label)
    }
}

/// Build the classifier selected in configuration.
pub fn from_config(config: &ClassifierConfig) -> BridgeResult<Box<dyn Classifier>> {
    match config.kind.as_str() {
        "alternating" => Ok(Box::new(AlternatingClassifier::new())),
        "fixed" => Ok(Box::new(FixedClassifier::new(Label::new(config.fixed_label)))),
        other => Err(BridgeError::Configuration(format!(
            "unknown classifier kind '{other}'"
        ))),
    }
}

/// Classify, degrading any error or panic to `fail_safe`.
pub fn classify_or_fail_safe(
    classifier: &mut dyn Classifier,
    artifact: &ImageArtifact,
    fail_safe: Label,
) -> Label {
    let outcome = catch_unwind(AssertUnwindSafe(|| classifier.classify(artifact)));
    match outcome {
        Ok(Ok(label)) => label,
        Ok(Err(e)) => {
            warn!(
                classifier = classifier.name(),
                path = %artifact.path.display(),
                error = %e,
                "Classification failed, using fail-safe label"
            );
            fail_safe
        }
        Err(_) => {
            error!(
                classifier = classifier.name(),
                path = %artifact.path.display(),
                "Classifier panicked, using fail-safe label"
            );
            fail_safe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn artifact() -> ImageArtifact {
        ImageArtifact {
            path: PathBuf::from("/tmp/bean_000001_pos6_1.jpg"),
            captured_at: Utc::now(),
            bean_id: 1,
            position: 6,
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn classify(&mut self, _artifact: &ImageArtifact) -> Result<Label> {
            anyhow::bail!("model not loaded")
        }
    }

    struct Panicking;

    impl Classifier for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn classify(&mut self, _artifact: &ImageArtifact) -> Result<Label> {
            panic!("tensor shape mismatch")
        }
    }

    #[test]
    fn alternates_starting_with_accept() {
        let mut classifier = AlternatingClassifier::new();
        let labels: Vec<u8> = (0..4)
            .map(|_| classifier.classify(&artifact()).unwrap().value())
            .collect();
        assert_eq!(labels, vec![0, 1, 0, 1]);
    }

    #[test]
    fn error_degrades_to_fail_safe() {
        let label = classify_or_fail_safe(&mut Broken, &artifact(), Label::FAIL_SAFE);
        assert_eq!(label, Label::REJECT);
    }

    #[test]
    fn panic_degrades_to_fail_safe() {
        let label = classify_or_fail_safe(&mut Panicking, &artifact(), Label::new(7));
        assert_eq!(label, Label::new(7));
    }

    #[test]
    fn builds_from_config() {
        let mut config = ClassifierConfig::default();
        config.kind = "fixed".to_string();
        config.fixed_label = 1;
        let mut classifier = from_config(&config).unwrap();
        assert_eq!(classifier.name(), "fixed");
        assert_eq!(classifier.classify(&artifact()).unwrap(), Label::REJECT);

        config.kind = "resnet".to_string();
        assert!(from_config(&config).is_err());
    }
}
