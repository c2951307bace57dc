//! In-memory build engine (testing only).
//!
//! `RecordingEngine` satisfies the [`BuildEngine`] contract without a
//! container daemon: built images get the base image's layers plus one
//! layer derived from the context, and every call is recorded.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use kiln_common::error::{KilnError, Result};
use kiln_common::types::LayerDigest;

use crate::cancel::CancelToken;
use crate::engine::{BuildEngine, ImageBuild, ImageInspection};

/// One call made against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `build` with the requested tag, base and labels.
    Build {
        /// Requested tag.
        tag: String,
        /// Base image.
        base_image: String,
        /// Requested labels.
        labels: BTreeMap<String, String>,
    },
    /// `inspect` of an image.
    Inspect(String),
    /// `pull` of an image.
    Pull(String),
    /// `remove` of an image.
    Remove(String),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<EngineCall>,
    images: BTreeMap<String, ImageInspection>,
    build_failure: Option<String>,
    cancel_during_build: bool,
    dropped_labels: Vec<String>,
}

/// Build engine that keeps images in memory and records every call.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    state: Mutex<State>,
}

impl RecordingEngine {
    /// Creates an engine with no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing image with the given layers.
    #[must_use]
    pub fn with_image(self, image: &str, layers: Vec<LayerDigest>) -> Self {
        let _ = self.lock().images.insert(
            image.to_string(),
            ImageInspection {
                layers,
                labels: BTreeMap::new(),
            },
        );
        self
    }

    /// Makes every build fail with `output`.
    #[must_use]
    pub fn failing_with(self, output: &str) -> Self {
        self.lock().build_failure = Some(output.to_string());
        self
    }

    /// Cancels the token passed to `build` after the image is tagged.
    #[must_use]
    pub fn cancelling_during_build(self) -> Self {
        self.lock().cancel_during_build = true;
        self
    }

    /// Builds images without the given label.
    #[must_use]
    pub fn dropping_label(self, key: &str) -> Self {
        self.lock().dropped_labels.push(key.to_string());
        self
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of `build` calls made so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, EngineCall::Build { .. }))
            .count()
    }

    /// Returns `true` if `image` currently exists.
    #[must_use]
    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains_key(image)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BuildEngine for RecordingEngine {
    fn build(
        &self,
        request: &ImageBuild,
        cancel: &CancelToken,
        on_log: &mut dyn FnMut(&str),
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Build {
            tag: request.tag.clone(),
            base_image: request.base_image.clone(),
            labels: request.labels.clone(),
        });
        cancel.check()?;
        on_log(&format!("FROM {}", request.base_image));

        if let Some(output) = &state.build_failure {
            return Err(KilnError::BuildExecution {
                message: output.clone(),
            });
        }

        let mut layers = state
            .images
            .get(&request.base_image)
            .map(|base| base.layers.clone())
            .unwrap_or_default();
        layers.push(request.context.write_to(std::io::sink())?.digest);

        let mut labels = request.labels.clone();
        for key in &state.dropped_labels {
            let _ = labels.remove(key);
        }
        let _ = state
            .images
            .insert(request.tag.clone(), ImageInspection { layers, labels });
        on_log(&format!("Successfully tagged {}", request.tag));

        if state.cancel_during_build {
            cancel.cancel();
            return Err(KilnError::Cancelled);
        }
        Ok(())
    }

    fn inspect(&self, image: &str) -> Result<ImageInspection> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Inspect(image.to_string()));
        state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| KilnError::BuildExecution {
                message: format!("no such image: {image}"),
            })
    }

    fn pull(&self, image: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Pull(image.to_string()));
        if state.images.contains_key(image) {
            Ok(())
        } else {
            Err(KilnError::BuildExecution {
                message: format!("pull access denied for {image}"),
            })
        }
    }

    fn remove(&self, image: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Remove(image.to_string()));
        let _ = state.images.remove(image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kiln_image::hash::hash_bytes;

    use super::*;
    use crate::context::{ContextSource, measure};

    fn request(tag: &str, base: &str) -> ImageBuild {
        ImageBuild {
            tag: tag.into(),
            base_image: base.into(),
            dockerfile: ".kiln/Dockerfile".into(),
            context: ContextSource::new(std::env::temp_dir().join("kiln-fake-missing"), "FROM scratch\n"),
            labels: BTreeMap::from([("k".to_string(), "v".to_string())]),
        }
    }

    #[test]
    fn built_image_extends_base_layers() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("predict.py"), "class Predictor: pass\n").expect("write");
        let base_layer = hash_bytes(b"base");
        let engine = RecordingEngine::new().with_image("base:1", vec![base_layer.clone()]);
        let mut request = request("out", "base:1");
        request.context = ContextSource::new(dir.path(), "FROM base:1\n");
        engine
            .build(&request, &CancelToken::new(), &mut |_| {})
            .expect("build");
        let inspection = engine.inspect("out").expect("inspect");
        let context = measure(&request.context).expect("measure");
        assert_eq!(inspection.layers, vec![base_layer, context.digest]);
        assert_eq!(inspection.labels.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn failing_engine_reports_output() {
        let engine = RecordingEngine::new().failing_with("exit status 1");
        let err = engine
            .build(&request("out", "base:1"), &CancelToken::new(), &mut |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("exit status 1"));
        assert!(!engine.has_image("out"));
    }

    #[test]
    fn pull_unknown_image_fails() {
        let engine = RecordingEngine::new();
        assert!(engine.pull("missing:latest").is_err());
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Pull("missing:latest".into())]
        );
    }

    #[test]
    fn dropped_label_is_missing_from_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = RecordingEngine::new().dropping_label("k");
        let mut request = request("out", "base:1");
        request.context = ContextSource::new(dir.path(), "FROM base:1\n");
        engine
            .build(&request, &CancelToken::new(), &mut |_| {})
            .expect("build");
        assert!(engine.inspect("out").expect("inspect").labels.is_empty());
    }
}
