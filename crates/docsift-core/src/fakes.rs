//! In-process predictor fakes for tests and the daemon's demo mode.
//!
//! `ScriptedLoader` hands out [`EchoPredictor`]s whose output is configured
//! per model path, and can be told to fail loads or inference for specific
//! paths. It counts every load so tests can observe cache behaviour.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docsift_state::DocumentType;
use serde_json::Value;

use crate::error::PredictorError;
use crate::predictor::{Predictor, PredictorLoader};

/// Predictor that returns the same JSON for every document.
#[derive(Debug)]
pub struct EchoPredictor {
    output: Value,
    calls: AtomicU64,
}

impl EchoPredictor {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Predictor for EchoPredictor {
    async fn infer(&self, _input: &Path, _document_type: &DocumentType) -> Result<Value, PredictorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.output.clone())
    }
}

/// Predictor whose every call fails.
#[derive(Debug)]
pub struct FailingPredictor {
    message: String,
}

#[async_trait]
impl Predictor for FailingPredictor {
    async fn infer(&self, input: &Path, _document_type: &DocumentType) -> Result<Value, PredictorError> {
        Err(PredictorError::Inference(format!(
            "{} ({})",
            self.message,
            input.display()
        )))
    }
}

#[derive(Debug, Default)]
pub struct ScriptedLoader {
    default_output: Value,
    outputs: HashMap<PathBuf, Value>,
    failing_loads: HashSet<PathBuf>,
    failing_inference: HashSet<PathBuf>,
    loads: AtomicUsize,
}

impl ScriptedLoader {
    /// Loader whose predictors return `default_output` unless overridden.
    pub fn new(default_output: Value) -> Self {
        Self {
            default_output,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, model_path: impl Into<PathBuf>, output: Value) -> Self {
        self.outputs.insert(model_path.into(), output);
        self
    }

    pub fn failing_load(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.failing_loads.insert(model_path.into());
        self
    }

    pub fn failing_inference(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.failing_inference.insert(model_path.into());
        self
    }

    /// Number of `load` calls so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictorLoader for ScriptedLoader {
    async fn load(&self, model_path: &Path) -> Result<Arc<dyn Predictor>, PredictorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing_loads.contains(model_path) {
            return Err(PredictorError::Load {
                path: model_path.display().to_string(),
                reason: "weights missing".to_string(),
            });
        }
        if self.failing_inference.contains(model_path) {
            return Ok(Arc::new(FailingPredictor {
                message: "scripted inference failure".to_string(),
            }));
        }
        let output = self
            .outputs
            .get(model_path)
            .cloned()
            .unwrap_or_else(|| self.default_output.clone());
        Ok(Arc::new(EchoPredictor::new(output)))
    }
}
