use std::path::Path;

use anyhow::Context;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;

/// Registers the process-wide execution provider. Call once, before loading sessions.
///
/// Returns the provider name for logging. Requesting `cuda` may silently
/// fall back to cpu if the runtime was built without it.
pub fn init_execution_provider(cuda: bool) -> anyhow::Result<&'static str> {
    let (ep, ep_name) = if cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };
    ort::init().with_execution_providers([ep]).commit()?;
    Ok(ep_name)
}

/// Loads an onnx model file with full graph optimisations.
pub fn load_session(model: &Path) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model)
        .with_context(|| format!("Failed to load onnx model {model:?}"))?;
    log::debug!("{session:?}");
    Ok(session)
}
