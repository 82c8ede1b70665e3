use crate::{
    config::ModelConfig,
    labels::{load_labels, ClassLabels},
    ort_service::OrtModelService,
};
use std::path::{Path, PathBuf};

/// Primary location first, then the fallback next to the executable's parent
/// directory. `None` when neither file exists.
pub fn resolve_model_path(model_config: &ModelConfig, exe_dir: Option<&Path>) -> Option<PathBuf> {
    let primary = model_config.get_path();
    if primary.is_file() {
        return Some(primary);
    }
    tracing::debug!("No model at {:?}, trying fallback location", primary);

    exe_dir
        .and_then(|dir| model_config.get_fallback_path(dir))
        .filter(|fallback| fallback.is_file())
}

/// Labels file sitting next to the resolved model, if any.
pub fn labels_for(model_path: &Path, model_config: &ModelConfig) -> Option<ClassLabels> {
    let labels_path = model_path.parent()?.join(&model_config.labels_file);
    if !labels_path.is_file() {
        return None;
    }

    match load_labels(&labels_path) {
        Ok(labels) => {
            tracing::info!("Using class labels from {:?}", labels_path);
            Some(labels)
        }
        Err(e) => {
            tracing::warn!("Ignoring labels file {:?}: {}", labels_path, e);
            None
        }
    }
}

fn current_exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Loads the detection model once at startup. Failure is logged and yields
/// `None` so the server can still report itself unhealthy.
pub fn load_model(model_config: &ModelConfig) -> Option<OrtModelService> {
    let exe_dir = current_exe_dir();
    let Some(model_path) = resolve_model_path(model_config, exe_dir.as_deref()) else {
        tracing::error!(
            "Model file not found at {:?} or in fallback directory {:?}",
            model_config.get_path(),
            model_config.fallback_dir
        );
        return None;
    };

    tracing::info!("Loading model from: {:?}", model_path);
    let labels = labels_for(&model_path, model_config);

    match OrtModelService::new(&model_path, labels, model_config) {
        Ok(service) => {
            tracing::info!("Model loaded successfully");
            Some(service)
        }
        Err(e) => {
            tracing::error!("Failed to load model from {:?}: {}", model_path, e);
            None
        }
    }
}
