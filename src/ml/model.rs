use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;

use super::{
    ensemble::{Ensemble, Hyperparameters},
    features::{Preprocessor, Raw},
    metrics::Metrics,
    ModelKind,
};
use crate::db::ModelId;

/// Everything needed to make a prediction, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TrainedModel {
    pub kind: ModelKind,
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub training_data_size: usize,
    pub hyperparameters: Hyperparameters,
    pub metrics: Metrics,
    pub feature_importance: BTreeMap<String, f64>,
    pub preprocessor: Preprocessor,
    pub ensemble: Ensemble,
}

impl TrainedModel {
    pub fn predict(&self, raw: &[Raw]) -> f64 {
        let row = self.preprocessor.transform(raw);
        self.ensemble.predict(&row)
    }

    pub fn confidence(&self) -> f64 {
        self.metrics.test_r2.clamp(0.0, 1.0)
    }

    pub fn file_path(model_dir: &Path, kind: ModelKind, version: &str) -> PathBuf {
        let name = kind.name();
        model_dir.join(name).join(format!("{name}_v{version}.json"))
    }

    pub async fn save(&self, path: &Path) -> ModelFileResult<()> {
        use model_file_error::*;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.context(CreateDirSnafu { path: dir })?;
        }
        let json = serde_json::to_vec(self).context(SerializeSnafu)?;
        fs::write(path, json).await.context(WriteSnafu { path })?;

        Ok(())
    }

    pub async fn load(path: &Path) -> ModelFileResult<Self> {
        use model_file_error::*;

        let json = fs::read(path).await.context(ReadSnafu { path })?;
        serde_json::from_slice(&json).context(DeserializeSnafu { path })
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub(crate) enum ModelFileError {
    #[snafu(display("Could not create the model directory {}", path.display()))]
    CreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Could not serialize the model"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("Could not write the model file {}", path.display()))]
    Write {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Could not read the model file {}", path.display()))]
    Read {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("The model file {} is corrupt", path.display()))]
    Deserialize {
        source: serde_json::Error,
        path: PathBuf,
    },
}

pub(crate) type ModelFileResult<T, E = ModelFileError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub(crate) struct LoadedModel {
    pub id: ModelId,
    pub model: Arc<TrainedModel>,
}

/// Active models that have already been read from disk.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModelStore(Arc<Mutex<BTreeMap<ModelKind, LoadedModel>>>);

impl ModelStore {
    pub fn get(&self, kind: ModelKind) -> Option<LoadedModel> {
        self.0.lock().get(&kind).cloned()
    }

    pub fn insert(&self, kind: ModelKind, loaded: LoadedModel) {
        self.0.lock().insert(kind, loaded);
    }

    pub fn evict(&self, kind: ModelKind) {
        self.0.lock().remove(&kind);
    }
}
