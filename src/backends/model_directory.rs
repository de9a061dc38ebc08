use crate::config::ModelConfig;
use crate::error::ServiceError;
use crate::services::{ModelEntry, ModelRegistry, ModelSelection};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Model inventory over a local folder of model files.
///
/// The selection comes from the `[models]` config section; every regular
/// file in `models.directory` counts as an available model.
pub struct ModelDirectory {
    config: ModelConfig,
}

impl ModelDirectory {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.config.directory)
    }
}

fn non_empty(name: &str) -> Option<String> {
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl ModelRegistry for ModelDirectory {
    async fn get_config(&self) -> Result<ModelSelection, ServiceError> {
        Ok(ModelSelection {
            text_model: non_empty(&self.config.text_model),
            embedding_model: non_empty(&self.config.embedding_model),
            vision_model: non_empty(&self.config.vision_model),
            vision_projector: non_empty(&self.config.vision_projector),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelEntry>, ServiceError> {
        let path = self.path();
        let inventory_error = |e: std::io::Error| ServiceError::Inventory {
            message: format!("{}: {}", path.display(), e),
        };

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Model directory {} does not exist", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(inventory_error(e)),
        };

        let mut models = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(inventory_error)? {
            let file_type = entry.file_type().await.map_err(inventory_error)?;
            if !file_type.is_file() {
                continue;
            }

            models.push(ModelEntry {
                name: None,
                filename: Some(entry.file_name().to_string_lossy().into_owned()),
            });
        }

        models.sort_by(|a, b| a.filename.cmp(&b.filename));
        debug!("Found {} model files in {}", models.len(), path.display());
        Ok(models)
    }
}
