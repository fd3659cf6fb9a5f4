use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stochastic_predictor::{DropoutMlp, ModelSpec};
use uq_core::{ImageBatch, ImageShape};

/// On-disk image set: flattened row-major images normalized to [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub height: usize,
    pub width: usize,
    pub images: Vec<Vec<f64>>,
}

impl DatasetFile {
    pub fn into_batch(self) -> Result<ImageBatch> {
        let shape = ImageShape::new(self.height, self.width);
        ImageBatch::from_images(shape, &self.images).context("invalid dataset images")
    }

    pub fn from_batch(batch: &ImageBatch) -> Self {
        let shape = batch.shape();
        Self {
            height: shape.height,
            width: shape.width,
            images: (0..batch.len()).map(|i| batch.image(i)).collect(),
        }
    }
}

pub fn load_dataset(path: &Path) -> Result<ImageBatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let file: DatasetFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse dataset {}", path.display()))?;
    let batch = file.into_batch()?;
    tracing::info!(
        "Loaded {} images of shape {} from {}",
        batch.len(),
        batch.shape(),
        path.display()
    );
    Ok(batch)
}

pub fn load_model(path: &Path) -> Result<DropoutMlp> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model {}", path.display()))?;
    let spec: ModelSpec = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse model {}", path.display()))?;
    let model = DropoutMlp::from_spec(&spec)
        .with_context(|| format!("invalid model {}", path.display()))?;
    tracing::info!("Loaded {}-layer model from {}", model.num_layers(), path.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_json_into_batch() {
        let json = r#"{ "height": 1, "width": 3, "images": [[0.0, 0.5, 1.0], [0.2, 0.2, 0.2]] }"#;
        let file: DatasetFile = serde_json::from_str(json).unwrap();
        let batch = file.into_batch().unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.shape(), ImageShape::new(1, 3));
        assert_eq!(DatasetFile::from_batch(&batch).images[0], vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_malformed_dataset_is_rejected() {
        let file = DatasetFile {
            height: 2,
            width: 2,
            images: vec![vec![0.1, 0.2, 0.3]],
        };
        assert!(file.into_batch().is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = std::env::temp_dir().join(format!("uq-runner-dataset-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dataset.json");
        std::fs::write(&path, r#"{ "height": 1, "width": 2, "images": [[0.3, 0.7]] }"#).unwrap();

        let batch = load_dataset(&path).unwrap();
        assert_eq!(batch.image(0), vec![0.3, 0.7]);

        assert!(load_model(&dir.join("missing.json")).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
