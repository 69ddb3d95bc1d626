use std::path::{Path, PathBuf};

use mintforge_core::ImageLayer;
use sha2::{Digest, Sha256};

/// Scratch directory for one project: downloaded layers and rendered output.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(staging_root: &Path, project_id: &str) -> Self {
        Self {
            root: staging_root.join(sanitize(project_id)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a run from an empty staging directory.
    pub async fn prepare(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        self.ensure().await
    }

    /// Make sure the directory tree exists without discarding staged files.
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.root.join("layers")).await?;
        tokio::fs::create_dir_all(self.root.join("output")).await
    }

    pub async fn teardown(&self) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(&self.root).await
    }

    /// Staged file of a layer. Distinct layer ids never share a file, even
    /// when they sanitize to the same stem.
    pub fn layer_path(&self, layer: &ImageLayer) -> PathBuf {
        let extension = Path::new(&layer.bucket_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(sanitize)
            .unwrap_or_else(|| "png".to_string());
        let digest = Sha256::digest(layer.id.as_bytes());
        self.root.join("layers").join(format!(
            "{}-{}.{extension}",
            sanitize(&layer.id),
            hex::encode(&digest[..8])
        ))
    }

    pub fn output_path(&self, composite_group_id: &str, index: u64, extension: &str) -> PathBuf {
        self.root
            .join("output")
            .join(sanitize(composite_group_id))
            .join(format!("{index}.{extension}"))
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
