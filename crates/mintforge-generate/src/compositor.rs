use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage, imageops};

use crate::errors::CompositeError;

/// Renders an ordered stack of layer files into one raster.
pub trait Compositor: Send + Sync {
    /// `layers` is bottom-to-top; `None` entries are skipped.
    fn composite(&self, layers: &[Option<PathBuf>], output: &Path) -> Result<(), CompositeError>;
}

/// Alpha-over compositor for PNG layers.
///
/// The canvas takes the size of the bottom-most layer; every other layer is
/// drawn at the origin. A single layer is converted and copied as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCompositor;

impl Compositor for ImageCompositor {
    fn composite(&self, layers: &[Option<PathBuf>], output: &Path) -> Result<(), CompositeError> {
        let mut paths = layers.iter().flatten();
        let Some(first) = paths.next() else {
            return Err(CompositeError::NoLayers);
        };

        let mut canvas: RgbaImage = image::open(first)?.to_rgba8();
        for path in paths {
            let layer = image::open(path)?.to_rgba8();
            imageops::overlay(&mut canvas, &layer, 0, 0);
        }

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        canvas.save_with_format(output, ImageFormat::Png)?;
        Ok(())
    }
}
