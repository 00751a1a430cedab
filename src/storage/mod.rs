//! Storage Layer
//!
//! Locates the configuration and data directories and writes debug images.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "yomiscan", "Yomiscan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Default location of `config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Default directory for debug overlays
pub fn default_debug_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("debug"))
}

/// Save a debug image under a random name, returning its path
pub fn save_debug_image(dir: &Path, image: &RgbImage) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.png", uuid::Uuid::new_v4()));
    image
        .save(&path)
        .with_context(|| format!("Failed to write debug image {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_save_debug_image() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested");
        let image = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));

        let first = save_debug_image(&target, &image).unwrap();
        let second = save_debug_image(&target, &image).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("png"));
        let loaded = image::open(&first).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (8, 4));
        assert_eq!(loaded.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }
}
