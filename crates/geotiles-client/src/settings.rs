//! Persisted inputs of the last successful fetch.

use std::path::{Path, PathBuf};

use geotiles::{DatasetKind, MaskRecord};
use serde::{Deserialize, Serialize};

/// Settings remembered between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub radius: f64,
    pub dataset: DatasetKind,
    pub snap_to_surface: bool,
    /// Masks applied by the last fetch.
    pub masks: Vec<MaskRecord>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lat: 47.3769,
            lon: 8.5417,
            alt: 0.0,
            radius: 200.0,
            dataset: DatasetKind::GooglePhotorealistic,
            snap_to_surface: true,
            masks: Vec::new(),
        }
    }
}

impl Settings {
    /// `geotiles/settings.toml` under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("geotiles").join("settings.toml"))
    }

    /// Load from a TOML file, falling back to defaults if it is missing or
    /// unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => return settings,
                    Err(e) => tracing::warn!("Failed to parse settings {}: {e}", path.display()),
                },
                Err(e) => tracing::warn!("Failed to read settings {}: {e}", path.display()),
            }
        }
        Self::default()
    }

    /// Save to a TOML file, creating its directory.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            lat: -33.8568,
            lon: 151.2153,
            dataset: DatasetKind::CesiumOsmBuildings,
            masks: vec![MaskRecord::new("0,0,-1,10,10,10").named("plaza")],
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load_or_default(&path), settings);
    }

    #[test]
    fn test_missing_or_broken_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        assert_eq!(Settings::load_or_default(&path), Settings::default());

        std::fs::write(&path, "lat = \"north\"").unwrap();
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "radius = 500.0\ndataset = \"cesium-osm-buildings\"\n").unwrap();

        let settings = Settings::load_or_default(&path);
        assert_eq!(settings.radius, 500.0);
        assert_eq!(settings.dataset, DatasetKind::CesiumOsmBuildings);
        assert_eq!(settings.lat, Settings::default().lat);
    }
}
