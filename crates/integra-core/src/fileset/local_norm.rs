use std::path::Path;

use serde::{Deserialize, Serialize};

use super::surface::GridSurface;
use crate::error::{IntegraError, Result};

/// Per-pixel normalization function `v' = scale(x, y)·v + offset(x, y)` for one
/// input frame, produced by an external local normalization stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalNormalizationData {
    pub channels: Vec<LocalNormalizationChannel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalNormalizationChannel {
    pub scale: GridSurface,
    pub offset: GridSurface,
}

impl LocalNormalizationData {
    /// Load a TOML sidecar.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            IntegraError::Config(format!(
                "{}: invalid local normalization data: {e}",
                path.display()
            ))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| IntegraError::Config(format!("local normalization data: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The data must describe a frame with this geometry.
    pub fn validate(&self, path: &Path, width: usize, height: usize, channels: usize) -> Result<()> {
        let matches = self.channels.len() == channels
            && self.channels.iter().all(|c| {
                c.scale.width == width
                    && c.scale.height == height
                    && c.offset.width == width
                    && c.offset.height == height
            });
        if matches {
            Ok(())
        } else {
            Err(IntegraError::IncompatibleGeometry {
                path: path.to_path_buf(),
            })
        }
    }

    pub fn normalize(&self, value: f64, x: usize, y: usize, channel: usize) -> f64 {
        let c = &self.channels[channel];
        c.scale.at(x, y) * value + c.offset.at(x, y)
    }
}
