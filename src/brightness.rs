//! Display brightness control.
//!
//! The only local hardware side effect the bridge performs. Failures are
//! reported to the caller, which logs them; state is never touched.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrightnessError {
    #[error("Backlight I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid max_brightness value: {0}")]
    InvalidMax(String),
}

/// Clamp a requested percentage into `floor..=100`
pub fn clamp_brightness(value: i64, floor: u8) -> u8 {
    let floor = floor.clamp(1, 100) as i64;
    value.clamp(floor, 100) as u8
}

/// Platform brightness control
#[async_trait]
pub trait BrightnessControl: Send + Sync {
    /// Set brightness as a percentage (already clamped by the caller)
    async fn set_percent(&self, percent: u8) -> Result<(), BrightnessError>;
}

/// Linux sysfs backlight, e.g. `/sys/class/backlight/rpi_backlight`
pub struct SysfsBacklight {
    dir: PathBuf,
}

impl SysfsBacklight {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn max_brightness(&self) -> Result<u32, BrightnessError> {
        let path = self.dir.join("max_brightness");
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| BrightnessError::Io { path, source })?;
        raw.trim()
            .parse()
            .map_err(|_| BrightnessError::InvalidMax(raw.trim().to_string()))
    }
}

#[async_trait]
impl BrightnessControl for SysfsBacklight {
    async fn set_percent(&self, percent: u8) -> Result<(), BrightnessError> {
        let max = self.max_brightness().await?;
        let raw = (max as u64 * percent.min(100) as u64 + 50) / 100;
        let path = self.dir.join("brightness");

        tokio::fs::write(&path, raw.to_string())
            .await
            .map_err(|source| BrightnessError::Io { path, source })?;

        tracing::info!(percent, raw, "Backlight brightness set");
        Ok(())
    }
}

/// Used when no backlight is configured
pub struct NoBacklight;

#[async_trait]
impl BrightnessControl for NoBacklight {
    async fn set_percent(&self, percent: u8) -> Result<(), BrightnessError> {
        tracing::info!(percent, "Brightness requested but no backlight is configured");
        Ok(())
    }
}
