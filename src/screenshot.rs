//! Screenshot Pipeline
//!
//! request (MQTT button or HTTP) → capture by a browser → store → republish.
//! A request with no browser connected is dropped, never queued.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use thiserror::Error;

use crate::mqtt::StatePublisher;
use crate::state::{ScreenshotRecord, ScreenshotStore};
use crate::websocket::{ConnectionHub, ServerMessage};

const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Errors decoding a pushed screenshot
#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("Empty image payload")]
    Empty,

    #[error("Malformed data URL")]
    MalformedDataUrl,

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Binary image plus its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Decode a raw base64 image or a `data:<mime>;base64,<payload>` URL
pub fn decode_image(image: &str) -> Result<DecodedImage, ImageDecodeError> {
    let image = image.trim();
    if image.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let (content_type, payload) = match image.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or(ImageDecodeError::MalformedDataUrl)?;
            let mime = header.split(';').next().unwrap_or_default();
            let mime = if mime.is_empty() { DEFAULT_CONTENT_TYPE } else { mime };
            (mime.to_string(), payload)
        }
        None => (DEFAULT_CONTENT_TYPE.to_string(), image),
    };

    let bytes = BASE64.decode(payload.trim())?;
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    Ok(DecodedImage {
        bytes,
        content_type,
    })
}

/// Coordinates capture requests and captured images
pub struct ScreenshotPipeline {
    hub: Arc<ConnectionHub>,
    store: Arc<ScreenshotStore>,
    publisher: Option<Arc<dyn StatePublisher>>,
}

impl ScreenshotPipeline {
    pub fn new(
        hub: Arc<ConnectionHub>,
        store: Arc<ScreenshotStore>,
        publisher: Option<Arc<dyn StatePublisher>>,
    ) -> Self {
        Self {
            hub,
            store,
            publisher,
        }
    }

    /// Ask connected browsers for a screenshot.
    ///
    /// Returns false when nobody is connected; the request is then lost.
    pub async fn request_capture(&self) -> bool {
        if self.hub.connection_count().await == 0 {
            tracing::info!("Screenshot requested but no dashboard is connected");
            return false;
        }

        let report = self
            .hub
            .broadcast_message(&ServerMessage::ScreenshotRequest)
            .await;
        tracing::info!(clients = report.delivered, "Screenshot requested");
        report.delivered > 0
    }

    /// Replace the stored screenshot and republish it over MQTT
    pub async fn store_and_publish(&self, image: &str) -> Result<(), ImageDecodeError> {
        let decoded = decode_image(image)?;
        let record = ScreenshotRecord::new(decoded.bytes, decoded.content_type);
        let bytes = Arc::clone(&record.image);

        self.store.replace(record);
        tracing::info!(size = bytes.len(), "Screenshot stored");

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish_screenshot_bytes(&bytes).await {
                tracing::warn!(error = %e, "Failed to publish screenshot");
            }
        }
        Ok(())
    }
}
