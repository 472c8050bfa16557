//! Image uploads.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use parksense_protocol::image::{decode_image_payload, image_filename};
use parksense_protocol::{ProtocolError, Reply};

use crate::store::{ImageStore, StoreError};

#[derive(Debug, thiserror::Error)]
enum ImageError {
    #[error(transparent)]
    Decode(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An image written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedImage {
    pub filename: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Decodes `IMAGE:` payloads and persists them.
pub struct ImageHandler {
    store: Arc<dyn ImageStore>,
}

impl ImageHandler {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self { store }
    }

    /// Always answers: a saved image yields `success`, anything else an
    /// `error` reply carrying the cause.
    pub async fn handle(&self, peer_addr: SocketAddr, payload: &str) -> Reply {
        match self.save(peer_addr, payload).await {
            Ok(saved) => {
                tracing::info!(
                    %peer_addr,
                    path = %saved.path.display(),
                    size = saved.size,
                    "image saved"
                );
                Reply::image_saved(saved.filename, saved.size)
            }
            Err(e) => {
                tracing::warn!(%peer_addr, "image rejected: {e}");
                Reply::error(e.to_string())
            }
        }
    }

    async fn save(&self, peer_addr: SocketAddr, payload: &str) -> Result<SavedImage, ImageError> {
        let bytes = decode_image_payload(payload)?;
        let filename = image_filename(&Local::now(), peer_addr.ip());
        let path = self.store.save(&filename, &bytes).await?;

        Ok(SavedImage {
            filename,
            path,
            size: bytes.len(),
        })
    }
}
