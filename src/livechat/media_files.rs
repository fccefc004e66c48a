//! Image upload for the chat.
//!
//! Images are fetched from a URL the user pastes, copied into blob storage under the
//! configured prefix, and handed back with a download URL that can be sent as a
//! message.

use serde::{Deserialize, Serialize};

use crate::livechat::{
    LiveChat,
    error::{LiveChatError, Operation, Result},
};

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// An image copied into blob storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    /// Storage path, `<prefix>/<millis>.jpg`
    pub path: String,
    pub download_url: String,
    pub content_type: String,
}

/// Picks the content type for downloaded bytes: the server's header when it sent a
/// usable one, otherwise whatever the bytes look like, otherwise JPEG.
fn resolve_content_type(header: Option<&str>, data: &[u8]) -> String {
    let declared = header
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "application/octet-stream");
    if let Some(declared) = declared {
        return declared.to_string();
    }
    infer::get(data)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

impl LiveChat {
    /// Downloads the image at `url` and stores a copy.
    ///
    /// # Arguments
    ///
    /// * `url` - Address of the image. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank URL, and a remote error naming the
    /// failed step when the download or the upload fails.
    pub async fn upload_image_from_url(&self, url: &str) -> Result<UploadedImage> {
        let url = url.trim();
        if url.is_empty() {
            return Err(LiveChatError::Validation(
                "Enter an image URL to upload".to_string(),
            ));
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| LiveChatError::remote(Operation::FetchImage, e))?;
        let header = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|e| LiveChatError::remote(Operation::FetchImage, e))?
            .to_vec();

        let content_type = resolve_content_type(header.as_deref(), &data);
        // The clock never repeats, so uploads in the same millisecond get distinct paths
        let path = format!("{}/{}.jpg", self.config.upload_prefix, self.clock.now());

        tracing::debug!(
            target: "livechat::media_files::upload_image_from_url",
            "Uploading {} bytes of {} to {}",
            data.len(),
            content_type,
            path
        );

        self.blobs
            .put(&path, data, &content_type)
            .await
            .map_err(|e| LiveChatError::remote(Operation::UploadImage, e))?;
        let download_url = self
            .blobs
            .download_url(&path)
            .await
            .map_err(|e| LiveChatError::remote(Operation::UploadImage, e))?;

        Ok(UploadedImage {
            path,
            download_url,
            content_type,
        })
    }
}
