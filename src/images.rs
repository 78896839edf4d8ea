use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ImageHostConfig;

const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, thiserror::Error)]
pub enum ImageUploadError {
    #[error("image payload is not valid base64")]
    InvalidPayload,
    #[error("image upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image host rejected upload: {0}")]
    Rejected(String),
}

pub trait ImageHost: Send + Sync {
    /// Uploads an image given as a `data:` URI and returns its hosted HTTPS URL.
    fn upload<'a>(&'a self, data_uri: &'a str) -> BoxFuture<'a, Result<String, ImageUploadError>>;
}

/// Normalises client-supplied base64 into a JPEG data URI, checking that the
/// payload actually decodes. Input that is already a data URI keeps its
/// media type.
pub fn to_data_uri(image_base64: &str) -> Result<String, ImageUploadError> {
    let trimmed = image_base64.trim();
    let (uri, payload) = match trimmed.split_once(";base64,") {
        Some((_, payload)) if trimmed.starts_with("data:") => (trimmed.to_string(), payload),
        _ => (format!("{JPEG_DATA_URI_PREFIX}{trimmed}"), trimmed),
    };

    if payload.is_empty() || STANDARD.decode(payload).is_err() {
        return Err(ImageUploadError::InvalidPayload);
    }
    Ok(uri)
}

/// Signs an upload request with the account secret as the image host expects:
/// hex SHA-256 over the sorted `key=value` pairs followed by the secret.
pub fn sign_params(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct UploadErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    error: Option<UploadErrorBody>,
}

pub struct CloudinaryClient {
    client: reqwest::Client,
    config: ImageHostConfig,
}

impl CloudinaryClient {
    pub fn new(client: reqwest::Client, config: ImageHostConfig) -> Self {
        Self { client, config }
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.cloud_name)
        )
    }

    async fn post_upload(&self, data_uri: &str) -> Result<String, ImageUploadError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign_params(&[("timestamp", timestamp.clone())], &self.config.api_secret);

        let form = [
            ("file", data_uri),
            ("api_key", self.config.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature_algorithm", "sha256"),
            ("signature", signature.as_str()),
        ];

        let response: UploadResponse = self
            .client
            .post(self.upload_url())
            .form(&form)
            .send()
            .await?
            .json()
            .await?;

        match (response.secure_url, response.error) {
            (_, Some(error)) => Err(ImageUploadError::Rejected(error.message)),
            (Some(url), None) => {
                debug!("Uploaded route image to {}", url);
                Ok(url)
            }
            (None, None) => Err(ImageUploadError::Rejected(
                "response carried no secure_url".to_string(),
            )),
        }
    }
}

impl ImageHost for CloudinaryClient {
    fn upload<'a>(&'a self, data_uri: &'a str) -> BoxFuture<'a, Result<String, ImageUploadError>> {
        Box::pin(self.post_upload(data_uri))
    }
}
