use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use bgw_protocol::openai::chat_completions::request::ChatCompletionRequest;
use bgw_protocol::openai::chat_completions::types::{
    ChatRequestMessage, ContentPart, MessageContent,
};

use crate::error::GatewayError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Downloads http(s) image references and rewrites them to data URLs so
/// the translator stays free of I/O. Data URLs pass through untouched.
pub struct ImageFetcher {
    client: wreq::Client,
}

impl ImageFetcher {
    pub fn new() -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder()
            .connect_timeout(FETCH_TIMEOUT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub async fn inline_remote_images(
        &self,
        request: &mut ChatCompletionRequest,
    ) -> Result<(), GatewayError> {
        for message in &mut request.messages {
            let ChatRequestMessage::User(user) = message else {
                continue;
            };
            let MessageContent::Parts(parts) = &mut user.content else {
                continue;
            };
            for part in parts {
                let ContentPart::ImageUrl { image_url } = part else {
                    continue;
                };
                if image_url.url.starts_with("http://") || image_url.url.starts_with("https://") {
                    image_url.url = self.fetch_as_data_url(&image_url.url).await?;
                }
            }
        }
        Ok(())
    }

    async fn fetch_as_data_url(&self, url: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .request(wreq::Method::GET, url)
            .send()
            .await
            .map_err(|_| GatewayError::InvalidRequest {
                message: format!("image URL could not be fetched: {url}"),
                param: Some("messages.content.image_url".to_string()),
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::InvalidRequest {
                message: format!(
                    "image URL returned status {}: {url}",
                    response.status().as_u16()
                ),
                param: Some("messages.content.image_url".to_string()),
            });
        }

        let media_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|_| GatewayError::InvalidRequest {
                message: format!("image URL body could not be read: {url}"),
                param: Some("messages.content.image_url".to_string()),
            })?;

        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(GatewayError::InvalidRequest {
                message: "fetched image exceeds the 10 MiB limit".to_string(),
                param: Some("messages.content.image_url".to_string()),
            });
        }

        Ok(format!("data:{media_type};base64,{}", BASE64.encode(&bytes)))
    }
}
