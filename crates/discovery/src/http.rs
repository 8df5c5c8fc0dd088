use crate::limits::MAX_RESPONSE_BYTES;
use crate::safety::redirect_policy;
use crate::{DiscoveryError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Outbound client shared by the API collectors.
#[derive(Clone, Debug)]
pub struct BackendClient {
    client: Client,
    max_body: usize,
}

impl BackendClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy())
            .build()?;
        Ok(Self {
            client,
            max_body: MAX_RESPONSE_BYTES,
        })
    }

    #[must_use]
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends the request and decodes a size-capped JSON body.
    ///
    /// 401/403 map to [`DiscoveryError::Auth`], any other non-2xx status to
    /// [`DiscoveryError::Status`].
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let mut response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DiscoveryError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body as u64 {
                return Err(DiscoveryError::ResponseTooLarge {
                    limit: self.max_body,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body {
                return Err(DiscoveryError::ResponseTooLarge {
                    limit: self.max_body,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}
