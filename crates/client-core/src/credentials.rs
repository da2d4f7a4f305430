//! Stream credentials
//!
//! Credentials identify the stream a client connects to and the identity it
//! connects with. They are validated when stored on a client and snapshotted
//! at connect time; the stored copy can only be replaced while the client is
//! disconnected.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::types::ClientRole;
use crate::error::{ClientError, ClientResult};

/// Director endpoint used for publishing when no `api_url` is given
pub const DEFAULT_PUBLISH_API_URL: &str = "https://director.millicast.com/api/director/publish";

/// Director endpoint used for subscribing when no `api_url` is given
pub const DEFAULT_SUBSCRIBE_API_URL: &str = "https://director.millicast.com/api/director/subscribe";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Name of the stream to publish or view
    pub stream_name: String,

    /// Publishing token, or subscribe token for secured streams
    pub token: Option<String>,

    /// Account owning the stream (subscribers only)
    pub account_id: Option<String>,

    /// Director API endpoint
    pub api_url: String,
}

impl Credentials {
    pub fn publisher(stream_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            token: Some(token.into()),
            account_id: None,
            api_url: DEFAULT_PUBLISH_API_URL.to_string(),
        }
    }

    pub fn subscriber(stream_name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            token: None,
            account_id: Some(account_id.into()),
            api_url: DEFAULT_SUBSCRIBE_API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Check that every field the given role needs is present and well formed
    pub fn validate(&self, role: ClientRole) -> ClientResult<()> {
        if self.stream_name.trim().is_empty() {
            return Err(ClientError::invalid_credentials("stream_name", "must not be empty"));
        }

        if self.api_url.trim().is_empty() {
            return Err(ClientError::invalid_credentials("api_url", "must not be empty"));
        }
        let url = Url::parse(&self.api_url)
            .map_err(|e| ClientError::invalid_credentials("api_url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::invalid_credentials(
                "api_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        match role {
            ClientRole::Publisher => {
                if is_blank(self.token.as_deref()) {
                    return Err(ClientError::invalid_credentials("token", "publishing requires a token"));
                }
            }
            ClientRole::Subscriber => {
                if is_blank(self.account_id.as_deref()) {
                    return Err(ClientError::invalid_credentials("account_id", "subscribing requires an account id"));
                }
            }
        }

        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("stream_name", &self.stream_name)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("account_id", &self.account_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}
