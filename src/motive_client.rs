use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::driver_names::DriverDirectory;

pub const DEFAULT_MOTIVE_API_BASE_URL: &str = "https://api.keeptruckin.com";

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: MotiveUser,
}

#[derive(Debug, Deserialize)]
struct MotiveUser {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl MotiveUser {
    fn display_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }
}

/// Client for the Motive fleet API, used to look up driver names
#[derive(Clone)]
pub struct MotiveClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl MotiveClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Fetch a driver's display name (`first_name last_name`)
    pub async fn fetch_driver_name(&self, driver_id: i64) -> Result<String> {
        debug!(driver_id, "Fetching driver from Motive API");

        let url = format!("{}/v1/users/{}", self.base_url, driver_id);

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to send request to Motive API")?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by Motive API");
            return Err(anyhow!("Rate limited by Motive API"));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Motive API error {}: {}", status, body));
        }

        let user: UserResponse = response
            .json()
            .await
            .context("Failed to parse Motive user response")?;

        user.user
            .display_name()
            .ok_or_else(|| anyhow!("Motive user {} has no name", driver_id))
    }
}

impl std::fmt::Debug for MotiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotiveClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl DriverDirectory for MotiveClient {
    async fn driver_name(&self, driver_id: i64) -> Result<String> {
        self.fetch_driver_name(driver_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: Option<&str>, last: Option<&str>) -> MotiveUser {
        MotiveUser {
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
        }
    }

    #[test]
    fn test_display_name_joins_first_and_last() {
        assert_eq!(
            user(Some("Jane"), Some("Doe")).display_name().as_deref(),
            Some("Jane Doe")
        );
    }

    #[test]
    fn test_display_name_skips_blank_parts() {
        assert_eq!(
            user(Some("  "), Some("Doe ")).display_name().as_deref(),
            Some("Doe")
        );
        assert_eq!(user(None, None).display_name(), None);
    }

    #[test]
    fn test_parse_user_response() {
        let body = r#"{"user":{"id":101,"first_name":"Jane","last_name":"Doe","role":"driver"}}"#;
        let parsed: UserResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.user.display_name().as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = MotiveClient::new(Client::new(), "https://example.test/", "secret-key");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("https://example.test"));
    }
}
