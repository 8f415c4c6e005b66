//! Credential exchange with the identity provider.
//!
//! The pipeline needs a single bearer token per run. It is obtained with an
//! OAuth2 client-credentials grant and treated as opaque afterwards; there is
//! no refresh logic, the token is assumed valid for the run's duration.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(***)")
    }
}

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError>;
}

/// Client credentials for the identity provider.
#[derive(Clone)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl ClientCredentials {
    /// Builds credentials from config, failing on the first missing value.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        fn required(value: &Option<String>, name: &'static str) -> Result<String, AuthError> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(AuthError::MissingCredential(name))
        }

        Ok(Self {
            tenant_id: required(&config.tenant_id, "tenant_id")?,
            client_id: required(&config.client_id, "client_id")?,
            client_secret: required(&config.client_secret, "client_secret")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// OAuth2 client-credentials token provider.
pub struct ClientCredentialsProvider {
    credentials: ClientCredentials,
    authority_url: String,
    scope: String,
    http_client: reqwest::Client,
}

impl ClientCredentialsProvider {
    pub fn new(credentials: ClientCredentials, config: &AuthConfig, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            credentials,
            authority_url: config.authority_url.trim_end_matches('/').to_string(),
            scope: config.scope.clone(),
            http_client,
        }
    }

    /// Token endpoint for the configured tenant.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url, self.credentials.tenant_id
        )
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError> {
        let url = self.token_url();
        debug!("Requesting access token from {}", url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self.http_client.post(&url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token = parse_token_response(&body)?;
        info!("Access token acquired for tenant {}", self.credentials.tenant_id);
        Ok(token)
    }
}

/// Extracts the access token from a token endpoint response body.
pub fn parse_token_response(body: &str) -> Result<AccessToken, AuthError> {
    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

    parsed
        .access_token
        .filter(|t| !t.is_empty())
        .map(AccessToken)
        .ok_or(AuthError::MissingToken)
}

/// Provider returning a pre-issued token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub AccessToken);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            tenant_id: Some("contoso".to_string()),
            client_id: Some("app".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_token_response() {
        let token = parse_token_response(r#"{"token_type":"Bearer","access_token":"abc"}"#).unwrap();
        assert_eq!(token.secret(), "abc");
    }

    #[test]
    fn test_parse_token_response_missing_token() {
        let err = parse_token_response(r#"{"token_type":"Bearer"}"#).unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));

        let err = parse_token_response(r#"{"access_token":""}"#).unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[test]
    fn test_parse_token_response_malformed() {
        let err = parse_token_response("<html>").unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[test]
    fn test_credentials_from_config() {
        let creds = ClientCredentials::from_config(&auth_config()).unwrap();
        assert_eq!(creds.tenant_id, "contoso");

        let mut config = auth_config();
        config.client_secret = None;
        let err = ClientCredentials::from_config(&config).unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential("client_secret")));

        config.client_secret = Some(String::new());
        assert!(ClientCredentials::from_config(&config).is_err());
    }

    #[test]
    fn test_token_url() {
        let config = auth_config();
        let creds = ClientCredentials::from_config(&config).unwrap();
        let provider = ClientCredentialsProvider::new(creds, &config, Duration::from_secs(5));
        assert_eq!(
            provider.token_url(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token = AccessToken::new("very-secret");
        assert!(!format!("{:?}", token).contains("very-secret"));
    }

    #[tokio::test]
    async fn test_static_token_provider() {
        let provider = StaticToken(AccessToken::new("t"));
        assert_eq!(provider.fetch_token().await.unwrap().secret(), "t");
    }
}
