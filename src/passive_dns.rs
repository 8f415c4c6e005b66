//! Passive-DNS threat intelligence client.
//!
//! Queries the Microsoft Graph threat-intelligence API for historical
//! hostname resolutions observed for a destination identifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::auth::AccessToken;
use crate::error::LookupError;

/// Default Graph API base used for passive-DNS lookups.
pub const DEFAULT_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// One passive-DNS observation for a destination.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvidenceRecord {
    /// Hostname the destination was observed resolving from.
    pub artifact_id: String,
    /// Raw last-seen timestamp as reported by the service.
    pub last_seen: String,
}

impl EvidenceRecord {
    pub fn new(artifact_id: impl Into<String>, last_seen: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            last_seen: last_seen.into(),
        }
    }
}

/// Source of passive-DNS evidence.
#[async_trait]
pub trait PassiveDnsSource: Send + Sync {
    async fn lookup(
        &self,
        destination: &str,
        token: &AccessToken,
    ) -> Result<Vec<EvidenceRecord>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct PassiveDnsResponse {
    #[serde(default)]
    value: Vec<PassiveDnsEntry>,
}

#[derive(Debug, Deserialize)]
struct PassiveDnsEntry {
    #[serde(default)]
    artifact: Option<Artifact>,
    #[serde(default, rename = "lastSeenDateTime")]
    last_seen_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    #[serde(default)]
    id: Option<String>,
}

/// Parses a passive-DNS response body.
pub fn parse_passive_dns_body(body: &str) -> Result<Vec<EvidenceRecord>, LookupError> {
    let response: PassiveDnsResponse =
        serde_json::from_str(body).map_err(|e| LookupError::Parse(e.to_string()))?;

    Ok(evidence_from_response(response))
}

fn evidence_from_response(response: PassiveDnsResponse) -> Vec<EvidenceRecord> {
    response
        .value
        .into_iter()
        .map(|entry| EvidenceRecord {
            artifact_id: entry.artifact.and_then(|a| a.id).unwrap_or_default(),
            last_seen: entry.last_seen_date_time.unwrap_or_default(),
        })
        .collect()
}

/// HTTP client for the Graph passive-DNS endpoint.
pub struct GraphPassiveDns {
    base_url: String,
    http_client: reqwest::Client,
}

impl GraphPassiveDns {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// Endpoint URL for one destination, with the identifier percent-encoded
    /// as a single path segment.
    pub fn lookup_url(&self, destination: &str) -> Result<reqwest::Url, LookupError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| LookupError::Transport(format!("invalid API base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| LookupError::Transport(format!("invalid API base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend([
                "security",
                "threatIntelligence",
                "hosts",
                destination,
                "passiveDns",
            ]);

        Ok(url)
    }
}

#[async_trait]
impl PassiveDnsSource for GraphPassiveDns {
    async fn lookup(
        &self,
        destination: &str,
        token: &AccessToken,
    ) -> Result<Vec<EvidenceRecord>, LookupError> {
        let url = self.lookup_url(destination)?;
        trace!("GET {}", url);

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!("Passive DNS for {} returned {}", destination, status);
            return Err(LookupError::Status(status.as_u16()));
        }

        let body: PassiveDnsResponse = response.json().await?;
        Ok(evidence_from_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_passive_dns_body() {
        let body = r#"{
            "@odata.context": "ignored",
            "value": [
                {
                    "id": "abc",
                    "firstSeenDateTime": "2023-01-01T00:00:00Z",
                    "lastSeenDateTime": "2024-03-05T12:00:00Z",
                    "artifact": {"id": "cdn.example.com"}
                },
                {"artifact": {}}
            ]
        }"#;

        let records = parse_passive_dns_body(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            EvidenceRecord::new("cdn.example.com", "2024-03-05T12:00:00Z")
        );
        assert_eq!(records[1], EvidenceRecord::default());
    }

    #[test]
    fn test_parse_missing_value_is_empty() {
        assert!(parse_passive_dns_body("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed_body() {
        let err = parse_passive_dns_body("not json").unwrap_err();
        assert!(matches!(err, LookupError::Parse(_)));
    }

    #[test]
    fn test_lookup_url() {
        let client = GraphPassiveDns::new("https://graph.microsoft.com/v1.0/", Duration::from_secs(1));
        assert_eq!(
            client.lookup_url("203.0.113.9").unwrap().as_str(),
            "https://graph.microsoft.com/v1.0/security/threatIntelligence/hosts/203.0.113.9/passiveDns"
        );
    }

    #[test]
    fn test_lookup_url_encodes_destination() {
        let client = GraphPassiveDns::new(DEFAULT_API_BASE_URL, Duration::from_secs(1));
        let url = client.lookup_url("../admin?x=1#frag").unwrap();

        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(
            url.path_segments().map(|s| s.count()),
            Some(6),
            "destination must stay one path segment: {}",
            url
        );
        assert!(url.path().ends_with("/passiveDns"));
        assert!(url.path().starts_with("/v1.0/security/threatIntelligence/hosts/"));
    }

    #[test]
    fn test_lookup_url_invalid_base() {
        let client = GraphPassiveDns::new("not a url", Duration::from_secs(1));
        assert!(matches!(
            client.lookup_url("1.2.3.4"),
            Err(LookupError::Transport(_))
        ));
    }

    #[test]
    fn test_status_error_message() {
        assert_eq!(
            LookupError::Status(404).to_string(),
            "DNS resolution failed with status code 404"
        );
    }
}
