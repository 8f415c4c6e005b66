//! DNS enrichment and suppression.
//!
//! Maps each destination identifier to a [`DnsVerdict`] using passive-DNS
//! evidence:
//! - no usable response, or an empty evidence list → `Failed`
//! - any evidence hostname matching the suppression pattern → `Suppressed`
//! - otherwise the most recently seen hostname → `Resolved`
//!
//! Suppression takes precedence over recency so that traffic to known
//! infrastructure (proxies, VPN concentrators) is dropped even if some other
//! hostname was observed later.
//!
//! Verdicts are memoized in a run-scoped [`DnsCache`]; each distinct
//! destination costs at most one lookup per run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::auth::AccessToken;
use crate::error::LookupError;
use crate::passive_dns::{EvidenceRecord, PassiveDnsSource};

/// Reason attached to a successful response without evidence.
pub const NO_EVIDENCE_REASON: &str = "no DNS resolution evidence";

/// Hostname reported when the winning evidence record has no artifact id.
pub const UNKNOWN_HOSTNAME: &str = "Unknown hostname";

/// Default suppression pattern.
pub const DEFAULT_SUPPRESSION_SUBSTRING: &str = "zpath.net";

/// Enrichment outcome for one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum DnsVerdict {
    Resolved { hostname: String },
    Suppressed { reason: String },
    Failed { reason: String },
}

impl DnsVerdict {
    pub fn hostname(&self) -> Option<&str> {
        match self {
            Self::Resolved { hostname } => Some(hostname),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

impl std::fmt::Display for DnsVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved { hostname } => write!(f, "resolved ({})", hostname),
            Self::Suppressed { reason } => write!(f, "suppressed ({})", reason),
            Self::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// How the suppression pattern is matched against evidence hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionMatch {
    /// Pattern appears anywhere in the hostname.
    #[default]
    Substring,
    /// Hostname equals the pattern or ends with `.<pattern>`.
    Suffix,
}

impl std::fmt::Display for SuppressionMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Substring => write!(f, "substring"),
            Self::Suffix => write!(f, "suffix"),
        }
    }
}

impl std::str::FromStr for SuppressionMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "substring" => Ok(Self::Substring),
            "suffix" => Ok(Self::Suffix),
            _ => Err(format!("Unknown suppression match mode: {}", s)),
        }
    }
}

/// Denylist rule for known-benign infrastructure hostnames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionRule {
    pattern: String,
    mode: SuppressionMatch,
}

impl SuppressionRule {
    pub fn new(pattern: &str, mode: SuppressionMatch) -> Self {
        Self {
            pattern: pattern.trim().trim_matches('.').to_lowercase(),
            mode,
        }
    }

    /// A rule that never matches.
    pub fn disabled() -> Self {
        Self::new("", SuppressionMatch::Substring)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true when `hostname` belongs to suppressed infrastructure.
    pub fn matches(&self, hostname: &str) -> bool {
        if self.pattern.is_empty() {
            return false;
        }

        let hostname = hostname.trim_end_matches('.').to_lowercase();
        match self.mode {
            SuppressionMatch::Substring => hostname.contains(&self.pattern),
            SuppressionMatch::Suffix => {
                hostname == self.pattern
                    || hostname
                        .strip_suffix(&self.pattern)
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        }
    }
}

impl Default for SuppressionRule {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSION_SUBSTRING, SuppressionMatch::Substring)
    }
}

fn parse_last_seen(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

/// Picks the evidence record with the latest last-seen time.
///
/// Parsed timestamps outrank malformed or empty ones. Ties keep the earliest
/// record in response order.
pub fn most_recent(evidence: &[EvidenceRecord]) -> Option<&EvidenceRecord> {
    let mut best: Option<(Option<DateTime<FixedOffset>>, &EvidenceRecord)> = None;

    for record in evidence {
        let seen = parse_last_seen(&record.last_seen);
        if seen.is_none() && !record.last_seen.is_empty() {
            trace!("Unparseable lastSeen '{}' for {}", record.last_seen, record.artifact_id);
        }

        let replace = match &best {
            Some((best_seen, _)) => seen > *best_seen,
            None => true,
        };
        if replace {
            best = Some((seen, record));
        }
    }

    best.map(|(_, record)| record)
}

/// Classifies passive-DNS evidence into a verdict.
pub fn classify_evidence(evidence: &[EvidenceRecord], rule: &SuppressionRule) -> DnsVerdict {
    if evidence.is_empty() {
        return DnsVerdict::Failed {
            reason: NO_EVIDENCE_REASON.to_string(),
        };
    }

    if evidence.iter().any(|r| rule.matches(&r.artifact_id)) {
        return DnsVerdict::Suppressed {
            reason: format!("contains {}", rule.pattern()),
        };
    }

    match most_recent(evidence) {
        Some(record) => {
            let hostname = record.artifact_id.trim();
            DnsVerdict::Resolved {
                hostname: if hostname.is_empty() {
                    UNKNOWN_HOSTNAME.to_string()
                } else {
                    hostname.to_string()
                },
            }
        }
        None => DnsVerdict::Failed {
            reason: NO_EVIDENCE_REASON.to_string(),
        },
    }
}

/// Classifies the outcome of a lookup.
pub fn classify_lookup(
    result: Result<Vec<EvidenceRecord>, LookupError>,
    rule: &SuppressionRule,
) -> DnsVerdict {
    match result {
        Ok(evidence) => classify_evidence(&evidence, rule),
        Err(e) => DnsVerdict::Failed {
            reason: e.to_string(),
        },
    }
}

/// Verdict counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerdictCounts {
    pub resolved: usize,
    pub suppressed: usize,
    pub failed: usize,
}

impl VerdictCounts {
    pub fn tally<'a, I>(verdicts: I) -> Self
    where
        I: IntoIterator<Item = &'a DnsVerdict>,
    {
        let mut counts = Self::default();
        for verdict in verdicts {
            match verdict {
                DnsVerdict::Resolved { .. } => counts.resolved += 1,
                DnsVerdict::Suppressed { .. } => counts.suppressed += 1,
                DnsVerdict::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}

/// Run-scoped memo of verdicts keyed by destination identifier.
#[derive(Debug, Default)]
pub struct DnsCache {
    verdicts: HashMap<String, DnsVerdict>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination: &str) -> Option<&DnsVerdict> {
        self.verdicts.get(destination)
    }

    pub fn contains(&self, destination: &str) -> bool {
        self.verdicts.contains_key(destination)
    }

    /// Records a verdict. The first verdict for a destination wins.
    pub fn insert(&mut self, destination: String, verdict: DnsVerdict) {
        if self.verdicts.contains_key(&destination) {
            warn!("Duplicate verdict for {} ignored", destination);
            return;
        }
        self.verdicts.insert(destination, verdict);
    }

    pub fn hostname(&self, destination: &str) -> Option<&str> {
        self.get(destination).and_then(DnsVerdict::hostname)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn counts(&self) -> VerdictCounts {
        VerdictCounts::tally(self.verdicts.values())
    }
}

/// Resolves destinations against a passive-DNS source.
pub struct DnsResolver {
    source: Arc<dyn PassiveDnsSource>,
    token: AccessToken,
    rule: SuppressionRule,
    max_concurrent: usize,
}

impl DnsResolver {
    pub fn new(
        source: Arc<dyn PassiveDnsSource>,
        token: AccessToken,
        rule: SuppressionRule,
        max_concurrent: usize,
    ) -> Self {
        Self {
            source,
            token,
            rule,
            max_concurrent: max_concurrent.max(1),
        }
    }

    async fn lookup_verdict(&self, destination: &str) -> DnsVerdict {
        let verdict = classify_lookup(self.source.lookup(destination, &self.token).await, &self.rule);
        debug!("{} -> {}", destination, verdict);
        verdict
    }

    /// Resolves one destination, consulting the cache first.
    pub async fn resolve(&self, destination: &str, cache: &mut DnsCache) -> DnsVerdict {
        if let Some(verdict) = cache.get(destination) {
            trace!("Cache hit for {}", destination);
            return verdict.clone();
        }

        let verdict = self.lookup_verdict(destination).await;
        cache.insert(destination.to_string(), verdict.clone());
        verdict
    }

    /// Resolves every distinct, uncached destination with bounded concurrency.
    ///
    /// Returns the number of lookups issued.
    pub async fn resolve_all<I, S>(&self, destinations: I, cache: &mut DnsCache) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pending: BTreeSet<String> = destinations
            .into_iter()
            .map(|d| d.as_ref().to_string())
            .filter(|d| !cache.contains(d))
            .collect();

        let issued = pending.len();
        if issued == 0 {
            return 0;
        }

        debug!(
            "Resolving {} destinations ({} concurrent)",
            issued, self.max_concurrent
        );

        let verdicts: Vec<(String, DnsVerdict)> = stream::iter(pending)
            .map(|destination| async move {
                let verdict = self.lookup_verdict(&destination).await;
                (destination, verdict)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for (destination, verdict) in verdicts {
            cache.insert(destination, verdict);
        }

        issued
    }
}
