//! Batch triage pipeline.
//!
//! ```text
//! Ingested → Scored → Filtered → Deduplicated → Resolved → Joined → Ranked → Emitted
//! ```
//!
//! Every stage is a pure transformation except `Resolved`, which performs
//! passive-DNS lookups. A failed or suppressed destination only removes its
//! own records from the later stages; it never aborts the run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzer::{AnomalyFilter, AnomalyScorer, ScoredRecord};
use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::Result;
use crate::flow::FlowRecord;
use crate::passive_dns::PassiveDnsSource;
use crate::resolver::{DnsCache, DnsResolver, VerdictCounts};

/// A scored record whose destination resolved to a hostname.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub record: FlowRecord,
    pub z_score: f64,
    pub hostname: String,
}

/// One row of the emitted report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub source: String,
    pub destination: String,
    pub metric: f64,
    pub z_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl From<EnrichedRecord> for Finding {
    fn from(enriched: EnrichedRecord) -> Self {
        Self {
            source: enriched.record.source,
            destination: enriched.record.destination,
            metric: enriched.record.metric,
            z_score: enriched.z_score,
            hostname: Some(enriched.hostname),
            extra: enriched.record.extra,
        }
    }
}

impl Finding {
    /// Report row for an un-enriched candidate. `None` if the score is undefined.
    pub fn from_scored(scored: ScoredRecord) -> Option<Self> {
        let z_score = scored.z_score?;
        Some(Self {
            source: scored.record.source,
            destination: scored.record.destination,
            metric: scored.record.metric,
            z_score,
            hostname: None,
            extra: scored.record.extra,
        })
    }
}

/// Enrichment-stage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub distinct_destinations: usize,
    pub lookups_issued: usize,
    pub verdicts: VerdictCounts,
    /// Candidate records dropped for lack of a resolved hostname.
    pub dropped_records: usize,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub groups: usize,
    pub undefined_scores: usize,
    pub candidates: usize,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSummary>,
    pub findings: Vec<Finding>,
}

impl RunReport {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Output of the pure stages, up to `Filtered`.
#[derive(Debug)]
struct Analysis {
    total_records: usize,
    groups: usize,
    undefined_scores: usize,
    candidates: Vec<ScoredRecord>,
}

/// Orchestrates scoring, filtering and enrichment.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    scorer: AnomalyScorer,
    filter: AnomalyFilter,
}

impl Pipeline {
    pub fn new(scorer: AnomalyScorer, filter: AnomalyFilter) -> Self {
        Self { scorer, filter }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(AnomalyScorer::new(config.key_spec()), config.anomaly_filter())
    }

    pub fn filter(&self) -> &AnomalyFilter {
        &self.filter
    }

    fn analyze(&self, records: Vec<FlowRecord>) -> Analysis {
        let total_records = records.len();

        let stats = self.scorer.statistics(&records);
        let scored = self.scorer.score(records, &stats);
        let undefined_scores = scored.iter().filter(|s| s.z_score.is_none()).count();
        debug!(
            "Scored {} records across {} groups ({} undefined)",
            total_records,
            stats.len(),
            undefined_scores
        );

        let candidates = self.filter.select(scored);
        debug!(
            "{} records exceed |z| > {}",
            candidates.len(),
            self.filter.threshold
        );

        Analysis {
            total_records,
            groups: stats.len(),
            undefined_scores,
            candidates,
        }
    }

    /// Runs the pure stages and ranks candidates without DNS enrichment.
    pub fn score_only(&self, records: Vec<FlowRecord>) -> RunReport {
        let analysis = self.analyze(records);
        let candidates = analysis.candidates.len();
        let findings = self
            .filter
            .top_k(analysis.candidates)
            .into_iter()
            .filter_map(Finding::from_scored)
            .collect();

        RunReport {
            generated_at: Utc::now(),
            total_records: analysis.total_records,
            groups: analysis.groups,
            undefined_scores: analysis.undefined_scores,
            candidates,
            threshold: self.filter.threshold,
            enrichment: None,
            findings,
        }
    }

    /// Runs the full pipeline with a fresh run-scoped cache.
    pub async fn run(&self, records: Vec<FlowRecord>, resolver: &DnsResolver) -> RunReport {
        let mut cache = DnsCache::new();
        self.run_with_cache(records, resolver, &mut cache).await
    }

    /// Runs the full pipeline against a caller-owned cache.
    pub async fn run_with_cache(
        &self,
        records: Vec<FlowRecord>,
        resolver: &DnsResolver,
        cache: &mut DnsCache,
    ) -> RunReport {
        let analysis = self.analyze(records);
        let candidate_count = analysis.candidates.len();

        let destinations = distinct_destinations(&analysis.candidates);
        debug!("{} distinct destinations to resolve", destinations.len());

        let lookups_issued = resolver.resolve_all(&destinations, cache).await;

        let mut enriched = join(analysis.candidates, cache);
        let dropped_records = candidate_count - enriched.len();
        rank_enriched(&mut enriched);

        let findings: Vec<Finding> = self
            .filter
            .top_k(enriched)
            .into_iter()
            .map(Finding::from)
            .collect();

        let counts = VerdictCounts::tally(destinations.iter().filter_map(|d| cache.get(d)));

        info!(
            "Run complete: {} records, {} candidates, {} destinations ({} resolved, {} suppressed, {} failed), {} findings",
            analysis.total_records,
            candidate_count,
            destinations.len(),
            counts.resolved,
            counts.suppressed,
            counts.failed,
            findings.len()
        );

        RunReport {
            generated_at: Utc::now(),
            total_records: analysis.total_records,
            groups: analysis.groups,
            undefined_scores: analysis.undefined_scores,
            candidates: candidate_count,
            threshold: self.filter.threshold,
            enrichment: Some(EnrichmentSummary {
                distinct_destinations: destinations.len(),
                lookups_issued,
                verdicts: counts,
                dropped_records,
            }),
            findings,
        }
    }

    /// Acquires a token, then runs the full pipeline.
    ///
    /// Fails only if the credential exchange fails.
    pub async fn run_with_provider(
        &self,
        records: Vec<FlowRecord>,
        config: &Config,
        provider: &dyn TokenProvider,
        source: Arc<dyn PassiveDnsSource>,
    ) -> Result<RunReport> {
        let token = provider.fetch_token().await?;
        let resolver = DnsResolver::new(
            source,
            token,
            config.suppression_rule(),
            config.enrichment.max_concurrent_lookups,
        );

        Ok(self.run(records, &resolver).await)
    }
}

/// Destinations of the candidate set, deduplicated and ordered.
pub fn distinct_destinations(candidates: &[ScoredRecord]) -> BTreeSet<String> {
    candidates
        .iter()
        .map(|s| s.record.destination.clone())
        .collect()
}

/// Keeps candidates whose destination resolved, attaching the hostname.
pub fn join(candidates: Vec<ScoredRecord>, cache: &DnsCache) -> Vec<EnrichedRecord> {
    candidates
        .into_iter()
        .filter_map(|scored| {
            let z_score = scored.z_score.filter(|z| z.is_finite())?;
            let hostname = cache.hostname(&scored.record.destination)?.to_string();
            Some(EnrichedRecord {
                record: scored.record,
                z_score,
                hostname,
            })
        })
        .collect()
}

fn rank_enriched(enriched: &mut [EnrichedRecord]) {
    enriched.sort_by(|a, b| b.z_score.total_cmp(&a.z_score));
}
