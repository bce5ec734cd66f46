// ARCHITECTURE: Context-Scored Model Selection with Fallback Chain
//
// The selector hides the multi-model registry from callers: it scores
// every configured descriptor against the request context, runs the
// best candidate, and on failure re-scores the remaining candidates and
// retries up to the configured attempt bound. Failure is represented
// explicitly as a result variant; the chain is a plain iteration over
// scored candidates with early return on first success.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ScoringWeights;
use crate::error::{Error, Result};
use crate::models::descriptor::{GenerationParams, RequestContext};
use crate::models::registry::{ModelPerformanceStats, ModelRegistry};

pub struct ModelSelector {
    registry: Arc<ModelRegistry>,
    weights: ScoringWeights,
    max_fallback_attempts: usize,
}

impl ModelSelector {
    pub fn new(
        registry: Arc<ModelRegistry>,
        weights: ScoringWeights,
        max_fallback_attempts: usize,
    ) -> Self {
        Self {
            registry,
            weights,
            max_fallback_attempts: max_fallback_attempts.max(1),
        }
    }

    /// Applicability-dominant score for one candidate:
    ///
    /// ```text
    /// score = age_group_match * [age matches]
    ///       + context_overlap * |contexts ∩ descriptor.contexts|
    ///       + success_rate_weight * success_rate
    ///       - response_time_penalty * avg_response_time_secs
    /// ```
    fn score(
        &self,
        context: &RequestContext,
        age_groups: &HashSet<String>,
        contexts: &HashSet<String>,
        stats: &ModelPerformanceStats,
    ) -> f64 {
        let mut score = 0.0;
        if let Some(age) = &context.age_group {
            if age_groups.contains(age) {
                score += self.weights.age_group_match;
            }
        }
        let overlap = context.contexts.intersection(contexts).count() as f64;
        score += self.weights.context_overlap * overlap;
        score += self.weights.success_rate * stats.success_rate();
        score -= self.weights.response_time_penalty * stats.avg_response_time_secs();
        score
    }

    /// Pick the best configured model for the context.
    ///
    /// Deterministic: ties are broken by preferring an already-resident
    /// key (avoids a reload), then by lexical key order. Returns `None`
    /// only when every configured key is in `excluded`.
    pub async fn select_excluding(
        &self,
        context: &RequestContext,
        excluded: &HashSet<String>,
    ) -> Option<String> {
        let mut keys: Vec<&String> = self
            .registry
            .descriptors()
            .keys()
            .filter(|k| !excluded.contains(k.as_str()))
            .collect();
        keys.sort();

        let all_stats = self.registry.all_stats().await;
        let mut best: Option<(f64, bool, String)> = None;
        for key in keys {
            let descriptor = self.registry.descriptors().get(key)?;
            let default_stats = ModelPerformanceStats::default();
            let stats = all_stats.get(key).unwrap_or(&default_stats);
            let score = self.score(context, &descriptor.age_groups, &descriptor.contexts, stats);
            let resident = self.registry.is_resident(key).await;
            debug!(
                "Scored model '{}': {:.3} (resident: {})",
                key, score, resident
            );
            // Keys are visited in lexical order and only a strictly
            // better (score, residency) pair replaces the incumbent, so
            // the lexically smallest key wins full ties.
            let better = match &best {
                None => true,
                Some((best_score, best_resident, _)) => {
                    score > *best_score
                        || (score == *best_score && resident && !*best_resident)
                }
            };
            if better {
                best = Some((score, resident, key.clone()));
            }
        }
        best.map(|(_, _, key)| key)
    }

    pub async fn select(&self, context: &RequestContext) -> Option<String> {
        self.select_excluding(context, &HashSet::new()).await
    }

    /// Run inference for the context, walking the fallback chain.
    ///
    /// Each failed candidate is marked exhausted for this request only
    /// and the remaining keys are re-scored; up to the configured bound
    /// of total attempts are made before `AllModelsFailed` carrying the
    /// last underlying error is returned. Exhaustion is per-request,
    /// not a sticky circuit breaker: success-rate telemetry already
    /// deprioritizes persistently unhealthy models in future scoring.
    pub async fn generate_for_context(
        &self,
        prompt: &str,
        context: &RequestContext,
        params: &GenerationParams,
    ) -> Result<String> {
        let mut exhausted: HashSet<String> = HashSet::new();
        let mut last_error: Option<Error> = None;
        let mut attempts = 0usize;

        while attempts < self.max_fallback_attempts {
            let Some(key) = self.select_excluding(context, &exhausted).await else {
                break;
            };
            attempts += 1;
            match self.registry.run(&key, prompt, params).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Model '{}' failed (attempt {}/{}), trying next candidate: {}",
                        key, attempts, self.max_fallback_attempts, e
                    );
                    exhausted.insert(key);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::AllModelsFailed {
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| {
                Error::Config("no models configured for selection".to_string())
            })),
        })
    }
}
