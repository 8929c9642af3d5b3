//! Load balancer - ranks healthy endpoints by composite score

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use relay_llm::Endpoint;

use crate::health::{EndpointHealth, HealthTracker};
use crate::registry::EndpointRegistry;

/// Weights of the composite score
///
/// `score = success_rate * success_rate_weight
///        - avg_latency_ms * latency_weight
///        - priority * priority_weight`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub success_rate: f64,
    pub latency: f64,
    pub priority: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success_rate: 1000.0,
            latency: 1.0,
            priority: 100.0,
        }
    }
}

impl ScoreWeights {
    pub fn score(&self, endpoint: &Endpoint, health: &EndpointHealth) -> f64 {
        health.success_rate() * self.success_rate
            - health.avg_latency_ms * self.latency
            - f64::from(endpoint.priority) * self.priority
    }
}

/// An endpoint together with its score at ranking time
#[derive(Debug, Clone)]
pub struct RankedEndpoint {
    pub endpoint: Arc<Endpoint>,
    pub score: f64,
}

/// Read-only view over the registry and health table
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    registry: Arc<EndpointRegistry>,
    health: Arc<HealthTracker>,
    weights: ScoreWeights,
}

impl LoadBalancer {
    pub fn new(registry: Arc<EndpointRegistry>, health: Arc<HealthTracker>) -> Self {
        Self::with_weights(registry, health, ScoreWeights::default())
    }

    pub fn with_weights(
        registry: Arc<EndpointRegistry>,
        health: Arc<HealthTracker>,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            registry,
            health,
            weights,
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Active, healthy endpoints below the failure threshold, best first.
    ///
    /// Equal scores are ordered by endpoint name.
    pub fn ranked(&self) -> Vec<RankedEndpoint> {
        let threshold = self.health.threshold();

        let mut ranked: Vec<RankedEndpoint> = self
            .registry
            .active()
            .filter_map(|endpoint| {
                let health = self.health.snapshot(&endpoint.name)?;
                if !health.healthy || health.consecutive_failures >= threshold {
                    tracing::trace!(endpoint = %endpoint.name, "Skipping unhealthy endpoint");
                    return None;
                }
                Some(RankedEndpoint {
                    score: self.weights.score(endpoint, &health),
                    endpoint: Arc::clone(endpoint),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.endpoint.name.cmp(&b.endpoint.name))
        });
        ranked
    }

    pub fn rank_candidates(&self) -> Vec<Arc<Endpoint>> {
        self.ranked().into_iter().map(|r| r.endpoint).collect()
    }

    /// Current score of an endpoint, if it has a health record
    pub fn score_of(&self, endpoint: &Endpoint) -> Option<f64> {
        self.health
            .snapshot(&endpoint.name)
            .map(|health| self.weights.score(endpoint, &health))
    }
}
