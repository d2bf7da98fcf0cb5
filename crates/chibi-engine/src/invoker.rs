use std::sync::Arc;

use chibi_contracts::models::ModelTiers;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ModelError, ModelRequest, ModelResponse, ModelService};
use crate::policy::{thread_pacer, BackoffPolicy, Pacer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("all models unavailable (last error: {last})")]
    AllModelsUnavailable { last: ModelError },
}

impl InvokeError {
    pub fn last_error(&self) -> &ModelError {
        match self {
            InvokeError::AllModelsUnavailable { last } => last,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.last_error().is_rate_limited()
    }
}

/// Runs one request down an ordered tier list until a model answers.
///
/// Rate-limited failures get `attempts_per_tier` tries on the same tier with
/// a fixed pause in between; any other failure moves straight to the next
/// tier.
pub struct FallbackInvoker {
    service: Arc<dyn ModelService>,
    tiers: ModelTiers,
    backoff: BackoffPolicy,
    pacer: Arc<dyn Pacer>,
}

impl FallbackInvoker {
    pub fn new(service: Arc<dyn ModelService>, tiers: ModelTiers, backoff: BackoffPolicy) -> Self {
        Self {
            service,
            tiers,
            backoff,
            pacer: thread_pacer(),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn tiers(&self) -> &ModelTiers {
        &self.tiers
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, InvokeError> {
        let attempts = self.backoff.attempts_per_tier.max(1);
        let mut last_error = None;

        for tier in self.tiers.iter() {
            for attempt in 1..=attempts {
                debug!(model = %tier.name, attempt, "invoking model");
                match self.service.generate(&tier.name, request) {
                    Ok(response) => {
                        if last_error.is_some() {
                            info!(model = %tier.name, "model answered after fallback");
                        }
                        return Ok(response);
                    }
                    Err(err) if err.is_rate_limited() && attempt < attempts => {
                        warn!(
                            model = %tier.name,
                            attempt,
                            error = %err,
                            "rate limited; backing off"
                        );
                        last_error = Some(err);
                        self.pacer.pause(self.backoff.rate_limit_backoff);
                    }
                    Err(err) => {
                        warn!(model = %tier.name, attempt, error = %err, "abandoning model tier");
                        last_error = Some(err);
                        break;
                    }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
            ModelError::other(self.service.name(), "no model tiers were attempted")
        });
        Err(InvokeError::AllModelsUnavailable { last })
    }
}
