//! Per-account pipeline depth decisions

use crate::domain::Account;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub min_depth: u32,
    pub max_depth: u32,
    pub batch_ceiling: u32,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            min_depth: 3,
            max_depth: 10,
            batch_ceiling: 3,
        }
    }
}

impl PipelineLimits {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_depth < 1 {
            return Err(ConfigError::PipelineLimits("minimum depth must be at least 1".into()));
        }
        if self.max_depth < self.min_depth {
            return Err(ConfigError::PipelineLimits(format!(
                "cap {} is below minimum {}",
                self.max_depth, self.min_depth
            )));
        }
        if self.batch_ceiling < 1 {
            return Err(ConfigError::PipelineLimits("batch ceiling must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationDecision {
    pub should_generate: bool,
    pub batch_size: u32,
}

impl GenerationDecision {
    const NONE: GenerationDecision = GenerationDecision {
        should_generate: false,
        batch_size: 0,
    };
}

#[derive(Debug, Clone)]
pub struct PipelineManager {
    defaults: PipelineLimits,
}

impl PipelineManager {
    pub fn new(defaults: PipelineLimits) -> Result<Self, ConfigError> {
        defaults.validate()?;
        Ok(Self { defaults })
    }

    /// Effective limits for an account. Invalid overrides fall back to the
    /// global defaults.
    pub fn limits_for(&self, account: &Account) -> PipelineLimits {
        let to_u32 = |v: Option<i32>| v.and_then(|v| u32::try_from(v).ok());
        let limits = PipelineLimits {
            min_depth: to_u32(account.min_pipeline_depth).unwrap_or(self.defaults.min_depth),
            max_depth: to_u32(account.max_pipeline_depth).unwrap_or(self.defaults.max_depth),
            batch_ceiling: self.defaults.batch_ceiling,
        };
        match limits.validate() {
            Ok(()) => limits,
            Err(e) => {
                tracing::warn!(account_id = account.id, error = %e, "Ignoring invalid pipeline override");
                self.defaults
            }
        }
    }

    /// Decide whether to generate given the current pending count.
    pub fn should_generate(&self, account: &Account, pending: i64) -> GenerationDecision {
        let limits = self.limits_for(account);
        let pending = pending.max(0) as u64;
        let (min, cap) = (limits.min_depth as u64, limits.max_depth as u64);

        if pending >= cap {
            return GenerationDecision::NONE;
        }
        if pending < min {
            let batch = (limits.batch_ceiling as u64).min(cap - pending);
            return GenerationDecision {
                should_generate: true,
                batch_size: batch as u32,
            };
        }
        GenerationDecision::NONE
    }
}
