//! Model selection: maps an inbound Claude model name onto one of the two
//! configured upstream models.

use crate::config::{CacheConfig, ModelsConfig};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Big,
    Small,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Big => "big",
            ModelTier::Small => "small",
        }
    }
}

/// Result of classifying an inbound name. `recognized` is false when the name
/// matched no family and fell through to the small tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub tier: ModelTier,
    pub recognized: bool,
}

/// Case-insensitive substring match, checked in order: opus/sonnet → big,
/// haiku → small, anything else → small (unrecognized).
pub fn classify_model(name: &str) -> Classification {
    let lower = name.to_lowercase();
    if lower.contains("opus") || lower.contains("sonnet") {
        Classification {
            tier: ModelTier::Big,
            recognized: true,
        }
    } else if lower.contains("haiku") {
        Classification {
            tier: ModelTier::Small,
            recognized: true,
        }
    } else {
        Classification {
            tier: ModelTier::Small,
            recognized: false,
        }
    }
}

/// The upstream model chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub name: String,
    pub tier: ModelTier,
    /// Whether cache hints may be forwarded to this model.
    pub cache_capable: bool,
    pub recognized: bool,
}

impl ResolvedModel {
    /// A resolved model with no selector involved; handy for conversion code
    /// that only cares about the name and the cache flag.
    pub fn new(name: impl Into<String>, cache_capable: bool) -> Self {
        Self {
            name: name.into(),
            tier: ModelTier::Small,
            cache_capable,
            recognized: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    big: String,
    small: String,
    require_claude_prefix: bool,
    cache_enabled: bool,
    cache_marker: String,
}

impl ModelSelector {
    pub fn new(models: &ModelsConfig, cache: &CacheConfig) -> Self {
        Self {
            big: models.big.clone(),
            small: models.small.clone(),
            require_claude_prefix: models.require_claude_prefix,
            cache_enabled: cache.enabled,
            cache_marker: cache.marker.to_lowercase(),
        }
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Big => &self.big,
            ModelTier::Small => &self.small,
        }
    }

    pub fn select(&self, inbound_model: &str) -> ResolvedModel {
        let Classification { tier, recognized } = classify_model(inbound_model);
        let name = self.model_for(tier).to_string();

        if !recognized {
            tracing::warn!(
                model = inbound_model,
                fallback = %name,
                "Unrecognized model name, using small tier"
            );
        }

        ResolvedModel {
            cache_capable: self.is_cache_capable(&name),
            name,
            tier,
            recognized,
        }
    }

    pub fn is_cache_capable(&self, upstream_model: &str) -> bool {
        self.cache_enabled
            && !self.cache_marker.is_empty()
            && upstream_model.to_lowercase().contains(&self.cache_marker)
    }

    /// Reject names the gateway will not route. Runs before any conversion.
    pub fn validate(&self, inbound_model: &str) -> Result<()> {
        if inbound_model.trim().is_empty() {
            return Err(GatewayError::validation("model is required"));
        }
        if self.require_claude_prefix && !inbound_model.to_lowercase().starts_with("claude") {
            return Err(GatewayError::validation(format!(
                "Unsupported model '{}': model name must start with 'claude'",
                inbound_model
            )));
        }
        Ok(())
    }

    /// `(tier, upstream model)` pairs for the models listing.
    pub fn available_models(&self) -> Vec<(ModelTier, &str)> {
        vec![
            (ModelTier::Big, self.big.as_str()),
            (ModelTier::Small, self.small.as_str()),
        ]
    }
}
