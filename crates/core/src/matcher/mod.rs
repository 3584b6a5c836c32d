//! Rule resolution and recommendation assembly.
//!
//! Resolution is two-phase: the lookup index narrows the rules to those that
//! mention at least one of the product's condition keys, then each candidate
//! is verified against its real condition groups in ascending priority order.
//! The first rule that verifies wins and its actions produce the result.

pub mod actions;
pub mod diagnostics;
pub mod resolve;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineSettings;
use crate::domain::product::ProductId;
use crate::domain::rule::{ConditionKey, Rule};
use crate::ports::{
    CatalogQuery, IdListStore, PortResult, RuleRepository, TaxonomyHierarchy, TermIndexReader,
};

pub use actions::{merge_results, ActionOutcome};
pub use diagnostics::{ActionTrace, Diagnostics, MatchedRule, ProductLine};
pub use resolve::{rule_matches, ProductProfile};

use actions::{execute_action, ActionContext};

pub const RESULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const RESULT_PREFIX: &str = "rec:";

/// Everything the matcher reads from. `blobs` holds persisted co-purchase
/// lists; `cache` holds trending lists, similar-products lists and results.
#[derive(Clone)]
pub struct Collaborators {
    pub rules: Arc<dyn RuleRepository>,
    pub terms: Arc<dyn TermIndexReader>,
    pub taxonomy: Arc<dyn TaxonomyHierarchy>,
    pub catalog: Arc<dyn CatalogQuery>,
    pub blobs: Arc<dyn IdListStore>,
    pub cache: Arc<dyn IdListStore>,
}

/// Caller overrides for one recommendation request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecommendationArgs {
    pub limit: Option<u32>,
    pub exclude_outofstock: Option<bool>,
    pub recently_viewed: Vec<ProductId>,
}

impl RecommendationArgs {
    /// `rec:{product}:{blake3 of the serialized args}`.
    pub fn cache_key(&self, product_id: ProductId) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        format!("{RESULT_PREFIX}{product_id}:{}", blake3::hash(&encoded).to_hex())
    }
}

#[derive(Clone)]
pub struct Matcher {
    settings: EngineSettings,
    ports: Collaborators,
}

impl Matcher {
    pub fn new(settings: EngineSettings, ports: Collaborators) -> Self {
        Self { settings, ports }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Ordered, duplicate-free product ids recommended for `product_id`.
    ///
    /// Results of a matched rule are cached for [`RESULT_TTL`] under the
    /// product and the exact overrides; rule edits do not invalidate them.
    pub async fn get_recommendations(
        &self,
        product_id: ProductId,
        args: &RecommendationArgs,
    ) -> PortResult<Vec<ProductId>> {
        if !self.settings.enabled || product_id.0 == 0 {
            return Ok(Vec::new());
        }

        let cache_key = args.cache_key(product_id);
        if let Some(cached) = self.ports.cache.get(&cache_key).await? {
            self.trace(|| {
                debug!(event_name = "matcher.cache_hit", product_id = product_id.0, "cache hit")
            });
            return Ok(cached);
        }

        let started = Instant::now();
        let profile = self.profile(product_id).await?;
        if profile.is_empty() {
            self.trace(|| {
                debug!(event_name = "matcher.no_terms", product_id = product_id.0, "no terms")
            });
            return Ok(Vec::new());
        }

        let Some(rule) = self.find_matching_rule(&profile).await? else {
            self.trace(|| {
                debug!(event_name = "matcher.no_match", product_id = product_id.0, "no rule matched")
            });
            return Ok(Vec::new());
        };

        let outcomes = self.run_actions(&rule, &profile, args).await?;
        let recommendations = merge_results(&outcomes, args.limit);

        self.ports.cache.set(&cache_key, &recommendations, Some(RESULT_TTL)).await?;

        if self.settings.debug {
            info!(
                event_name = "matcher.recommendations",
                product_id = product_id.0,
                rule_id = rule.id.0,
                actions = outcomes.len(),
                results = recommendations.len(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "recommendations computed"
            );
        }

        Ok(recommendations)
    }

    pub(crate) async fn profile(&self, product_id: ProductId) -> PortResult<ProductProfile> {
        let terms = self.ports.terms.get_terms(product_id).await?;
        Ok(ProductProfile::new(product_id, terms))
    }

    /// First candidate, by ascending priority then id, whose condition groups
    /// verify against the product.
    pub async fn find_matching_rule(&self, profile: &ProductProfile) -> PortResult<Option<Rule>> {
        let keys: Vec<ConditionKey> = profile.keys.iter().cloned().collect();
        let candidates = self.ports.rules.candidate_rules(&keys).await?;

        self.trace(|| {
            debug!(
                event_name = "matcher.candidates",
                product_id = profile.product_id.0,
                keys = ?keys,
                candidates = ?candidates,
                "candidate rules from lookup index"
            )
        });

        for rule_id in candidates {
            let Some(rule) = self.ports.rules.find_rule(rule_id).await? else {
                continue;
            };
            if !rule.is_enabled() {
                continue;
            }

            let groups = self.ports.rules.load_conditions(rule_id).await?;
            if rule_matches(&groups, profile, self.ports.taxonomy.as_ref()).await? {
                self.trace(|| {
                    info!(
                        event_name = "matcher.rule_matched",
                        product_id = profile.product_id.0,
                        rule_id = rule.id.0,
                        rule_name = %rule.name,
                        priority = rule.priority,
                        "rule matched"
                    )
                });
                return Ok(Some(rule));
            }
        }

        Ok(None)
    }

    pub(crate) async fn run_actions(
        &self,
        rule: &Rule,
        profile: &ProductProfile,
        args: &RecommendationArgs,
    ) -> PortResult<Vec<ActionOutcome>> {
        let in_stock_only = args
            .exclude_outofstock
            .or(rule.exclude_outofstock)
            .unwrap_or(self.settings.exclude_outofstock);
        let context = ActionContext {
            profile,
            limit_override: args.limit,
            in_stock_only,
            recently_viewed: &args.recently_viewed,
            similar_enabled: self.settings.smart_similar,
        };

        let actions = self.ports.rules.load_actions(rule.id).await?;
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in &actions {
            let outcome = execute_action(&self.ports, action, &context).await?;
            self.trace(|| {
                debug!(
                    event_name = "matcher.action_executed",
                    rule_id = rule.id.0,
                    source = action.source.kind(),
                    query = ?outcome.query,
                    results = outcome.results.len(),
                    "action executed"
                )
            });
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    pub(crate) fn ports(&self) -> &Collaborators {
        &self.ports
    }

    /// Verbose traces only run when the engine debug flag is set.
    fn trace(&self, emit: impl FnOnce()) {
        if self.settings.debug {
            emit();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::product::ProductId;

    use super::RecommendationArgs;

    #[test]
    fn cache_key_depends_on_product_and_overrides() {
        let plain = RecommendationArgs::default();
        let limited = RecommendationArgs { limit: Some(3), ..RecommendationArgs::default() };

        let key = plain.cache_key(ProductId(42));
        assert!(key.starts_with("rec:42:"));
        assert_eq!(key, plain.cache_key(ProductId(42)));
        assert_ne!(key, plain.cache_key(ProductId(43)));
        assert_ne!(key, limited.cache_key(ProductId(42)));
    }
}
