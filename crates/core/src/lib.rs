pub mod config;
pub mod domain;
pub mod errors;
pub mod matcher;
pub mod ports;
pub mod recently_viewed;
pub mod rules;
pub mod smart;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, EngineSettings};
pub use domain::product::{OrderId, ProductId, ProductSummary, ProductTerm, StockStatus, TermId};
pub use domain::rule::{
    Action, ActionDraft, ActionSource, Condition, ConditionDraft, ConditionGroup, ConditionKey,
    IndexEntry, OrderBy, Rule, RuleDraft, RuleId, RulePatch, RuleQuery, RuleStatus,
};
pub use errors::{ApplicationError, DomainError};
pub use matcher::{Collaborators, Diagnostics, Matcher, RecommendationArgs};
pub use recently_viewed::RecentlyViewed;
pub use rules::{IndexBuilder, RuleStore};
pub use smart::{purge_smart_data, CopurchaseBuilder, SmartBuilds, TrendingBuilder};
