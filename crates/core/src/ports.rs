//! Seams between the engine and the stores it reads from or writes to.
//!
//! Rule persistence is owned by the engine; every other trait here describes an
//! external collaborator (catalog, taxonomy, order history, key-value stores)
//! by the narrow interface the matcher and the smart builders consume.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::product::{OrderId, ProductId, ProductSummary, ProductTerm, TermId};
use crate::domain::rule::{
    Action, ConditionGroup, ConditionKey, IndexEntry, OrderBy, Rule, RuleDraft, RuleId, RulePatch,
    RuleQuery, RuleStatus,
};
use crate::errors::ApplicationError;
use crate::smart::LastBuild;

pub type PortResult<T> = Result<T, ApplicationError>;

/// Storage for rules, their condition groups, actions and lookup-index rows.
///
/// Implementations must apply each method as one atomic write; in particular
/// `delete_rule` removes the rule together with its conditions, actions and
/// index rows.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn insert_rule(&self, draft: RuleDraft) -> PortResult<Rule>;
    async fn update_rule(&self, id: RuleId, patch: RulePatch) -> PortResult<Option<Rule>>;
    async fn delete_rule(&self, id: RuleId) -> PortResult<bool>;
    async fn find_rule(&self, id: RuleId) -> PortResult<Option<Rule>>;
    async fn list_rules(&self, query: &RuleQuery) -> PortResult<Vec<Rule>>;
    async fn count_rules(&self, status: Option<RuleStatus>) -> PortResult<u64>;

    /// Groups ordered by `group_id`, conditions in insertion order.
    async fn load_conditions(&self, id: RuleId) -> PortResult<Vec<ConditionGroup>>;
    async fn replace_conditions(&self, id: RuleId, groups: &[ConditionGroup]) -> PortResult<()>;

    /// Actions in declaration order.
    async fn load_actions(&self, id: RuleId) -> PortResult<Vec<Action>>;
    async fn replace_actions(&self, id: RuleId, actions: &[Action]) -> PortResult<()>;

    async fn replace_index_entries(&self, id: RuleId, entries: &[IndexEntry]) -> PortResult<()>;
    async fn index_entries_for(&self, id: RuleId) -> PortResult<Vec<IndexEntry>>;
    async fn clear_index(&self) -> PortResult<u64>;

    /// Distinct rule ids whose index rows intersect `keys`, ascending priority then id.
    async fn candidate_rules(&self, keys: &[ConditionKey]) -> PortResult<Vec<RuleId>>;
}

#[async_trait]
pub trait TermIndexReader: Send + Sync {
    /// Every taxonomy term attached to the product (categories, tags, attributes).
    async fn get_terms(&self, product_id: ProductId) -> PortResult<Vec<ProductTerm>>;
}

#[async_trait]
pub trait TaxonomyHierarchy: Send + Sync {
    async fn resolve_term(&self, taxonomy: &str, slug: &str) -> PortResult<Option<TermId>>;
    /// All descendants at any depth, excluding the term itself.
    async fn descendant_term_ids(&self, term_id: TermId, taxonomy: &str) -> PortResult<Vec<TermId>>;
    async fn term_slug(&self, term_id: TermId, taxonomy: &str) -> PortResult<Option<String>>;
    async fn is_hierarchical(&self, taxonomy: &str) -> PortResult<bool>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TermFilter {
    pub taxonomy: String,
    pub slugs: Vec<String>,
    /// Descendant-inclusive matching; only honoured for hierarchical taxonomies.
    pub include_children: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum ProductSelector {
    Terms(TermFilter),
    Ids { ids: Vec<ProductId> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    Sorted(OrderBy),
    /// Keep the order of an id-list selector.
    Candidate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PriceRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl PriceRange {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.min && price <= self.max
    }
}

/// Catalog lookup; implementations only ever return published products.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProductQuery {
    pub selector: ProductSelector,
    pub order: QueryOrder,
    pub in_stock_only: bool,
    pub limit: usize,
    pub exclude: Vec<ProductId>,
    pub price_range: Option<PriceRange>,
}

impl ProductQuery {
    pub fn terms(filter: TermFilter, orderby: OrderBy, limit: usize) -> Self {
        Self {
            selector: ProductSelector::Terms(filter),
            order: QueryOrder::Sorted(orderby),
            in_stock_only: false,
            limit,
            exclude: Vec::new(),
            price_range: None,
        }
    }

    pub fn ids(ids: Vec<ProductId>, limit: usize) -> Self {
        Self {
            selector: ProductSelector::Ids { ids },
            order: QueryOrder::Candidate,
            in_stock_only: false,
            limit,
            exclude: Vec::new(),
            price_range: None,
        }
    }

    pub fn in_stock_only(mut self, in_stock_only: bool) -> Self {
        self.in_stock_only = in_stock_only;
        self
    }

    pub fn excluding(mut self, product_id: ProductId) -> Self {
        self.exclude.push(product_id);
        self
    }

    pub fn priced_within(mut self, range: PriceRange) -> Self {
        self.price_range = Some(range);
        self
    }
}

#[async_trait]
pub trait CatalogQuery: Send + Sync {
    async fn find_products(&self, query: &ProductQuery) -> PortResult<Vec<ProductId>>;
    async fn product_summary(&self, product_id: ProductId) -> PortResult<Option<ProductSummary>>;
}

/// Read access to completed and processing orders.
#[async_trait]
pub trait OrderHistory: Send + Sync {
    /// Qualifying order ids created at or after `since`, ascending id.
    async fn list_orders_since(
        &self,
        since: DateTime<Utc>,
        batch_size: usize,
        offset: usize,
    ) -> PortResult<Vec<OrderId>>;

    /// Distinct product ids on the order's line items.
    async fn order_line_product_ids(&self, order_id: OrderId) -> PortResult<Vec<ProductId>>;

    async fn sum_quantity_by_product_since(
        &self,
        since: DateTime<Utc>,
    ) -> PortResult<BTreeMap<ProductId, u64>>;
}

/// Keyed storage of product-id lists. Used both as the persisted blob store
/// (no TTL) and as the TTL cache.
#[async_trait]
pub trait IdListStore: Send + Sync {
    /// Expired entries read as absent.
    async fn get(&self, key: &str) -> PortResult<Option<Vec<ProductId>>>;
    async fn set(&self, key: &str, ids: &[ProductId], ttl: Option<Duration>) -> PortResult<()>;
    async fn delete_by_prefix(&self, prefix: &str) -> PortResult<u64>;
}

/// Single-slot record of the last smart build.
#[async_trait]
pub trait BuildLog: Send + Sync {
    async fn last_build(&self) -> PortResult<Option<LastBuild>>;
    /// Replaces any previous record.
    async fn save_build(&self, build: &LastBuild) -> PortResult<()>;
    async fn clear(&self) -> PortResult<()>;
}
