use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use shelfmatch_core::domain::product::{
    OrderId, ProductId, ProductSummary, ProductTerm, StockStatus, TermId,
};
use shelfmatch_core::domain::rule::{
    Action, ConditionGroup, ConditionKey, IndexEntry, OrderBy, Rule, RuleDraft, RuleId,
    RuleOrderColumn, RulePatch, RuleQuery, RuleStatus,
};
use shelfmatch_core::ports::{
    BuildLog, CatalogQuery, IdListStore, OrderHistory, PortResult, ProductQuery, ProductSelector,
    QueryOrder, RuleRepository, TaxonomyHierarchy, TermFilter, TermIndexReader,
};
use shelfmatch_core::smart::LastBuild;

use super::catalog::{in_candidate_order, OrderRecord, ProductRecord, TermRecord};

#[derive(Default)]
struct RuleState {
    next_id: i64,
    rules: BTreeMap<RuleId, Rule>,
    conditions: HashMap<RuleId, Vec<ConditionGroup>>,
    actions: HashMap<RuleId, Vec<Action>>,
    index: BTreeMap<(ConditionKey, RuleId), i64>,
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    state: RwLock<RuleState>,
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn insert_rule(&self, draft: RuleDraft) -> PortResult<Rule> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let now = Utc::now();
        let rule = Rule {
            id: RuleId(state.next_id),
            name: draft.name,
            priority: draft.priority,
            status: draft.status,
            exclude_outofstock: draft.exclude_outofstock,
            created_at: now,
            updated_at: now,
        };
        state.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, id: RuleId, patch: RulePatch) -> PortResult<Option<Rule>> {
        let mut state = self.state.write().await;
        let Some(rule) = state.rules.get_mut(&id) else {
            return Ok(None);
        };
        if !patch.is_empty() {
            if let Some(name) = patch.name {
                rule.name = name;
            }
            if let Some(priority) = patch.priority {
                rule.priority = priority;
            }
            if let Some(status) = patch.status {
                rule.status = status;
            }
            if let Some(exclude_outofstock) = patch.exclude_outofstock {
                rule.exclude_outofstock = exclude_outofstock;
            }
            rule.updated_at = Utc::now();
        }
        Ok(Some(rule.clone()))
    }

    async fn delete_rule(&self, id: RuleId) -> PortResult<bool> {
        let mut state = self.state.write().await;
        state.conditions.remove(&id);
        state.actions.remove(&id);
        state.index.retain(|(_, rule_id), _| *rule_id != id);
        Ok(state.rules.remove(&id).is_some())
    }

    async fn find_rule(&self, id: RuleId) -> PortResult<Option<Rule>> {
        Ok(self.state.read().await.rules.get(&id).cloned())
    }

    async fn list_rules(&self, query: &RuleQuery) -> PortResult<Vec<Rule>> {
        let state = self.state.read().await;
        let mut rules: Vec<Rule> = state
            .rules
            .values()
            .filter(|rule| query.status.map_or(true, |status| rule.status == status))
            .cloned()
            .collect();

        rules.sort_by(|left, right| {
            let ordering = match query.order_by {
                RuleOrderColumn::Id => left.id.cmp(&right.id),
                RuleOrderColumn::Name => left.name.cmp(&right.name),
                RuleOrderColumn::Priority => left.priority.cmp(&right.priority),
                RuleOrderColumn::Status => left.status.as_flag().cmp(&right.status.as_flag()),
                RuleOrderColumn::CreatedAt => left.created_at.cmp(&right.created_at),
                RuleOrderColumn::UpdatedAt => left.updated_at.cmp(&right.updated_at),
            };
            let ordering = if query.descending { ordering.reverse() } else { ordering };
            ordering.then(left.id.cmp(&right.id))
        });

        Ok(rules
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count_rules(&self, status: Option<RuleStatus>) -> PortResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .values()
            .filter(|rule| status.map_or(true, |status| rule.status == status))
            .count() as u64)
    }

    async fn load_conditions(&self, id: RuleId) -> PortResult<Vec<ConditionGroup>> {
        let state = self.state.read().await;
        let mut groups = state.conditions.get(&id).cloned().unwrap_or_default();
        groups.sort_by_key(|group| group.group_id);
        Ok(groups)
    }

    async fn replace_conditions(&self, id: RuleId, groups: &[ConditionGroup]) -> PortResult<()> {
        let mut state = self.state.write().await;
        state.conditions.insert(id, groups.to_vec());
        if let Some(rule) = state.rules.get_mut(&id) {
            rule.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn load_actions(&self, id: RuleId) -> PortResult<Vec<Action>> {
        Ok(self.state.read().await.actions.get(&id).cloned().unwrap_or_default())
    }

    async fn replace_actions(&self, id: RuleId, actions: &[Action]) -> PortResult<()> {
        let mut state = self.state.write().await;
        state.actions.insert(id, actions.to_vec());
        if let Some(rule) = state.rules.get_mut(&id) {
            rule.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn replace_index_entries(&self, id: RuleId, entries: &[IndexEntry]) -> PortResult<()> {
        let mut state = self.state.write().await;
        state.index.retain(|(_, rule_id), _| *rule_id != id);
        for entry in entries {
            state.index.insert((entry.condition_key.clone(), entry.rule_id), entry.priority);
        }
        Ok(())
    }

    async fn index_entries_for(&self, id: RuleId) -> PortResult<Vec<IndexEntry>> {
        let state = self.state.read().await;
        Ok(state
            .index
            .iter()
            .filter(|((_, rule_id), _)| *rule_id == id)
            .map(|((condition_key, rule_id), priority)| IndexEntry {
                condition_key: condition_key.clone(),
                rule_id: *rule_id,
                priority: *priority,
            })
            .collect())
    }

    async fn clear_index(&self) -> PortResult<u64> {
        let mut state = self.state.write().await;
        let cleared = state.index.len() as u64;
        state.index.clear();
        Ok(cleared)
    }

    async fn candidate_rules(&self, keys: &[ConditionKey]) -> PortResult<Vec<RuleId>> {
        let state = self.state.read().await;
        let mut best: BTreeMap<RuleId, i64> = BTreeMap::new();
        for key in keys {
            for ((_, rule_id), priority) in
                state.index.range((key.clone(), RuleId(i64::MIN))..=(key.clone(), RuleId(i64::MAX)))
            {
                best.entry(*rule_id)
                    .and_modify(|current| *current = (*current).min(*priority))
                    .or_insert(*priority);
            }
        }

        let mut candidates: Vec<(i64, RuleId)> =
            best.into_iter().map(|(rule_id, priority)| (priority, rule_id)).collect();
        candidates.sort();
        Ok(candidates.into_iter().map(|(_, rule_id)| rule_id).collect())
    }
}

#[derive(Default)]
struct CatalogState {
    taxonomies: HashMap<String, bool>,
    terms: BTreeMap<TermId, TermRecord>,
    products: BTreeMap<ProductId, ProductRecord>,
    orders: BTreeMap<OrderId, OrderRecord>,
}

impl CatalogState {
    fn term_id(&self, taxonomy: &str, slug: &str) -> Option<TermId> {
        self.terms
            .values()
            .find(|term| term.taxonomy == taxonomy && term.slug == slug)
            .map(|term| term.term_id)
    }

    fn descendants(&self, term_id: TermId, taxonomy: &str) -> Vec<TermId> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![term_id];
        while let Some(parent) = frontier.pop() {
            for term in self.terms.values() {
                if term.taxonomy == taxonomy
                    && term.parent == Some(parent)
                    && found.insert(term.term_id)
                {
                    frontier.push(term.term_id);
                }
            }
        }
        found.into_iter().collect()
    }

    fn filter_term_ids(&self, filter: &TermFilter) -> BTreeSet<TermId> {
        let expand = filter.include_children
            && self.taxonomies.get(&filter.taxonomy).copied().unwrap_or(false);
        let mut term_ids = BTreeSet::new();
        for slug in &filter.slugs {
            if let Some(term_id) = self.term_id(&filter.taxonomy, slug) {
                term_ids.insert(term_id);
                if expand {
                    term_ids.extend(self.descendants(term_id, &filter.taxonomy));
                }
            }
        }
        term_ids
    }
}

/// Catalog, taxonomy and order history held in memory. Counts catalog queries
/// so tests can observe cache hits.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    queries: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_taxonomy(mut self, name: &str, hierarchical: bool) -> Self {
        self.state.get_mut().taxonomies.insert(name.to_owned(), hierarchical);
        self
    }

    pub fn with_term(mut self, term: TermRecord) -> Self {
        let state = self.state.get_mut();
        state.taxonomies.entry(term.taxonomy.clone()).or_insert(false);
        state.terms.insert(term.term_id, term);
        self
    }

    pub fn with_product(mut self, product: ProductRecord) -> Self {
        self.state.get_mut().products.insert(product.id, product);
        self
    }

    pub fn with_order(mut self, order: OrderRecord) -> Self {
        self.state.get_mut().orders.insert(order.id, order);
        self
    }

    pub async fn insert_product(&self, product: ProductRecord) {
        self.state.write().await.products.insert(product.id, product);
    }

    pub async fn insert_order(&self, order: OrderRecord) {
        self.state.write().await.orders.insert(order.id, order);
    }

    /// Number of `find_products` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn qualifying_orders_since<'a>(
        state: &'a CatalogState,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a OrderRecord> {
        state.orders.values().filter(move |order| order.qualifies() && order.created_at >= since)
    }
}

fn sort_products(products: &mut [&ProductRecord], orderby: OrderBy) {
    match orderby {
        OrderBy::Rand => {}
        OrderBy::Date => {
            products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
        }
        OrderBy::Price => products.sort_by(|a, b| {
            match (a.price, b.price) {
                (Some(left), Some(right)) => left.cmp(&right),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(a.id.cmp(&b.id))
        }),
        OrderBy::PriceDesc => products.sort_by(|a, b| {
            match (a.price, b.price) {
                (Some(left), Some(right)) => right.cmp(&left),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(a.id.cmp(&b.id))
        }),
        OrderBy::Bestselling => {
            products.sort_by(|a, b| b.total_sales.cmp(&a.total_sales).then(a.id.cmp(&b.id)))
        }
        OrderBy::Rating => products.sort_by(|a, b| {
            b.average_rating.total_cmp(&a.average_rating).then(a.id.cmp(&b.id))
        }),
    }
}

#[async_trait]
impl TermIndexReader for InMemoryCatalog {
    async fn get_terms(&self, product_id: ProductId) -> PortResult<Vec<ProductTerm>> {
        let state = self.state.read().await;
        let Some(product) = state.products.get(&product_id) else {
            return Ok(Vec::new());
        };

        let mut terms: Vec<ProductTerm> = product
            .terms
            .iter()
            .filter_map(|term_id| state.terms.get(term_id))
            .map(|term| ProductTerm::new(term.taxonomy.clone(), term.slug.clone(), term.term_id.0))
            .collect();
        terms.sort_by(|a, b| a.taxonomy.cmp(&b.taxonomy).then(a.slug.cmp(&b.slug)));
        Ok(terms)
    }
}

#[async_trait]
impl TaxonomyHierarchy for InMemoryCatalog {
    async fn resolve_term(&self, taxonomy: &str, slug: &str) -> PortResult<Option<TermId>> {
        Ok(self.state.read().await.term_id(taxonomy, slug))
    }

    async fn descendant_term_ids(&self, term_id: TermId, taxonomy: &str) -> PortResult<Vec<TermId>> {
        Ok(self.state.read().await.descendants(term_id, taxonomy))
    }

    async fn term_slug(&self, term_id: TermId, taxonomy: &str) -> PortResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .terms
            .get(&term_id)
            .filter(|term| term.taxonomy == taxonomy)
            .map(|term| term.slug.clone()))
    }

    async fn is_hierarchical(&self, taxonomy: &str) -> PortResult<bool> {
        Ok(self.state.read().await.taxonomies.get(taxonomy).copied().unwrap_or(false))
    }
}

#[async_trait]
impl CatalogQuery for InMemoryCatalog {
    async fn find_products(&self, query: &ProductQuery) -> PortResult<Vec<ProductId>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let selected: Box<dyn Fn(&ProductRecord) -> bool + Send + Sync> = match &query.selector {
            ProductSelector::Terms(filter) => {
                let term_ids = state.filter_term_ids(filter);
                Box::new(move |product| product.terms.iter().any(|term| term_ids.contains(term)))
            }
            ProductSelector::Ids { ids } => {
                let ids: BTreeSet<ProductId> = ids.iter().copied().collect();
                Box::new(move |product| ids.contains(&product.id))
            }
        };

        let mut products: Vec<&ProductRecord> = state
            .products
            .values()
            .filter(|product| product.published && selected(product))
            .filter(|product| !query.in_stock_only || product.stock_status == StockStatus::InStock)
            .filter(|product| !query.exclude.contains(&product.id))
            .filter(|product| match query.price_range {
                Some(range) => product.price.map_or(false, |price| range.contains(price)),
                None => true,
            })
            .collect();

        let mut ids = match (query.order, &query.selector) {
            (QueryOrder::Candidate, ProductSelector::Ids { ids: candidates }) => {
                let found: Vec<ProductId> = products.iter().map(|product| product.id).collect();
                in_candidate_order(candidates, &found)
            }
            (QueryOrder::Sorted(OrderBy::Rand), _) => {
                let mut ids: Vec<ProductId> = products.iter().map(|product| product.id).collect();
                ids.shuffle(&mut rand::thread_rng());
                ids
            }
            (QueryOrder::Sorted(orderby), _) => {
                sort_products(&mut products, orderby);
                products.iter().map(|product| product.id).collect()
            }
            (QueryOrder::Candidate, ProductSelector::Terms(_)) => {
                products.iter().map(|product| product.id).collect()
            }
        };
        ids.truncate(query.limit);
        Ok(ids)
    }

    async fn product_summary(&self, product_id: ProductId) -> PortResult<Option<ProductSummary>> {
        Ok(self.state.read().await.products.get(&product_id).map(ProductRecord::summary))
    }
}

#[async_trait]
impl OrderHistory for InMemoryCatalog {
    async fn list_orders_since(
        &self,
        since: DateTime<Utc>,
        batch_size: usize,
        offset: usize,
    ) -> PortResult<Vec<OrderId>> {
        let state = self.state.read().await;
        Ok(Self::qualifying_orders_since(&state, since)
            .map(|order| order.id)
            .skip(offset)
            .take(batch_size)
            .collect())
    }

    async fn order_line_product_ids(&self, order_id: OrderId) -> PortResult<Vec<ProductId>> {
        let state = self.state.read().await;
        let ids: BTreeSet<ProductId> = state
            .orders
            .get(&order_id)
            .map(|order| order.lines.iter().map(|(product_id, _)| *product_id).collect())
            .unwrap_or_default();
        Ok(ids.into_iter().collect())
    }

    async fn sum_quantity_by_product_since(
        &self,
        since: DateTime<Utc>,
    ) -> PortResult<BTreeMap<ProductId, u64>> {
        let state = self.state.read().await;
        let mut totals = BTreeMap::new();
        for order in Self::qualifying_orders_since(&state, since) {
            for (product_id, quantity) in &order.lines {
                *totals.entry(*product_id).or_insert(0) += quantity;
            }
        }
        Ok(totals)
    }
}

/// Id lists in memory with optional expiry.
#[derive(Default)]
pub struct InMemoryIdListStore {
    entries: RwLock<HashMap<String, (Vec<ProductId>, Option<Instant>)>>,
}

impl InMemoryIdListStore {
    /// Live keys in ascending order.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, (_, expires_at))| expires_at.map_or(true, |at| at > now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl IdListStore for InMemoryIdListStore {
    async fn get(&self, key: &str) -> PortResult<Option<Vec<ProductId>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(ids, expires_at)| match expires_at {
            Some(at) if *at <= Instant::now() => None,
            _ => Some(ids.clone()),
        }))
    }

    async fn set(&self, key: &str, ids: &[ProductId], ttl: Option<Duration>) -> PortResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().await.insert(key.to_owned(), (ids.to_vec(), expires_at));
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> PortResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryBuildLog {
    last: RwLock<Option<LastBuild>>,
}

#[async_trait]
impl BuildLog for InMemoryBuildLog {
    async fn last_build(&self) -> PortResult<Option<LastBuild>> {
        Ok(self.last.read().await.clone())
    }

    async fn save_build(&self, build: &LastBuild) -> PortResult<()> {
        *self.last.write().await = Some(build.clone());
        Ok(())
    }

    async fn clear(&self) -> PortResult<()> {
        *self.last.write().await = None;
        Ok(())
    }
}
