//! Turns one action of the winning rule into a catalog query.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::domain::product::{ProductId, CATEGORY_TAXONOMY, TAG_TAXONOMY};
use crate::domain::rule::{Action, ActionSource, OrderBy};
use crate::matcher::resolve::ProductProfile;
use crate::matcher::Collaborators;
use crate::ports::{PortResult, PriceRange, ProductQuery, TermFilter};
use crate::smart::{copurchase_key, similar_key, trending_category_key, SIMILAR_TTL, TRENDING_GLOBAL_KEY};

/// Per-request inputs shared by every action of a rule.
pub(crate) struct ActionContext<'a> {
    pub profile: &'a ProductProfile,
    pub limit_override: Option<u32>,
    pub in_stock_only: bool,
    pub recently_viewed: &'a [ProductId],
    /// `engine.smart_similar`; when off, similar actions contribute nothing.
    pub similar_enabled: bool,
}

impl ActionContext<'_> {
    fn limit_for(&self, action: &Action) -> usize {
        self.limit_override.filter(|limit| *limit > 0).unwrap_or(action.limit).max(1) as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: Action,
    /// `None` when the action could not be resolved and contributed nothing.
    pub query: Option<ProductQuery>,
    pub results: Vec<ProductId>,
}

/// Executes one action. Unresolvable actions yield an empty outcome rather
/// than an error; collaborator failures still propagate.
pub(crate) async fn execute_action(
    ports: &Collaborators,
    action: &Action,
    context: &ActionContext<'_>,
) -> PortResult<ActionOutcome> {
    let query = resolve_query(ports, action, context).await?;
    let results = match &query {
        Some(query) => ports.catalog.find_products(query).await?,
        None => Vec::new(),
    };
    Ok(ActionOutcome { action: action.clone(), query, results })
}

/// Concatenates outcomes in action order, drops repeats, then applies the
/// caller's overall limit.
pub fn merge_results(outcomes: &[ActionOutcome], limit_override: Option<u32>) -> Vec<ProductId> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ProductId> = outcomes
        .iter()
        .flat_map(|outcome| outcome.results.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect();

    if let Some(limit) = limit_override.filter(|limit| *limit > 0) {
        merged.truncate(limit as usize);
    }
    merged
}

async fn resolve_query(
    ports: &Collaborators,
    action: &Action,
    context: &ActionContext<'_>,
) -> PortResult<Option<ProductQuery>> {
    let product_id = context.profile.product_id;
    let limit = context.limit_for(action);

    let filter = match &action.source {
        ActionSource::Category { term, include_children } => {
            let include_children =
                *include_children && ports.taxonomy.is_hierarchical(CATEGORY_TAXONOMY).await?;
            single_term(CATEGORY_TAXONOMY, term, include_children)
        }
        ActionSource::Tag { term } => single_term(TAG_TAXONOMY, term, false),
        ActionSource::AttributeValue { taxonomy, term } if !taxonomy.is_empty() => {
            single_term(taxonomy, term, false)
        }
        ActionSource::AttributeValue { .. } => None,
        ActionSource::Attribute { taxonomy } => {
            let slugs = context.profile.slugs_in(taxonomy);
            (!taxonomy.is_empty() && !slugs.is_empty()).then(|| TermFilter {
                taxonomy: taxonomy.clone(),
                slugs,
                include_children: false,
            })
        }
        ActionSource::Copurchase
        | ActionSource::Trending
        | ActionSource::RecentlyViewed
        | ActionSource::Similar => {
            let candidates = smart_candidates(ports, action, context, limit).await?;
            return Ok(candidate_query(candidates, context, limit));
        }
    };

    let Some(filter) = filter else {
        debug!(
            event_name = "matcher.action_unresolved",
            product_id = product_id.0,
            source = action.source.kind(),
            value = %action.source.value(),
            "action could not be resolved and contributes nothing"
        );
        return Ok(None);
    };

    Ok(Some(
        ProductQuery::terms(filter, action.orderby, limit)
            .in_stock_only(context.in_stock_only)
            .excluding(product_id),
    ))
}

fn single_term(taxonomy: &str, term: &str, include_children: bool) -> Option<TermFilter> {
    (!term.is_empty()).then(|| TermFilter {
        taxonomy: taxonomy.to_owned(),
        slugs: vec![term.to_owned()],
        include_children,
    })
}

/// Filters a smart candidate list down to published (and optionally in-stock)
/// products, keeping candidate order.
fn candidate_query(
    candidates: Vec<ProductId>,
    context: &ActionContext<'_>,
    limit: usize,
) -> Option<ProductQuery> {
    if candidates.is_empty() {
        return None;
    }
    Some(
        ProductQuery::ids(candidates, limit)
            .in_stock_only(context.in_stock_only)
            .excluding(context.profile.product_id),
    )
}

async fn smart_candidates(
    ports: &Collaborators,
    action: &Action,
    context: &ActionContext<'_>,
    limit: usize,
) -> PortResult<Vec<ProductId>> {
    let product_id = context.profile.product_id;

    let candidates = match action.source {
        ActionSource::Copurchase => {
            ports.blobs.get(&copurchase_key(product_id)).await?.unwrap_or_default()
        }
        ActionSource::Trending => trending_candidates(ports, context).await?,
        ActionSource::RecentlyViewed => context.recently_viewed.to_vec(),
        ActionSource::Similar if context.similar_enabled => {
            similar_candidates(ports, context, limit).await?
        }
        _ => Vec::new(),
    };

    if candidates.is_empty() {
        debug!(
            event_name = "matcher.smart_empty",
            product_id = product_id.0,
            source = action.source.kind(),
            "smart source has no candidates"
        );
    }
    Ok(candidates)
}

async fn trending_candidates(
    ports: &Collaborators,
    context: &ActionContext<'_>,
) -> PortResult<Vec<ProductId>> {
    let mut candidates = Vec::new();
    let mut indexed_category = false;

    for term in context.profile.terms.iter().filter(|term| term.is_category()) {
        if let Some(list) = ports.cache.get(&trending_category_key(term.term_id)).await? {
            indexed_category = true;
            candidates.extend(list);
        }
    }

    if !indexed_category {
        candidates = ports.cache.get(TRENDING_GLOBAL_KEY).await?.unwrap_or_default();
    }

    let mut seen = HashSet::new();
    candidates.retain(|id| seen.insert(*id));
    Ok(candidates)
}

/// Read-through cache of same-category products priced within 25% of the
/// source product, best sellers first.
async fn similar_candidates(
    ports: &Collaborators,
    context: &ActionContext<'_>,
    limit: usize,
) -> PortResult<Vec<ProductId>> {
    let product_id = context.profile.product_id;
    let key = similar_key(product_id, limit);
    if let Some(cached) = ports.cache.get(&key).await? {
        return Ok(cached);
    }

    let categories = context.profile.slugs_in(CATEGORY_TAXONOMY);
    let price = ports.catalog.product_summary(product_id).await?.and_then(|summary| summary.price);
    let (Some(price), false) = (price, categories.is_empty()) else {
        return Ok(Vec::new());
    };

    let query = ProductQuery::terms(
        TermFilter { taxonomy: CATEGORY_TAXONOMY.to_owned(), slugs: categories, include_children: false },
        OrderBy::Bestselling,
        limit,
    )
    .excluding(product_id)
    .priced_within(similar_price_range(price));

    let similar = ports.catalog.find_products(&query).await?;
    ports.cache.set(&key, &similar, Some(SIMILAR_TTL)).await?;
    Ok(similar)
}

pub(crate) fn similar_price_range(price: Decimal) -> PriceRange {
    let spread = price * Decimal::new(25, 2);
    PriceRange { min: price - spread, max: price + spread }
}
