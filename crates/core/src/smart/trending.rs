use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineSettings;
use crate::domain::product::{ProductId, TermId};
use crate::ports::{IdListStore, OrderHistory, PortResult, TermIndexReader};
use crate::smart::{
    top_ranked, trending_category_key, TRENDING_GLOBAL_KEY, TRENDING_LIST_LEN, TRENDING_TTL,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendingStats {
    pub products: usize,
    pub categories: usize,
    pub elapsed_seconds: f64,
}

/// Per-category top sellers over the lookback window, plus one global list.
pub struct TrendingBuilder {
    orders: Arc<dyn OrderHistory>,
    terms: Arc<dyn TermIndexReader>,
    cache: Arc<dyn IdListStore>,
    lookback_days: u32,
}

impl TrendingBuilder {
    pub fn new(
        orders: Arc<dyn OrderHistory>,
        terms: Arc<dyn TermIndexReader>,
        cache: Arc<dyn IdListStore>,
        settings: &EngineSettings,
    ) -> Self {
        Self { orders, terms, cache, lookback_days: settings.lookback_days() }
    }

    pub async fn build(&self) -> PortResult<TrendingStats> {
        self.build_at(Utc::now()).await
    }

    pub async fn build_at(&self, now: DateTime<Utc>) -> PortResult<TrendingStats> {
        let started = Instant::now();
        let since = now - Duration::days(i64::from(self.lookback_days));
        let sales = self.orders.sum_quantity_by_product_since(since).await?;

        let mut by_category: BTreeMap<TermId, BTreeMap<ProductId, u64>> = BTreeMap::new();
        for (product, quantity) in &sales {
            for term in self.terms.get_terms(*product).await? {
                if term.is_category() {
                    by_category.entry(term.term_id).or_default().insert(*product, *quantity);
                }
            }
        }

        for (category, products) in &by_category {
            let top = top_ranked(products.iter().map(|(id, qty)| (*id, *qty)), TRENDING_LIST_LEN);
            self.cache.set(&trending_category_key(*category), &top, Some(TRENDING_TTL)).await?;
        }

        let global = top_ranked(sales.iter().map(|(id, qty)| (*id, *qty)), TRENDING_LIST_LEN);
        self.cache.set(TRENDING_GLOBAL_KEY, &global, Some(TRENDING_TTL)).await?;

        let stats = TrendingStats {
            products: sales.len(),
            categories: by_category.len(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            event_name = "smart.trending.built",
            products = stats.products,
            categories = stats.categories,
            lookback_days = self.lookback_days,
            "trending lists rebuilt"
        );

        Ok(stats)
    }
}
