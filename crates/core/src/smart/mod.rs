//! Precomputed recommendation sources and their storage keys.
//!
//! Co-purchase lists live in the persisted blob store without expiry. Trending
//! lists and the similar-products cache live in the TTL cache store. Nothing
//! here is invalidated when rules or orders change; entries simply age out.

pub mod copurchase;
pub mod trending;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineSettings;
use crate::domain::product::{ProductId, TermId};
use crate::ports::{BuildLog, IdListStore, OrderHistory, PortResult, TermIndexReader};

pub use copurchase::{CopurchaseBuilder, CopurchaseStats};
pub use trending::{TrendingBuilder, TrendingStats};

pub const TRENDING_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const SIMILAR_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const TRENDING_LIST_LEN: usize = 50;
pub const ORDER_BATCH_SIZE: usize = 500;

pub const COPURCHASE_PREFIX: &str = "copurchase:";
pub const TRENDING_PREFIX: &str = "trending:";
pub const SIMILAR_PREFIX: &str = "similar:";
pub const TRENDING_GLOBAL_KEY: &str = "trending:global";

pub fn copurchase_key(product_id: ProductId) -> String {
    format!("{COPURCHASE_PREFIX}{product_id}")
}

pub fn trending_category_key(category: TermId) -> String {
    format!("{TRENDING_PREFIX}cat:{category}")
}

pub fn similar_key(product_id: ProductId, limit: usize) -> String {
    format!("{SIMILAR_PREFIX}{product_id}:{limit}")
}

/// Sorts `(product, score)` pairs by descending score, ties on ascending id,
/// and keeps the first `len` ids.
pub fn top_ranked<I>(scores: I, len: usize) -> Vec<ProductId>
where
    I: IntoIterator<Item = (ProductId, u64)>,
{
    let mut ranked: Vec<(ProductId, u64)> = scores.into_iter().collect();
    ranked.sort_by(|(left_id, left), (right_id, right)| right.cmp(left).then(left_id.cmp(right_id)));
    ranked.into_iter().take(len).map(|(id, _)| id).collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub copurchase: u64,
    pub trending: u64,
    pub similar: u64,
}

/// Deletes every co-purchase list, trending list and cached similar-products list.
pub async fn purge_smart_data(
    blobs: &dyn IdListStore,
    cache: &dyn IdListStore,
) -> PortResult<PurgeCounts> {
    let counts = PurgeCounts {
        copurchase: blobs.delete_by_prefix(COPURCHASE_PREFIX).await?,
        trending: cache.delete_by_prefix(TRENDING_PREFIX).await?,
        similar: cache.delete_by_prefix(SIMILAR_PREFIX).await?,
    };

    info!(
        event_name = "smart.purged",
        copurchase = counts.copurchase,
        trending = counts.trending,
        similar = counts.similar,
        "smart recommendation data purged"
    );
    Ok(counts)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartBuildReport {
    pub copurchase: Option<CopurchaseStats>,
    pub trending: Option<TrendingStats>,
}

impl SmartBuildReport {
    pub fn is_empty(&self) -> bool {
        self.copurchase.is_none() && self.trending.is_none()
    }
}

/// The most recent build that ran at least one builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastBuild {
    pub built_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: SmartBuildReport,
}

/// Runs the builders whose feature toggles are on.
#[derive(Clone)]
pub struct SmartBuilds {
    orders: Arc<dyn OrderHistory>,
    terms: Arc<dyn TermIndexReader>,
    blobs: Arc<dyn IdListStore>,
    cache: Arc<dyn IdListStore>,
    log: Arc<dyn BuildLog>,
}

impl SmartBuilds {
    pub fn new(
        orders: Arc<dyn OrderHistory>,
        terms: Arc<dyn TermIndexReader>,
        blobs: Arc<dyn IdListStore>,
        cache: Arc<dyn IdListStore>,
        log: Arc<dyn BuildLog>,
    ) -> Self {
        Self { orders, terms, blobs, cache, log }
    }

    pub fn copurchase(&self, settings: &EngineSettings) -> CopurchaseBuilder {
        CopurchaseBuilder::new(self.orders.clone(), self.blobs.clone(), settings)
    }

    pub fn trending(&self, settings: &EngineSettings) -> TrendingBuilder {
        TrendingBuilder::new(self.orders.clone(), self.terms.clone(), self.cache.clone(), settings)
    }

    pub async fn run(&self, settings: &EngineSettings) -> PortResult<SmartBuildReport> {
        let mut report = SmartBuildReport::default();

        if settings.smart_copurchase {
            report.copurchase = Some(self.copurchase(settings).build().await?);
        }
        if settings.smart_trending {
            report.trending = Some(self.trending(settings).build().await?);
        }

        if !report.is_empty() {
            self.log.save_build(&LastBuild { built_at: Utc::now(), report: report.clone() }).await?;
        }
        Ok(report)
    }

    pub async fn last_build(&self) -> PortResult<Option<LastBuild>> {
        self.log.last_build().await
    }

    /// Purges every smart list and forgets the last build.
    pub async fn purge(&self) -> PortResult<PurgeCounts> {
        let counts = purge_smart_data(self.blobs.as_ref(), self.cache.as_ref()).await?;
        self.log.clear().await?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::product::{ProductId, TermId};

    use super::{copurchase_key, similar_key, top_ranked, trending_category_key};

    #[test]
    fn keys_are_namespaced_by_source() {
        assert_eq!(copurchase_key(ProductId(7)), "copurchase:7");
        assert_eq!(trending_category_key(TermId(12)), "trending:cat:12");
        assert_eq!(similar_key(ProductId(7), 4), "similar:7:4");
    }

    #[test]
    fn ranking_prefers_higher_scores_then_lower_ids() {
        let ranked = top_ranked(
            [(ProductId(9), 3), (ProductId(2), 5), (ProductId(4), 3), (ProductId(1), 1)],
            3,
        );

        assert_eq!(ranked, [ProductId(2), ProductId(4), ProductId(9)]);
    }
}
