use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineSettings;
use crate::domain::product::ProductId;
use crate::ports::{IdListStore, OrderHistory, PortResult};
use crate::smart::{copurchase_key, top_ranked, ORDER_BATCH_SIZE};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CopurchaseStats {
    pub products_indexed: usize,
    pub orders_scanned: usize,
    pub elapsed_seconds: f64,
}

/// Symmetric co-occurrence counts, keyed by product then partner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PairCounts {
    counts: BTreeMap<ProductId, BTreeMap<ProductId, u64>>,
}

impl PairCounts {
    /// Counts every unordered pair of distinct products in one order.
    pub fn record_order(&mut self, products: &[ProductId]) {
        let distinct: Vec<ProductId> = products.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if distinct.len() < 2 {
            return;
        }

        for (position, left) in distinct.iter().enumerate() {
            for right in &distinct[position + 1..] {
                *self.counts.entry(*left).or_default().entry(*right).or_default() += 1;
                *self.counts.entry(*right).or_default().entry(*left).or_default() += 1;
            }
        }
    }

    pub fn count(&self, product: ProductId, partner: ProductId) -> u64 {
        self.counts.get(&product).and_then(|partners| partners.get(&partner)).copied().unwrap_or(0)
    }

    /// Partners of each product, most frequent first, capped at `max_relations`.
    pub fn ranked(&self, max_relations: usize) -> BTreeMap<ProductId, Vec<ProductId>> {
        self.counts
            .iter()
            .map(|(product, partners)| {
                (*product, top_ranked(partners.iter().map(|(id, n)| (*id, *n)), max_relations))
            })
            .filter(|(_, partners)| !partners.is_empty())
            .collect()
    }
}

pub struct CopurchaseBuilder {
    orders: Arc<dyn OrderHistory>,
    blobs: Arc<dyn IdListStore>,
    lookback_days: u32,
    max_relations: usize,
    batch_size: usize,
}

impl CopurchaseBuilder {
    pub fn new(orders: Arc<dyn OrderHistory>, blobs: Arc<dyn IdListStore>, settings: &EngineSettings) -> Self {
        Self {
            orders,
            blobs,
            lookback_days: settings.lookback_days(),
            max_relations: settings.max_relations(),
            batch_size: ORDER_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn build(&self) -> PortResult<CopurchaseStats> {
        self.build_at(Utc::now()).await
    }

    /// Scans qualifying orders since `now - lookback` and overwrites the
    /// co-purchase list of every product that appeared in a multi-item order.
    pub async fn build_at(&self, now: DateTime<Utc>) -> PortResult<CopurchaseStats> {
        let started = Instant::now();
        let since = now - Duration::days(i64::from(self.lookback_days));

        let mut pairs = PairCounts::default();
        let mut orders_scanned = 0;
        let mut offset = 0;

        loop {
            let batch = self.orders.list_orders_since(since, self.batch_size, offset).await?;
            for order in &batch {
                let products = self.orders.order_line_product_ids(*order).await?;
                pairs.record_order(&products);
            }
            orders_scanned += batch.len();
            offset += self.batch_size;

            if batch.len() < self.batch_size {
                break;
            }
        }

        let ranked = pairs.ranked(self.max_relations);
        for (product, partners) in &ranked {
            self.blobs.set(&copurchase_key(*product), partners, None).await?;
        }

        let stats = CopurchaseStats {
            products_indexed: ranked.len(),
            orders_scanned,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            event_name = "smart.copurchase.built",
            products_indexed = stats.products_indexed,
            orders_scanned = stats.orders_scanned,
            lookback_days = self.lookback_days,
            "co-purchase lists rebuilt"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::product::ProductId;

    use super::PairCounts;

    fn ids(raw: &[u64]) -> Vec<ProductId> {
        raw.iter().copied().map(ProductId).collect()
    }

    #[test]
    fn pairs_are_counted_in_both_directions() {
        let mut pairs = PairCounts::default();
        pairs.record_order(&ids(&[1, 2, 3]));
        pairs.record_order(&ids(&[1, 2]));

        assert_eq!(pairs.count(ProductId(1), ProductId(2)), 2);
        assert_eq!(pairs.count(ProductId(2), ProductId(1)), 2);
        assert_eq!(pairs.count(ProductId(3), ProductId(1)), 1);
        assert_eq!(pairs.ranked(20)[&ProductId(1)], ids(&[2, 3]));
    }

    #[test]
    fn single_item_orders_and_repeated_lines_add_nothing() {
        let mut pairs = PairCounts::default();
        pairs.record_order(&ids(&[5]));
        pairs.record_order(&ids(&[6, 6]));

        assert!(pairs.ranked(20).is_empty());
    }

    #[test]
    fn ranking_is_capped_at_max_relations() {
        let mut pairs = PairCounts::default();
        pairs.record_order(&ids(&[1, 2, 3, 4]));
        pairs.record_order(&ids(&[1, 4]));

        assert_eq!(pairs.ranked(2)[&ProductId(1)], ids(&[4, 2]));
    }
}
