use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use shelfmatch_core::domain::product::StockStatus;
use shelfmatch_core::domain::rule::{
    Action, ActionSource, Condition, ConditionGroup, OrderBy, RuleDraft, RuleQuery, RuleStatus,
};
use shelfmatch_core::errors::ApplicationError;
use shelfmatch_core::rules::RuleStore;

use crate::connection::DbPool;
use crate::repositories::catalog::{OrderRecord, ProductRecord, TermRecord};
use crate::repositories::{InMemoryCatalog, SqlCatalog, SqlRuleRepository};

const DEMO_TAXONOMIES: &[(&str, bool)] =
    &[("product_cat", true), ("product_tag", false), ("pa_brand", false), ("pa_caliber", false)];

/// Deterministic demo catalog: a small outdoor-sports store with a category
/// tree, tags, two attribute taxonomies, orders and four sample rules.
pub struct DemoDataset;

impl DemoDataset {
    pub fn terms() -> Vec<TermRecord> {
        vec![
            TermRecord::new("product_cat", "firearms", 1).named("Firearms"),
            TermRecord::new("product_cat", "pistols", 2).named("Pistols").child_of(1),
            TermRecord::new("product_cat", "compact", 3).named("Compact").child_of(2),
            TermRecord::new("product_cat", "rifles", 4).named("Rifles").child_of(1),
            TermRecord::new("product_cat", "optics", 5).named("Optics"),
            TermRecord::new("product_cat", "holsters", 6).named("Holsters"),
            TermRecord::new("product_cat", "ammunition", 7).named("Ammunition"),
            TermRecord::new("product_cat", "cleaning", 8).named("Cleaning"),
            TermRecord::new("product_tag", "sale", 20).named("Sale"),
            TermRecord::new("product_tag", "new-arrival", 21).named("New arrival"),
            TermRecord::new("pa_brand", "glock", 30).named("Glock"),
            TermRecord::new("pa_brand", "sig-sauer", 31).named("Sig Sauer"),
            TermRecord::new("pa_brand", "vortex", 32).named("Vortex"),
            TermRecord::new("pa_caliber", "9mm", 40).named("9mm"),
            TermRecord::new("pa_caliber", "308", 41).named(".308 Win"),
        ]
    }

    /// Products dated relative to `anchor` so "newest" ordering is stable.
    pub fn products(anchor: DateTime<Utc>) -> Vec<ProductRecord> {
        let product = |id: u64, name: &str, cents: i64, sales: u64, rating: f64, age: i64, terms: &[u64]| {
            ProductRecord::new(id, name)
                .priced(Decimal::new(cents, 2))
                .with_sales(sales)
                .with_rating(rating)
                .created(anchor - Duration::days(age))
                .with_terms(terms)
        };

        vec![
            product(101, "Glock 19 Gen5", 54_999, 120, 4.8, 40, &[3, 30, 40]),
            product(102, "Sig Sauer P365", 59_900, 95, 4.7, 35, &[3, 31, 40]),
            product(103, "Glock 17 Gen5", 57_900, 80, 4.6, 60, &[2, 30, 40]),
            product(104, "Savage 110 Hunter", 89_900, 40, 4.4, 20, &[4, 41]),
            product(105, "Vortex Crossfire II 3-9x40", 19_900, 60, 4.5, 90, &[5, 32, 20]),
            product(106, "Vortex Strike Eagle 1-6x24", 34_900, 25, 4.7, 10, &[5, 32])
                .with_stock(StockStatus::OutOfStock),
            product(107, "Kydex IWB Holster (Glock)", 5_999, 70, 4.3, 5, &[6, 30, 21]),
            product(108, "OWB Leather Holster (Sig)", 6_499, 30, 4.1, 50, &[6, 31]),
            product(109, "9mm FMJ 115gr, 50 rounds", 1_899, 300, 4.6, 120, &[7, 40, 20]),
            product(110, ".308 Match 168gr, 20 rounds", 3_499, 90, 4.8, 70, &[7, 41]),
            product(111, "Universal Cleaning Kit", 2_499, 45, 4.2, 200, &[8]),
            product(112, "Pistol prototype", 99_900, 0, 0.0, 1, &[2]).unpublished(),
        ]
    }

    pub fn orders(anchor: DateTime<Utc>) -> Vec<OrderRecord> {
        let at = |days: i64| anchor - Duration::days(days);
        vec![
            OrderRecord::completed(1001, at(3), &[(101, 1), (107, 1), (109, 2)]),
            OrderRecord::completed(1002, at(6), &[(101, 1), (109, 3)]),
            OrderRecord::completed(1003, at(9), &[(102, 1), (108, 1), (109, 1)])
                .with_status("processing"),
            OrderRecord::completed(1004, at(12), &[(104, 1), (105, 1), (110, 2)]),
            OrderRecord::completed(1005, at(15), &[(103, 1), (107, 1)]),
            OrderRecord::completed(1006, at(18), &[(111, 5)]).with_status("cancelled"),
            OrderRecord::completed(1007, at(21), &[(104, 1), (110, 1), (111, 1)]),
            OrderRecord::completed(1008, at(400), &[(106, 4)]),
        ]
    }

    /// Sample rules: `(draft, condition groups, actions)`.
    pub fn rules() -> Vec<(RuleDraft, Vec<ConditionGroup>, Vec<Action>)> {
        vec![
            (
                RuleDraft::new("Pistol accessories").with_priority(5),
                vec![ConditionGroup::new(
                    0,
                    vec![Condition::equals("product_cat", "pistols").including_children()],
                )],
                vec![
                    Action::new(ActionSource::category("holsters"))
                        .with_limit(3)
                        .with_orderby(OrderBy::Bestselling),
                    Action::new(ActionSource::Copurchase).with_limit(4),
                ],
            ),
            (
                RuleDraft::new("Rifle glass and ammo").with_priority(10),
                vec![
                    ConditionGroup::new(0, vec![Condition::equals("product_cat", "rifles")]),
                    ConditionGroup::new(1, vec![Condition::equals("pa_caliber", "308")]),
                ],
                vec![
                    Action::new(ActionSource::category("optics"))
                        .with_limit(3)
                        .with_orderby(OrderBy::Price),
                    Action::new(ActionSource::Attribute { taxonomy: "pa_caliber".to_owned() })
                        .with_limit(2)
                        .with_orderby(OrderBy::Rating),
                ],
            ),
            (
                RuleDraft::new("Glock family").with_priority(20),
                vec![ConditionGroup::new(0, vec![Condition::equals("pa_brand", "glock")])],
                vec![Action::new(ActionSource::attribute_value("pa_brand", "glock"))
                    .with_orderby(OrderBy::Date)],
            ),
            (
                RuleDraft::new("Sale crossovers").with_priority(30).with_status(RuleStatus::Disabled),
                vec![ConditionGroup::new(0, vec![Condition::equals("product_tag", "sale")])],
                vec![Action::new(ActionSource::Trending)],
            ),
        ]
    }

    /// The demo catalog and orders without any rules.
    pub fn in_memory(anchor: DateTime<Utc>) -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        for (name, hierarchical) in DEMO_TAXONOMIES {
            catalog = catalog.with_taxonomy(name, *hierarchical);
        }
        for term in Self::terms() {
            catalog = catalog.with_term(term);
        }
        for product in Self::products(anchor) {
            catalog = catalog.with_product(product);
        }
        for order in Self::orders(anchor) {
            catalog = catalog.with_order(order);
        }
        catalog
    }

    /// Creates the sample rules that are not present yet, matched by name.
    pub async fn seed_rules(store: &RuleStore) -> Result<usize, ApplicationError> {
        let existing: Vec<String> = store
            .list(&RuleQuery { limit: u32::MAX, ..RuleQuery::default() })
            .await?
            .into_iter()
            .map(|rule| rule.name)
            .collect();

        let mut created = 0;
        for (draft, groups, actions) in Self::rules() {
            if existing.contains(&draft.name) {
                continue;
            }
            let rule = store.create(draft).await?;
            store.save_conditions(rule.id, groups).await?;
            store.save_actions(rule.id, actions).await?;
            created += 1;
        }
        Ok(created)
    }

    /// Loads the dataset into a migrated database. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, ApplicationError> {
        let anchor = Utc::now();
        let catalog = Arc::new(SqlCatalog::new(pool.clone()));

        for (name, hierarchical) in DEMO_TAXONOMIES {
            catalog.upsert_taxonomy(name, *hierarchical).await?;
        }
        let terms = Self::terms();
        for term in &terms {
            catalog.upsert_term(term).await?;
        }
        let products = Self::products(anchor);
        for product in &products {
            catalog.upsert_product(product).await?;
        }
        let orders = Self::orders(anchor);
        for order in &orders {
            catalog.upsert_order(order).await?;
        }

        let store = RuleStore::new(Arc::new(SqlRuleRepository::new(pool.clone())), catalog);
        let rules_created = Self::seed_rules(&store).await?;

        tracing::info!(
            event_name = "fixtures.demo_loaded",
            terms = terms.len(),
            products = products.len(),
            orders = orders.len(),
            rules_created,
            "demo dataset loaded"
        );

        Ok(SeedResult {
            taxonomies: DEMO_TAXONOMIES.len(),
            terms: terms.len(),
            products: products.len(),
            orders: orders.len(),
            rules_created,
        })
    }

    /// Checks that every demo row and the index rows of enabled demo rules exist.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, ApplicationError> {
        let mut checks = Vec::new();

        let terms: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM terms")
            .fetch_one(pool)
            .await
            .map_err(persistence)?;
        checks.push(("terms".to_owned(), terms >= Self::terms().len() as i64));

        let products: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM products")
            .fetch_one(pool)
            .await
            .map_err(persistence)?;
        checks.push(("products".to_owned(), products >= Self::products(Utc::now()).len() as i64));

        for (draft, _, _) in Self::rules() {
            let indexed: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM rule_index ri JOIN rules r ON r.id = ri.rule_id WHERE r.name = ?1",
            )
            .bind(&draft.name)
            .fetch_one(pool)
            .await
            .map_err(persistence)?;
            let expected = draft.status == RuleStatus::Enabled;
            checks.push((format!("rule-index:{}", draft.name), (indexed > 0) == expected));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

fn persistence(error: sqlx::Error) -> ApplicationError {
    ApplicationError::from(crate::repositories::RepositoryError::from(error))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub taxonomies: usize,
    pub terms: usize,
    pub products: usize,
    pub orders: usize,
    pub rules_created: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::DemoDataset;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn demo_dataset_loads_idempotently_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = DemoDataset::load(&pool).await.expect("first load");
        let second = DemoDataset::load(&pool).await.expect("second load");

        assert_eq!(first.rules_created, DemoDataset::rules().len());
        assert_eq!(second.rules_created, 0);
        assert_eq!(first.products, second.products);

        let verification = DemoDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);
    }

    #[test]
    fn demo_terms_reference_known_parents() {
        let terms = DemoDataset::terms();
        for term in &terms {
            if let Some(parent) = term.parent {
                assert!(terms.iter().any(|candidate| candidate.term_id == parent));
            }
        }
        assert!(DemoDataset::products(Utc::now()).iter().any(|product| !product.published));
    }
}
