//! Rule tester: the full resolution trace for one product, uncached.

use std::time::Instant;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::product::{ProductId, ProductTerm, StockStatus};
use crate::domain::rule::{ConditionKey, OrderBy, RuleId};
use crate::errors::DomainError;
use crate::matcher::{merge_results, Matcher, RecommendationArgs};
use crate::ports::{PortResult, ProductQuery};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostics {
    pub product_id: ProductId,
    pub product_name: String,
    pub terms: Vec<ProductTerm>,
    pub keys: Vec<ConditionKey>,
    pub matched_rule: Option<MatchedRule>,
    pub actions: Vec<ActionTrace>,
    pub product_ids: Vec<ProductId>,
    pub products: Vec<ProductLine>,
    pub elapsed_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub id: RuleId,
    pub name: String,
    pub priority: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionTrace {
    pub source: String,
    pub value: String,
    pub limit: u32,
    pub orderby: OrderBy,
    pub resolved_query: Option<ProductQuery>,
    pub results: Vec<ProductId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProductLine {
    pub id: ProductId,
    pub name: String,
    pub price: Option<Decimal>,
    pub stock_status: StockStatus,
}

impl Matcher {
    /// Runs resolution and every action of the winning rule without touching
    /// the result cache, and reports each step. Runs even when the engine is
    /// disabled.
    pub async fn diagnose(&self, product_id: ProductId) -> PortResult<Diagnostics> {
        let started = Instant::now();
        let ports = self.ports();

        let summary = ports
            .catalog
            .product_summary(product_id)
            .await?
            .ok_or(DomainError::ProductNotFound(product_id))?;

        let profile = self.profile(product_id).await?;
        let mut report = Diagnostics {
            product_id,
            product_name: summary.name,
            terms: profile.terms.clone(),
            keys: profile.keys.iter().cloned().collect(),
            matched_rule: None,
            actions: Vec::new(),
            product_ids: Vec::new(),
            products: Vec::new(),
            elapsed_ms: 0.0,
        };

        let rule =
            if profile.is_empty() { None } else { self.find_matching_rule(&profile).await? };

        if let Some(rule) = rule {
            let outcomes = self.run_actions(&rule, &profile, &RecommendationArgs::default()).await?;
            report.product_ids = merge_results(&outcomes, None);
            report.actions = outcomes
                .into_iter()
                .map(|outcome| ActionTrace {
                    source: outcome.action.source.kind().to_owned(),
                    value: outcome.action.source.value(),
                    limit: outcome.action.limit,
                    orderby: outcome.action.orderby,
                    resolved_query: outcome.query,
                    results: outcome.results,
                })
                .collect();
            report.matched_rule = Some(MatchedRule { id: rule.id, name: rule.name, priority: rule.priority });

            for id in &report.product_ids {
                if let Some(product) = ports.catalog.product_summary(*id).await? {
                    report.products.push(ProductLine {
                        id: product.id,
                        name: product.name,
                        price: product.price,
                        stock_status: product.stock_status,
                    });
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(report)
    }
}
