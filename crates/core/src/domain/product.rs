use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rule::ConditionKey;

pub const CATEGORY_TAXONOMY: &str = "product_cat";
pub const TAG_TAXONOMY: &str = "product_tag";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(pub u64);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

/// One taxonomy term attached to a product.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductTerm {
    pub taxonomy: String,
    pub slug: String,
    pub term_id: TermId,
}

impl ProductTerm {
    pub fn new(taxonomy: impl Into<String>, slug: impl Into<String>, term_id: u64) -> Self {
        Self { taxonomy: taxonomy.into(), slug: slug.into(), term_id: TermId(term_id) }
    }

    pub fn condition_key(&self) -> ConditionKey {
        ConditionKey::new(&self.taxonomy, &self.slug)
    }

    pub fn is_category(&self) -> bool {
        self.taxonomy == CATEGORY_TAXONOMY
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    OnBackorder,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "instock",
            Self::OutOfStock => "outofstock",
            Self::OnBackorder => "onbackorder",
        }
    }

    /// Unknown values are treated as out of stock so they never leak into in-stock queries.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "instock" | "in_stock" => Self::InStock,
            "onbackorder" | "on_backorder" => Self::OnBackorder,
            _ => Self::OutOfStock,
        }
    }
}

/// Product metadata the engine needs for similarity lookups and diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    pub price: Option<Decimal>,
    pub stock_status: StockStatus,
    pub published: bool,
}

#[cfg(test)]
mod tests {
    use super::{ProductTerm, StockStatus};

    #[test]
    fn product_term_builds_condition_key() {
        let term = ProductTerm::new("pa_brand", "glock", 12);

        assert_eq!(term.condition_key().as_str(), "pa_brand:glock");
        assert!(!term.is_category());
    }

    #[test]
    fn stock_status_parse_defaults_to_out_of_stock() {
        assert_eq!(StockStatus::parse("instock"), StockStatus::InStock);
        assert_eq!(StockStatus::parse("ONBACKORDER"), StockStatus::OnBackorder);
        assert_eq!(StockStatus::parse("mystery"), StockStatus::OutOfStock);
    }
}
