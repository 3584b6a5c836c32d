use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite};

use shelfmatch_core::domain::product::{
    OrderId, ProductId, ProductSummary, ProductTerm, StockStatus, TermId,
};
use shelfmatch_core::domain::rule::OrderBy;
use shelfmatch_core::ports::{
    CatalogQuery, OrderHistory, PortResult, ProductQuery, ProductSelector, QueryOrder,
    TaxonomyHierarchy, TermFilter, TermIndexReader,
};

use super::{decode_err, to_i64, to_u64, RepositoryError};
use crate::DbPool;

/// Order statuses that count as a sale for the smart builders.
pub const QUALIFYING_ORDER_STATUSES: [&str; 2] = ["completed", "processing"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub term_id: TermId,
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
    pub parent: Option<TermId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub published: bool,
    pub stock_status: StockStatus,
    pub price: Option<Decimal>,
    pub total_sales: u64,
    pub average_rating: f64,
    pub created_at: DateTime<Utc>,
    pub terms: Vec<TermId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// `(product, quantity)` per line item.
    pub lines: Vec<(ProductId, u64)>,
}

impl TermRecord {
    pub fn new(taxonomy: &str, slug: &str, term_id: u64) -> Self {
        Self {
            term_id: TermId(term_id),
            taxonomy: taxonomy.to_owned(),
            slug: slug.to_owned(),
            name: slug.to_owned(),
            parent: None,
        }
    }

    pub fn child_of(mut self, parent: u64) -> Self {
        self.parent = Some(TermId(parent));
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }
}

impl ProductRecord {
    /// Published, in stock, unpriced and unsold.
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id: ProductId(id),
            name: name.to_owned(),
            published: true,
            stock_status: StockStatus::InStock,
            price: None,
            total_sales: 0,
            average_rating: 0.0,
            created_at: Utc::now(),
            terms: Vec::new(),
        }
    }

    pub fn priced(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_terms(mut self, terms: &[u64]) -> Self {
        self.terms = terms.iter().copied().map(TermId).collect();
        self
    }

    pub fn with_stock(mut self, stock_status: StockStatus) -> Self {
        self.stock_status = stock_status;
        self
    }

    pub fn with_sales(mut self, total_sales: u64) -> Self {
        self.total_sales = total_sales;
        self
    }

    pub fn with_rating(mut self, average_rating: f64) -> Self {
        self.average_rating = average_rating;
        self
    }

    pub fn created(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn unpublished(mut self) -> Self {
        self.published = false;
        self
    }

    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            id: self.id,
            name: self.name.clone(),
            price: self.price,
            stock_status: self.stock_status,
            published: self.published,
        }
    }
}

impl OrderRecord {
    pub fn completed(id: u64, created_at: DateTime<Utc>, lines: &[(u64, u64)]) -> Self {
        Self {
            id: OrderId(id),
            status: "completed".to_owned(),
            created_at,
            lines: lines.iter().map(|(product, quantity)| (ProductId(*product), *quantity)).collect(),
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_owned();
        self
    }

    pub fn qualifies(&self) -> bool {
        QUALIFYING_ORDER_STATUSES.contains(&self.status.as_str())
    }
}

/// Catalog, taxonomy and order-history reads over the local catalog schema.
pub struct SqlCatalog {
    pool: DbPool,
}

impl SqlCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_taxonomy(
        &self,
        name: &str,
        hierarchical: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO taxonomies (name, hierarchical) VALUES (?, ?)
             ON CONFLICT (name) DO UPDATE SET hierarchical = excluded.hierarchical",
        )
        .bind(name)
        .bind(i64::from(hierarchical))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_term(&self, term: &TermRecord) -> Result<(), RepositoryError> {
        let parent = term.parent.map(|parent| to_i64(parent.0)).transpose()?;
        sqlx::query(
            "INSERT INTO terms (term_id, taxonomy, slug, name, parent_id) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (term_id) DO UPDATE SET
                taxonomy = excluded.taxonomy,
                slug = excluded.slug,
                name = excluded.name,
                parent_id = excluded.parent_id",
        )
        .bind(to_i64(term.term_id.0)?)
        .bind(&term.taxonomy)
        .bind(&term.slug)
        .bind(&term.name)
        .bind(parent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces the product row and its term assignments.
    pub async fn upsert_product(&self, product: &ProductRecord) -> Result<(), RepositoryError> {
        let id = to_i64(product.id.0)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO products
                (id, name, status, stock_status, price, total_sales, average_rating, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                stock_status = excluded.stock_status,
                price = excluded.price,
                total_sales = excluded.total_sales,
                average_rating = excluded.average_rating,
                created_at = excluded.created_at",
        )
        .bind(id)
        .bind(&product.name)
        .bind(if product.published { "publish" } else { "draft" })
        .bind(product.stock_status.as_str())
        .bind(product.price.map(|price| price.to_string()))
        .bind(to_i64(product.total_sales)?)
        .bind(product.average_rating)
        .bind(product.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM product_terms WHERE product_id = ?").bind(id).execute(&mut *tx).await?;
        for term in &product.terms {
            sqlx::query("INSERT OR IGNORE INTO product_terms (product_id, term_id) VALUES (?, ?)")
                .bind(id)
                .bind(to_i64(term.0)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_order(&self, order: &OrderRecord) -> Result<(), RepositoryError> {
        let id = to_i64(order.id.0)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, status, created_at) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET status = excluded.status, created_at = excluded.created_at",
        )
        .bind(id)
        .bind(&order.status)
        .bind(order.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_lines WHERE order_id = ?").bind(id).execute(&mut *tx).await?;
        for (product_id, quantity) in &order.lines {
            sqlx::query("INSERT INTO order_lines (order_id, product_id, quantity) VALUES (?, ?, ?)")
                .bind(id)
                .bind(to_i64(product_id.0)?)
                .bind(to_i64(*quantity)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn terms_of(&self, product_id: ProductId) -> Result<Vec<ProductTerm>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT t.taxonomy, t.slug, t.term_id
             FROM product_terms pt
             JOIN terms t ON t.term_id = pt.term_id
             WHERE pt.product_id = ?
             ORDER BY t.taxonomy ASC, t.slug ASC",
        )
        .bind(to_i64(product_id.0)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let term_id: i64 = row.try_get("term_id").map_err(decode_err)?;
                Ok(ProductTerm {
                    taxonomy: row.try_get("taxonomy").map_err(decode_err)?,
                    slug: row.try_get("slug").map_err(decode_err)?,
                    term_id: TermId(to_u64(term_id)?),
                })
            })
            .collect()
    }

    async fn term_id(&self, taxonomy: &str, slug: &str) -> Result<Option<TermId>, RepositoryError> {
        let term_id: Option<i64> =
            sqlx::query_scalar("SELECT term_id FROM terms WHERE taxonomy = ? AND slug = ?")
                .bind(taxonomy)
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        term_id.map(|id| to_u64(id).map(TermId)).transpose()
    }

    async fn descendants(
        &self,
        term_id: TermId,
        taxonomy: &str,
    ) -> Result<Vec<TermId>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "WITH RECURSIVE descendants (term_id) AS (
                SELECT term_id FROM terms WHERE parent_id = ? AND taxonomy = ?
                UNION
                SELECT t.term_id FROM terms t
                JOIN descendants d ON t.parent_id = d.term_id
                WHERE t.taxonomy = ?
             )
             SELECT term_id FROM descendants ORDER BY term_id ASC",
        )
        .bind(to_i64(term_id.0)?)
        .bind(taxonomy)
        .bind(taxonomy)
        .fetch_all(&self.pool)
        .await?;

        ids.into_iter().map(|id| to_u64(id).map(TermId)).collect()
    }

    async fn slug_of(&self, term_id: TermId, taxonomy: &str) -> Result<Option<String>, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT slug FROM terms WHERE term_id = ? AND taxonomy = ?")
            .bind(to_i64(term_id.0)?)
            .bind(taxonomy)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn hierarchical(&self, taxonomy: &str) -> Result<bool, RepositoryError> {
        let flag: Option<i64> =
            sqlx::query_scalar("SELECT hierarchical FROM taxonomies WHERE name = ?")
                .bind(taxonomy)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// Term ids a filter selects, with descendants when the taxonomy allows it.
    async fn filter_term_ids(&self, filter: &TermFilter) -> Result<BTreeSet<i64>, RepositoryError> {
        let expand = filter.include_children && self.hierarchical(&filter.taxonomy).await?;
        let mut term_ids = BTreeSet::new();

        for slug in &filter.slugs {
            let Some(term_id) = self.term_id(&filter.taxonomy, slug).await? else {
                continue;
            };
            term_ids.insert(to_i64(term_id.0)?);
            if expand {
                for child in self.descendants(term_id, &filter.taxonomy).await? {
                    term_ids.insert(to_i64(child.0)?);
                }
            }
        }

        Ok(term_ids)
    }

    async fn query_products(&self, query: &ProductQuery) -> Result<Vec<ProductId>, RepositoryError> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT p.id FROM products p WHERE p.status = 'publish'");

        match &query.selector {
            ProductSelector::Terms(filter) => {
                let term_ids = self.filter_term_ids(filter).await?;
                if term_ids.is_empty() {
                    return Ok(Vec::new());
                }
                builder.push(
                    " AND p.id IN (SELECT pt.product_id FROM product_terms pt WHERE pt.term_id IN (",
                );
                let mut separated = builder.separated(", ");
                for term_id in term_ids {
                    separated.push_bind(term_id);
                }
                separated.push_unseparated("))");
            }
            ProductSelector::Ids { ids } => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                builder.push(" AND p.id IN (");
                let mut separated = builder.separated(", ");
                for id in ids {
                    separated.push_bind(to_i64(id.0)?);
                }
                separated.push_unseparated(")");
            }
        }

        if query.in_stock_only {
            builder.push(" AND p.stock_status = ").push_bind(StockStatus::InStock.as_str());
        }
        if let Some(range) = query.price_range {
            builder
                .push(" AND p.price IS NOT NULL AND CAST(p.price AS REAL) BETWEEN ")
                .push_bind(range.min.to_f64().unwrap_or(f64::MIN))
                .push(" AND ")
                .push_bind(range.max.to_f64().unwrap_or(f64::MAX));
        }
        if !query.exclude.is_empty() {
            builder.push(" AND p.id NOT IN (");
            let mut separated = builder.separated(", ");
            for id in &query.exclude {
                separated.push_bind(to_i64(id.0)?);
            }
            separated.push_unseparated(")");
        }

        // Random and candidate orders are applied after the fetch.
        let post_ordered = matches!(query.order, QueryOrder::Candidate | QueryOrder::Sorted(OrderBy::Rand));
        builder.push(" ORDER BY ").push(order_clause(query.order));
        if !post_ordered {
            builder.push(" LIMIT ").push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));
        }

        let ids: Vec<i64> = builder.build_query_scalar::<i64>().fetch_all(&self.pool).await?;
        let mut ids = ids.into_iter().map(|id| to_u64(id).map(ProductId)).collect::<Result<Vec<_>, _>>()?;

        match (&query.order, &query.selector) {
            (QueryOrder::Candidate, ProductSelector::Ids { ids: candidates }) => {
                ids = in_candidate_order(candidates, &ids);
            }
            (QueryOrder::Sorted(OrderBy::Rand), _) => ids.shuffle(&mut rand::thread_rng()),
            _ => {}
        }
        ids.truncate(query.limit);
        Ok(ids)
    }

    async fn summary(&self, product_id: ProductId) -> Result<Option<ProductSummary>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, status, stock_status, price FROM products WHERE id = ?")
            .bind(to_i64(product_id.0)?)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(decode_err)?;
        let status: String = row.try_get("status").map_err(decode_err)?;
        let stock_status: String = row.try_get("stock_status").map_err(decode_err)?;
        let price: Option<String> = row.try_get("price").map_err(decode_err)?;

        Ok(Some(ProductSummary {
            id: ProductId(to_u64(id)?),
            name: row.try_get("name").map_err(decode_err)?,
            price: price.as_deref().map(Decimal::from_str).transpose().map_err(decode_err)?,
            stock_status: StockStatus::parse(&stock_status),
            published: status == "publish",
        }))
    }

    async fn orders_since(
        &self,
        since: DateTime<Utc>,
        batch_size: usize,
        offset: usize,
    ) -> Result<Vec<OrderId>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM orders
             WHERE status IN (?, ?) AND julianday(created_at) >= julianday(?)
             ORDER BY id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(QUALIFYING_ORDER_STATUSES[0])
        .bind(QUALIFYING_ORDER_STATUSES[1])
        .bind(since.to_rfc3339())
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        ids.into_iter().map(|id| to_u64(id).map(OrderId)).collect()
    }

    async fn line_products(&self, order_id: OrderId) -> Result<Vec<ProductId>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT product_id FROM order_lines WHERE order_id = ? ORDER BY product_id ASC",
        )
        .bind(to_i64(order_id.0)?)
        .fetch_all(&self.pool)
        .await?;

        ids.into_iter().map(|id| to_u64(id).map(ProductId)).collect()
    }

    async fn quantities_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<ProductId, u64>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT ol.product_id, SUM(ol.quantity) AS quantity
             FROM order_lines ol
             JOIN orders o ON o.id = ol.order_id
             WHERE o.status IN (?, ?) AND julianday(o.created_at) >= julianday(?)
             GROUP BY ol.product_id",
        )
        .bind(QUALIFYING_ORDER_STATUSES[0])
        .bind(QUALIFYING_ORDER_STATUSES[1])
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut totals = BTreeMap::new();
        for row in &rows {
            let product_id: i64 = row.try_get("product_id").map_err(decode_err)?;
            let quantity: i64 = row.try_get("quantity").map_err(decode_err)?;
            totals.insert(ProductId(to_u64(product_id)?), quantity.max(0) as u64);
        }
        Ok(totals)
    }
}

fn order_clause(order: QueryOrder) -> &'static str {
    match order {
        QueryOrder::Candidate | QueryOrder::Sorted(OrderBy::Rand) => "p.id ASC",
        QueryOrder::Sorted(OrderBy::Date) => "p.created_at DESC, p.id ASC",
        QueryOrder::Sorted(OrderBy::Price) => "p.price IS NULL, CAST(p.price AS REAL) ASC, p.id ASC",
        QueryOrder::Sorted(OrderBy::PriceDesc) => {
            "p.price IS NULL, CAST(p.price AS REAL) DESC, p.id ASC"
        }
        QueryOrder::Sorted(OrderBy::Bestselling) => "p.total_sales DESC, p.id ASC",
        QueryOrder::Sorted(OrderBy::Rating) => "p.average_rating DESC, p.id ASC",
    }
}

/// Keeps `found` ids in the order they appear in `candidates`.
pub(crate) fn in_candidate_order(candidates: &[ProductId], found: &[ProductId]) -> Vec<ProductId> {
    let found: BTreeSet<ProductId> = found.iter().copied().collect();
    let mut seen = BTreeSet::new();
    candidates
        .iter()
        .copied()
        .filter(|id| found.contains(id) && seen.insert(*id))
        .collect()
}

#[async_trait]
impl TermIndexReader for SqlCatalog {
    async fn get_terms(&self, product_id: ProductId) -> PortResult<Vec<ProductTerm>> {
        Ok(self.terms_of(product_id).await?)
    }
}

#[async_trait]
impl TaxonomyHierarchy for SqlCatalog {
    async fn resolve_term(&self, taxonomy: &str, slug: &str) -> PortResult<Option<TermId>> {
        Ok(self.term_id(taxonomy, slug).await?)
    }

    async fn descendant_term_ids(&self, term_id: TermId, taxonomy: &str) -> PortResult<Vec<TermId>> {
        Ok(self.descendants(term_id, taxonomy).await?)
    }

    async fn term_slug(&self, term_id: TermId, taxonomy: &str) -> PortResult<Option<String>> {
        Ok(self.slug_of(term_id, taxonomy).await?)
    }

    async fn is_hierarchical(&self, taxonomy: &str) -> PortResult<bool> {
        Ok(self.hierarchical(taxonomy).await?)
    }
}

#[async_trait]
impl CatalogQuery for SqlCatalog {
    async fn find_products(&self, query: &ProductQuery) -> PortResult<Vec<ProductId>> {
        Ok(self.query_products(query).await?)
    }

    async fn product_summary(&self, product_id: ProductId) -> PortResult<Option<ProductSummary>> {
        Ok(self.summary(product_id).await?)
    }
}

#[async_trait]
impl OrderHistory for SqlCatalog {
    async fn list_orders_since(
        &self,
        since: DateTime<Utc>,
        batch_size: usize,
        offset: usize,
    ) -> PortResult<Vec<OrderId>> {
        Ok(self.orders_since(since, batch_size, offset).await?)
    }

    async fn order_line_product_ids(&self, order_id: OrderId) -> PortResult<Vec<ProductId>> {
        Ok(self.line_products(order_id).await?)
    }

    async fn sum_quantity_by_product_since(
        &self,
        since: DateTime<Utc>,
    ) -> PortResult<BTreeMap<ProductId, u64>> {
        Ok(self.quantities_since(since).await?)
    }
}
