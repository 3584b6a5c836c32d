#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;

use shelfmatch_core::config::EngineSettings;
use shelfmatch_core::domain::product::{ProductId, StockStatus};
use shelfmatch_core::domain::rule::{Action, ConditionGroup, Rule, RuleDraft};
use shelfmatch_core::matcher::{Collaborators, Matcher, RecommendationArgs};
use shelfmatch_core::rules::RuleStore;
use shelfmatch_core::smart::SmartBuilds;
use shelfmatch_db::repositories::catalog::{OrderRecord, ProductRecord, TermRecord};
use shelfmatch_db::{
    connect_with_settings, migrations, InMemoryBuildLog, InMemoryCatalog, InMemoryIdListStore,
    InMemoryRuleRepository, SqlBuildLog, SqlCatalog, SqlIdListStore, SqlRuleRepository,
};
use shelfmatch_core::ports::BuildLog;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

#[derive(Clone, Default)]
pub struct CatalogFixture {
    pub taxonomies: Vec<(&'static str, bool)>,
    pub terms: Vec<TermRecord>,
    pub products: Vec<ProductRecord>,
    pub orders: Vec<OrderRecord>,
}

impl CatalogFixture {
    pub fn with_orders(mut self, orders: Vec<OrderRecord>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_product(mut self, product: ProductRecord) -> Self {
        self.products.push(product);
        self
    }
}

/// Category tree `firearms > {pistols, rifles}`, flat accessory categories,
/// two tags and one brand.
pub fn store_catalog() -> CatalogFixture {
    let product = |id: u64, price: i64, sales: u64, terms: &[u64]| {
        ProductRecord::new(id, &format!("product {id}"))
            .priced(Decimal::new(price, 0))
            .with_sales(sales)
            .with_terms(terms)
    };

    CatalogFixture {
        taxonomies: vec![("product_cat", true), ("product_tag", false), ("pa_brand", false)],
        terms: vec![
            TermRecord::new("product_cat", "firearms", 1),
            TermRecord::new("product_cat", "pistols", 2).child_of(1),
            TermRecord::new("product_cat", "rifles", 3).child_of(1),
            TermRecord::new("product_cat", "holsters", 4),
            TermRecord::new("product_cat", "optics", 5),
            TermRecord::new("product_cat", "ammunition", 6),
            TermRecord::new("product_tag", "sale", 10),
            TermRecord::new("product_tag", "clearance", 11),
            TermRecord::new("pa_brand", "glock", 20),
        ],
        products: vec![
            product(100, 500, 30, &[2, 20]),
            product(101, 900, 12, &[3]),
            product(102, 450, 8, &[2, 10]),
            product(103, 700, 2, &[1]),
            product(200, 60, 50, &[4]),
            product(201, 45, 20, &[4]),
            product(202, 80, 90, &[4]).with_stock(StockStatus::OutOfStock),
            product(300, 250, 5, &[5]),
            product(301, 120, 10, &[5, 4]),
            product(400, 20, 400, &[6]),
        ],
        orders: Vec::new(),
    }
}

pub struct Harness {
    pub backend: Backend,
    pub store: RuleStore,
    pub ports: Collaborators,
    pub builds: SmartBuilds,
    /// Present on the memory backend, for query counting.
    pub memory_catalog: Option<Arc<InMemoryCatalog>>,
}

impl Harness {
    pub async fn new(backend: Backend, fixture: &CatalogFixture) -> Self {
        match backend {
            Backend::Memory => Self::memory(fixture),
            Backend::Sqlite => Self::sqlite(fixture).await,
        }
    }

    fn memory(fixture: &CatalogFixture) -> Self {
        let mut catalog = InMemoryCatalog::new();
        for (name, hierarchical) in &fixture.taxonomies {
            catalog = catalog.with_taxonomy(name, *hierarchical);
        }
        for term in &fixture.terms {
            catalog = catalog.with_term(term.clone());
        }
        for product in &fixture.products {
            catalog = catalog.with_product(product.clone());
        }
        for order in &fixture.orders {
            catalog = catalog.with_order(order.clone());
        }
        let catalog = Arc::new(catalog);

        let ports = Collaborators {
            rules: Arc::new(InMemoryRuleRepository::default()),
            terms: catalog.clone(),
            taxonomy: catalog.clone(),
            catalog: catalog.clone(),
            blobs: Arc::new(InMemoryIdListStore::default()),
            cache: Arc::new(InMemoryIdListStore::default()),
        };
        let log = Arc::new(InMemoryBuildLog::default());
        Self::assemble(Backend::Memory, ports, catalog.clone(), log, Some(catalog))
    }

    async fn sqlite(fixture: &CatalogFixture) -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let catalog = Arc::new(SqlCatalog::new(pool.clone()));
        for (name, hierarchical) in &fixture.taxonomies {
            catalog.upsert_taxonomy(name, *hierarchical).await.expect("taxonomy");
        }
        for term in &fixture.terms {
            catalog.upsert_term(term).await.expect("term");
        }
        for product in &fixture.products {
            catalog.upsert_product(product).await.expect("product");
        }
        for order in &fixture.orders {
            catalog.upsert_order(order).await.expect("order");
        }

        let ports = Collaborators {
            rules: Arc::new(SqlRuleRepository::new(pool.clone())),
            terms: catalog.clone(),
            taxonomy: catalog.clone(),
            catalog: catalog.clone(),
            blobs: Arc::new(SqlIdListStore::blobs(pool.clone())),
            cache: Arc::new(SqlIdListStore::cache(pool.clone())),
        };
        let log = Arc::new(SqlBuildLog::new(pool));
        Self::assemble(Backend::Sqlite, ports, catalog, log, None)
    }

    fn assemble<O>(
        backend: Backend,
        ports: Collaborators,
        orders: Arc<O>,
        log: Arc<dyn BuildLog>,
        memory_catalog: Option<Arc<InMemoryCatalog>>,
    ) -> Self
    where
        O: shelfmatch_core::ports::OrderHistory + 'static,
    {
        let store = RuleStore::new(ports.rules.clone(), ports.taxonomy.clone());
        let builds = SmartBuilds::new(
            orders,
            ports.terms.clone(),
            ports.blobs.clone(),
            ports.cache.clone(),
            log,
        );
        Self { backend, store, ports, builds, memory_catalog }
    }

    pub fn matcher(&self) -> Matcher {
        self.matcher_with(EngineSettings::default())
    }

    pub fn matcher_with(&self, settings: EngineSettings) -> Matcher {
        Matcher::new(settings, self.ports.clone())
    }

    /// Creates a rule with its groups and actions through the store.
    pub async fn rule(
        &self,
        draft: RuleDraft,
        groups: Vec<ConditionGroup>,
        actions: Vec<Action>,
    ) -> Rule {
        let rule = self.store.create(draft).await.expect("create rule");
        self.store.save_conditions(rule.id, groups).await.expect("save conditions");
        self.store.save_actions(rule.id, actions).await.expect("save actions");
        rule
    }

    pub async fn recommend(&self, product: u64) -> Vec<u64> {
        self.recommend_with(product, &RecommendationArgs::default()).await
    }

    pub async fn recommend_with(&self, product: u64, args: &RecommendationArgs) -> Vec<u64> {
        self.matcher()
            .get_recommendations(ProductId(product), args)
            .await
            .expect("recommendations")
            .into_iter()
            .map(|id| id.0)
            .collect()
    }
}
