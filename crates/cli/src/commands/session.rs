use std::future::Future;
use std::sync::Arc;

use shelfmatch_core::config::{AppConfig, LoadOptions};
use shelfmatch_core::errors::ApplicationError;
use shelfmatch_core::matcher::{Collaborators, Matcher};
use shelfmatch_core::rules::RuleStore;
use shelfmatch_core::smart::SmartBuilds;
use shelfmatch_db::{
    connect_with_config, migrations, DbPool, SqlBuildLog, SqlCatalog, SqlIdListStore,
    SqlRuleRepository,
};
use tokio::runtime::Runtime;
use tracing::info;

use crate::commands::{CommandResult, Failure};

/// A migrated database with every port bound to its SQLite adapter.
#[derive(Clone)]
pub struct Session {
    pub config: AppConfig,
    pub pool: DbPool,
    pub store: RuleStore,
    pub matcher: Matcher,
    pub builds: SmartBuilds,
}

impl Session {
    pub async fn open(config: AppConfig) -> Result<Self, Failure> {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        info!(
            event_name = "cli.session.opened",
            database_url = %config.database.url,
            "database connected and migrated"
        );
        Ok(Self::assemble(config, pool))
    }

    fn assemble(config: AppConfig, pool: DbPool) -> Self {
        let catalog = Arc::new(SqlCatalog::new(pool.clone()));
        let ports = Collaborators {
            rules: Arc::new(SqlRuleRepository::new(pool.clone())),
            terms: catalog.clone(),
            taxonomy: catalog.clone(),
            catalog: catalog.clone(),
            blobs: Arc::new(SqlIdListStore::blobs(pool.clone())),
            cache: Arc::new(SqlIdListStore::cache(pool.clone())),
        };

        let store = RuleStore::new(ports.rules.clone(), ports.taxonomy.clone());
        let builds = SmartBuilds::new(
            catalog,
            ports.terms.clone(),
            ports.blobs.clone(),
            ports.cache.clone(),
            Arc::new(SqlBuildLog::new(pool.clone())),
        );
        let matcher = Matcher::new(config.engine.clone(), ports);

        Self { config, pool, store, matcher, builds }
    }
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Not-found and bad-input errors are the caller's fault (6); anything else
/// is a storage failure (5).
pub(crate) fn application_failure(error: ApplicationError) -> Failure {
    let exit_code = match error.class() {
        "not_found" | "invalid_input" => 6u8,
        _ => 5u8,
    };
    (error.class(), error.to_string(), exit_code)
}

/// Loads config, opens a session and runs `body` on a current-thread runtime.
/// The pool is closed whatever the body returns.
pub(crate) fn run_in_session<F, Fut>(command: &str, options: LoadOptions, body: F) -> CommandResult
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<CommandResult, Failure>>,
{
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let session = Session::open(config).await?;
        let pool = session.pool.clone();
        let outcome = body(session).await;
        pool.close().await;
        outcome
    });

    result.unwrap_or_else(|failure| CommandResult::from_failure(command, failure))
}
