use serde::Serialize;
use shelfmatch_core::config::{EngineSettings, LoadOptions};
use shelfmatch_core::errors::ApplicationError;
use shelfmatch_core::smart::PurgeCounts;
use shelfmatch_db::SqlIdListStore;

use crate::commands::session::{application_failure, run_in_session};
use crate::commands::{to_data, CommandResult, Failure};

/// Builders forced on from the command line, on top of the configured toggles.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildSelection {
    pub copurchase: bool,
    pub trending: bool,
}

impl BuildSelection {
    fn apply(self, settings: &EngineSettings) -> EngineSettings {
        EngineSettings {
            smart_copurchase: settings.smart_copurchase || self.copurchase,
            smart_trending: settings.smart_trending || self.trending,
            ..settings.clone()
        }
    }
}

pub fn build(options: LoadOptions, selection: BuildSelection) -> CommandResult {
    run_in_session("smart", options, |session| async move {
        let settings = selection.apply(&session.config.engine);
        if !settings.smart_copurchase && !settings.smart_trending {
            return Ok(CommandResult::success(
                "smart",
                "no smart builder enabled; pass --copurchase or --trending or enable them in [engine]",
            ));
        }

        let report = session.builds.run(&settings).await.map_err(application_failure)?;
        let mut built = Vec::new();
        if let Some(stats) = &report.copurchase {
            built.push(format!("co-purchase lists for {} products", stats.products_indexed));
        }
        if let Some(stats) = &report.trending {
            built.push(format!("trending lists for {} categories", stats.categories));
        }

        let data = to_data(&report)?;
        Ok::<_, Failure>(CommandResult::success_with(
            "smart",
            format!("built {}", built.join(" and ")),
            data,
        ))
    })
}

#[derive(Debug, Serialize)]
struct PurgeSummary {
    #[serde(flatten)]
    counts: PurgeCounts,
    expired_cache: u64,
}

pub fn purge(options: LoadOptions) -> CommandResult {
    run_in_session("smart", options, |session| async move {
        let counts = session.builds.purge().await.map_err(application_failure)?;
        let expired_cache = SqlIdListStore::cache(session.pool.clone())
            .purge_expired()
            .await
            .map_err(|error| application_failure(ApplicationError::from(error)))?;

        let message = format!(
            "purged {} co-purchase, {} trending and {} similar lists; dropped {expired_cache} expired cache entries",
            counts.copurchase, counts.trending, counts.similar
        );
        let data = to_data(&PurgeSummary { counts, expired_cache })?;
        Ok::<_, Failure>(CommandResult::success_with("smart", message, data))
    })
}
