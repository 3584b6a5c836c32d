use serde_json::json;
use shelfmatch_core::config::LoadOptions;
use shelfmatch_core::domain::rule::RuleId;

use crate::commands::session::{application_failure, run_in_session};
use crate::commands::{to_data, CommandResult, Failure};

/// Rebuilds one rule's index rows, or the whole index when `rule` is `None`.
pub fn rebuild(options: LoadOptions, rule: Option<i64>) -> CommandResult {
    run_in_session("index", options, |session| async move {
        if let Some(id) = rule {
            let entries =
                session.store.rebuild_index_for_rule(RuleId(id)).await.map_err(application_failure)?;
            return Ok(CommandResult::success_with(
                "index",
                format!("rule {id} re-indexed with {entries} entries"),
                Some(json!({ "rule_id": id, "entries": entries })),
            ));
        }

        let report = session.store.rebuild_full_index().await.map_err(application_failure)?;
        let message = format!(
            "lookup index rebuilt: {} rules, {} entries ({} cleared)",
            report.rules, report.entries, report.cleared
        );
        let data = to_data(&report)?;
        Ok::<_, Failure>(CommandResult::success_with("index", message, data))
    })
}
