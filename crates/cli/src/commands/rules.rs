use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use shelfmatch_core::config::LoadOptions;
use shelfmatch_core::domain::rule::{
    Action, ConditionGroup, Rule, RuleId, RuleOrderColumn, RuleQuery, RuleStatus,
};
use shelfmatch_core::transfer::{export_rules, import_rules};

use crate::commands::session::{application_failure, run_in_session};
use crate::commands::{to_data, CommandResult, Failure};

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub status: Option<RuleStatus>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<u32>,
    pub offset: u32,
    pub detailed: bool,
}

impl ListOptions {
    fn query(&self) -> RuleQuery {
        let defaults = RuleQuery::default();
        RuleQuery {
            status: self.status,
            order_by: self
                .order_by
                .as_deref()
                .map(RuleOrderColumn::parse_or_default)
                .unwrap_or(defaults.order_by),
            descending: self.descending,
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset,
        }
    }
}

#[derive(Debug, Serialize)]
struct RuleListing {
    total: u64,
    rules: Vec<RuleView>,
}

#[derive(Debug, Serialize)]
struct RuleView {
    #[serde(flatten)]
    rule: Rule,
    #[serde(skip_serializing_if = "Option::is_none")]
    conditions: Option<Vec<ConditionGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actions: Option<Vec<Action>>,
}

pub fn list(options: LoadOptions, listing: ListOptions) -> CommandResult {
    run_in_session("rules", options, |session| async move {
        let store = &session.store;
        let total = store.count(listing.status).await.map_err(application_failure)?;
        let rules = store.list(&listing.query()).await.map_err(application_failure)?;

        let mut views = Vec::with_capacity(rules.len());
        for rule in rules {
            let (conditions, actions) = if listing.detailed {
                let conditions = store.get_conditions(rule.id).await.map_err(application_failure)?;
                let actions = store.get_actions(rule.id).await.map_err(application_failure)?;
                (Some(conditions), Some(actions))
            } else {
                (None, None)
            };
            views.push(RuleView { rule, conditions, actions });
        }

        let message = format!("{} of {total} rules", views.len());
        let data = to_data(&RuleListing { total, rules: views })?;
        Ok::<_, Failure>(CommandResult::success_with("rules", message, data))
    })
}

pub fn toggle(options: LoadOptions, id: i64) -> CommandResult {
    run_in_session("rules", options, |session| async move {
        let rule = session.store.toggle_status(RuleId(id)).await.map_err(application_failure)?;
        let state = if rule.is_enabled() { "enabled" } else { "disabled" };
        let data = to_data(&rule)?;
        Ok::<_, Failure>(CommandResult::success_with("rules", format!("rule {id} {state}"), data))
    })
}

pub fn delete(options: LoadOptions, id: i64) -> CommandResult {
    run_in_session("rules", options, |session| async move {
        session.store.delete(RuleId(id)).await.map_err(application_failure)?;
        Ok::<_, Failure>(CommandResult::success("rules", format!("rule {id} deleted")))
    })
}

/// Prints the document, or writes it to `output` when given.
pub fn export(options: LoadOptions, output: Option<PathBuf>) -> CommandResult {
    run_in_session("rules", options, |session| async move {
        let document = export_rules(&session.store).await.map_err(application_failure)?;
        let count = document.rules.len();

        let Some(path) = output else {
            let data = to_data(&document)?;
            return Ok(CommandResult::success_with("rules", format!("exported {count} rules"), data));
        };

        let json = serde_json::to_string_pretty(&document)
            .map_err(|error| ("serialization", error.to_string(), 3u8))?;
        fs::write(&path, json)
            .map_err(|error| ("export_write", format!("{}: {error}", path.display()), 5u8))?;
        Ok::<_, Failure>(CommandResult::success(
            "rules",
            format!("exported {count} rules to {}", path.display()),
        ))
    })
}

pub fn import(options: LoadOptions, path: PathBuf) -> CommandResult {
    run_in_session("rules", options, |session| async move {
        let json = fs::read_to_string(&path)
            .map_err(|error| ("import_read", format!("{}: {error}", path.display()), 6u8))?;
        let imported = import_rules(&session.store, &json).await.map_err(application_failure)?;
        Ok::<_, Failure>(CommandResult::success(
            "rules",
            format!("imported {imported} rules from {}", path.display()),
        ))
    })
}
