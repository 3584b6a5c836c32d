//! JSON export and import of rule definitions.
//!
//! Document shape:
//! `{version, date, rules: [{name, priority, status, exclude_outofstock,
//! conditions: {group_id: [condition]}, actions: [action]}]}`.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::domain::rule::{
    loose_int, ActionDraft, ConditionDraft, ConditionGroup, RuleDraft, RuleQuery, RuleStatus,
    DEFAULT_RULE_PRIORITY,
};
use crate::errors::DomainError;
use crate::ports::PortResult;
use crate::rules::RuleStore;

pub const DOCUMENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub version: String,
    pub date: String,
    pub rules: Vec<RuleRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_priority", deserialize_with = "priority_from_any")]
    pub priority: i64,
    /// `1` enabled, `0` disabled.
    #[serde(default = "default_status", deserialize_with = "status_from_any")]
    pub status: i64,
    #[serde(default)]
    pub exclude_outofstock: Option<bool>,
    #[serde(default)]
    pub conditions: BTreeMap<String, Vec<ConditionDraft>>,
    #[serde(default)]
    pub actions: Vec<ActionDraft>,
}

impl RuleRecord {
    fn draft(&self) -> RuleDraft {
        RuleDraft {
            name: self.name.clone(),
            priority: self.priority,
            status: RuleStatus::from_flag(self.status),
            exclude_outofstock: self.exclude_outofstock,
        }
    }

    fn groups(&self) -> Vec<ConditionGroup> {
        self.conditions
            .iter()
            .map(|(group_id, conditions)| {
                ConditionGroup::new(
                    parse_group_id(group_id),
                    conditions.iter().cloned().map(ConditionDraft::into_condition).collect(),
                )
            })
            .collect()
    }
}

fn default_priority() -> i64 {
    DEFAULT_RULE_PRIORITY
}

fn default_status() -> i64 {
    RuleStatus::Enabled.as_flag()
}

fn priority_from_any<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(loose_int(&value).unwrap_or_else(default_priority))
}

/// Exported documents carry `"1"`/`"0"`; booleans are accepted too.
fn status_from_any<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(enabled) => i64::from(enabled),
        other => loose_int(&other).unwrap_or_else(default_status),
    })
}

/// Non-numeric group ids collapse into group 0.
fn parse_group_id(raw: &str) -> u32 {
    raw.trim().trim_start_matches('-').parse().unwrap_or(0)
}

pub async fn export_rules(store: &RuleStore) -> PortResult<RuleDocument> {
    let rules = store.list(&RuleQuery { limit: u32::MAX, ..RuleQuery::default() }).await?;

    let mut records = Vec::with_capacity(rules.len());
    for rule in rules {
        let conditions = store
            .get_conditions(rule.id)
            .await?
            .into_iter()
            .map(|group| {
                (group.group_id.to_string(), group.conditions.iter().map(ConditionDraft::from).collect())
            })
            .collect();
        let actions = store.get_actions(rule.id).await?.iter().map(ActionDraft::from).collect();

        records.push(RuleRecord {
            name: rule.name,
            priority: rule.priority,
            status: rule.status.as_flag(),
            exclude_outofstock: rule.exclude_outofstock,
            conditions,
            actions,
        });
    }

    Ok(RuleDocument {
        version: DOCUMENT_VERSION.to_owned(),
        date: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        rules: records,
    })
}

/// Creates every named rule in the document through the store, so each is
/// sanitized and indexed. Returns the number of rules created.
pub async fn import_rules(store: &RuleStore, json: &str) -> PortResult<usize> {
    let document: serde_json::Value = serde_json::from_str(json)
        .map_err(|error| DomainError::InvalidImport(format!("malformed JSON: {error}")))?;
    let entries = document
        .get("rules")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| DomainError::InvalidImport("document has no `rules` array".to_owned()))?;

    let mut imported = 0;
    for (position, entry) in entries.iter().enumerate() {
        let record: RuleRecord = match serde_json::from_value(entry.clone()) {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    event_name = "transfer.entry_skipped",
                    position,
                    error = %error,
                    "skipping malformed rule entry"
                );
                continue;
            }
        };
        if record.name.trim().is_empty() {
            continue;
        }

        let rule = store.create(record.draft()).await?;
        let groups = record.groups();
        if !groups.is_empty() {
            store.save_conditions(rule.id, groups).await?;
        }
        if !record.actions.is_empty() {
            let actions = record.actions.iter().cloned().map(ActionDraft::into_action).collect();
            store.save_actions(rule.id, actions).await?;
        }
        imported += 1;
    }

    info!(event_name = "transfer.imported", imported, total = entries.len(), "rules imported");
    Ok(imported)
}
