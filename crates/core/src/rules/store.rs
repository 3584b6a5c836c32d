use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::rule::{
    Action, Condition, ConditionGroup, IndexEntry, Rule, RuleDraft, RuleId, RulePatch, RuleQuery, RuleStatus,
};
use crate::errors::DomainError;
use crate::ports::{PortResult, RuleRepository, TaxonomyHierarchy};
use crate::rules::index::{IndexBuilder, IndexRebuildReport};

/// Rule CRUD composed with lookup-index maintenance.
///
/// Every write that can change matching (create, update, status toggle,
/// condition save) is a repository write followed by an explicit
/// [`RuleStore::rebuild_index_for_rule`] call, so the index never trails the
/// rule data it was derived from.
#[derive(Clone)]
pub struct RuleStore {
    rules: Arc<dyn RuleRepository>,
    index: IndexBuilder,
}

impl RuleStore {
    pub fn new(rules: Arc<dyn RuleRepository>, taxonomy: Arc<dyn TaxonomyHierarchy>) -> Self {
        let index = IndexBuilder::new(rules.clone(), taxonomy);
        Self { rules, index }
    }

    pub async fn create(&self, draft: RuleDraft) -> PortResult<Rule> {
        let rule = self.rules.insert_rule(draft.sanitized()).await?;
        self.index.rebuild_rule(&rule).await?;

        info!(
            event_name = "rules.created",
            rule_id = rule.id.0,
            priority = rule.priority,
            "rule created"
        );
        Ok(rule)
    }

    pub async fn update(&self, id: RuleId, patch: RulePatch) -> PortResult<Rule> {
        let rule = self
            .rules
            .update_rule(id, patch.sanitized())
            .await?
            .ok_or(DomainError::RuleNotFound(id))?;
        self.index.rebuild_rule(&rule).await?;

        info!(event_name = "rules.updated", rule_id = id.0, "rule updated");
        Ok(rule)
    }

    pub async fn toggle_status(&self, id: RuleId) -> PortResult<Rule> {
        let current = self.get(id).await?;
        let rule = self
            .rules
            .update_rule(id, RulePatch::status(current.status.toggled()))
            .await?
            .ok_or(DomainError::RuleNotFound(id))?;
        self.index.rebuild_rule(&rule).await?;

        info!(
            event_name = "rules.toggled",
            rule_id = id.0,
            enabled = rule.is_enabled(),
            "rule status toggled"
        );
        Ok(rule)
    }

    /// Removes the rule with its conditions, actions and index rows.
    pub async fn delete(&self, id: RuleId) -> PortResult<()> {
        if !self.rules.delete_rule(id).await? {
            return Err(DomainError::RuleNotFound(id).into());
        }

        info!(event_name = "rules.deleted", rule_id = id.0, "rule deleted");
        Ok(())
    }

    pub async fn get(&self, id: RuleId) -> PortResult<Rule> {
        self.rules.find_rule(id).await?.ok_or_else(|| DomainError::RuleNotFound(id).into())
    }

    pub async fn list(&self, query: &RuleQuery) -> PortResult<Vec<Rule>> {
        self.rules.list_rules(query).await
    }

    pub async fn count(&self, status: Option<RuleStatus>) -> PortResult<u64> {
        self.rules.count_rules(status).await
    }

    pub async fn get_conditions(&self, id: RuleId) -> PortResult<Vec<ConditionGroup>> {
        self.rules.load_conditions(id).await
    }

    /// Stores the rule's condition groups and re-indexes it. Conditions
    /// missing an attribute or value are dropped, as are groups left empty.
    /// Groups sharing an id are merged into one AND group.
    pub async fn save_conditions(&self, id: RuleId, groups: Vec<ConditionGroup>) -> PortResult<()> {
        let rule = self.get(id).await?;

        let mut merged: BTreeMap<u32, Vec<Condition>> = BTreeMap::new();
        for group in groups {
            merged.entry(group.group_id).or_default().extend(
                group
                    .conditions
                    .into_iter()
                    .filter(|condition| !condition.attribute.is_empty() && !condition.value.is_empty()),
            );
        }
        let groups: Vec<ConditionGroup> = merged
            .into_iter()
            .filter(|(_, conditions)| !conditions.is_empty())
            .map(|(group_id, conditions)| ConditionGroup::new(group_id, conditions))
            .collect();

        self.rules.replace_conditions(id, &groups).await?;
        self.index.rebuild_rule(&rule).await?;
        Ok(())
    }

    pub async fn get_actions(&self, id: RuleId) -> PortResult<Vec<Action>> {
        self.rules.load_actions(id).await
    }

    /// Actions do not affect which rule matches, so the index is left alone.
    pub async fn save_actions(&self, id: RuleId, actions: Vec<Action>) -> PortResult<()> {
        self.get(id).await?;
        let actions: Vec<Action> =
            actions.into_iter().map(|action| Action { limit: action.limit.max(1), ..action }).collect();
        self.rules.replace_actions(id, &actions).await
    }

    pub async fn index_entries(&self, id: RuleId) -> PortResult<Vec<IndexEntry>> {
        self.rules.index_entries_for(id).await
    }

    pub async fn rebuild_index_for_rule(&self, id: RuleId) -> PortResult<usize> {
        let rule = self.get(id).await?;
        self.index.rebuild_rule(&rule).await
    }

    pub async fn rebuild_full_index(&self) -> PortResult<IndexRebuildReport> {
        self.index.rebuild_all().await
    }
}
