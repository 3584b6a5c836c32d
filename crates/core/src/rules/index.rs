//! Maintenance of the condition-key lookup index.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::rule::{ConditionGroup, ConditionKey, IndexEntry, Rule, RuleQuery};
use crate::ports::{PortResult, RuleRepository, TaxonomyHierarchy};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexRebuildReport {
    pub cleared: u64,
    pub rules: usize,
    pub entries: usize,
}

#[derive(Clone)]
pub struct IndexBuilder {
    rules: Arc<dyn RuleRepository>,
    taxonomy: Arc<dyn TaxonomyHierarchy>,
}

impl IndexBuilder {
    pub fn new(rules: Arc<dyn RuleRepository>, taxonomy: Arc<dyn TaxonomyHierarchy>) -> Self {
        Self { rules, taxonomy }
    }

    /// Replaces the rule's index rows and returns how many were written.
    /// Disabled rules end up with none.
    pub async fn rebuild_rule(&self, rule: &Rule) -> PortResult<usize> {
        if !rule.is_enabled() {
            self.rules.replace_index_entries(rule.id, &[]).await?;
            debug!(
                event_name = "index.rule_cleared",
                rule_id = rule.id.0,
                "disabled rule removed from lookup index"
            );
            return Ok(0);
        }

        let groups = self.rules.load_conditions(rule.id).await?;
        let keys = index_keys(self.taxonomy.as_ref(), &groups).await?;
        let entries: Vec<IndexEntry> = keys
            .into_iter()
            .map(|condition_key| IndexEntry { condition_key, rule_id: rule.id, priority: rule.priority })
            .collect();

        self.rules.replace_index_entries(rule.id, &entries).await?;
        debug!(
            event_name = "index.rule_rebuilt",
            rule_id = rule.id.0,
            entries = entries.len(),
            "lookup index rebuilt for rule"
        );

        Ok(entries.len())
    }

    /// Truncates the index and re-indexes every enabled rule.
    pub async fn rebuild_all(&self) -> PortResult<IndexRebuildReport> {
        let cleared = self.rules.clear_index().await?;
        let rules = self.rules.list_rules(&RuleQuery::enabled()).await?;

        let mut entries = 0;
        for rule in &rules {
            entries += self.rebuild_rule(rule).await?;
        }

        info!(
            event_name = "index.full_rebuild",
            cleared,
            rules = rules.len(),
            entries,
            "lookup index rebuilt"
        );

        Ok(IndexRebuildReport { cleared, rules: rules.len(), entries })
    }
}

/// Distinct keys a set of condition groups contributes to the index,
/// including descendant terms of `include_children` conditions.
pub async fn index_keys(
    taxonomy: &dyn TaxonomyHierarchy,
    groups: &[ConditionGroup],
) -> PortResult<BTreeSet<ConditionKey>> {
    let mut keys = BTreeSet::new();

    for condition in groups.iter().flat_map(|group| group.conditions.iter()) {
        if condition.attribute.is_empty() {
            continue;
        }
        keys.insert(condition.key());

        if !condition.include_children || !taxonomy.is_hierarchical(&condition.attribute).await? {
            continue;
        }

        let Some(term_id) = taxonomy.resolve_term(&condition.attribute, &condition.value).await?
        else {
            debug!(
                event_name = "index.term_unresolved",
                taxonomy = %condition.attribute,
                slug = %condition.value,
                "include_children term not found; indexing base key only"
            );
            continue;
        };

        for descendant in taxonomy.descendant_term_ids(term_id, &condition.attribute).await? {
            if let Some(slug) = taxonomy.term_slug(descendant, &condition.attribute).await? {
                keys.insert(ConditionKey::new(&condition.attribute, &slug));
            }
        }
    }

    Ok(keys)
}
