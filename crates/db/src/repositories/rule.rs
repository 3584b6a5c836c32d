use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use shelfmatch_core::domain::rule::{
    Action, ActionSource, Condition, ConditionGroup, ConditionKey, ConditionOperator, IndexEntry,
    OrderBy, Rule, RuleDraft, RuleId, RulePatch, RuleQuery, RuleStatus,
};
use shelfmatch_core::ports::{PortResult, RuleRepository};

use super::{decode_err, parse_timestamp, RepositoryError};
use crate::DbPool;

const RULE_COLUMNS: &str =
    "id, name, priority, status, exclude_outofstock, created_at, updated_at";

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_rule(&self, id: RuleId) -> Result<Option<Rule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn insert(&self, draft: RuleDraft) -> Result<Rule, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO rules (name, priority, status, exclude_outofstock, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.name)
        .bind(draft.priority)
        .bind(draft.status.as_flag())
        .bind(draft.exclude_outofstock)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = RuleId(result.last_insert_rowid());
        self.fetch_rule(id)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("rule {id} vanished after insert")))
    }

    async fn update(&self, id: RuleId, patch: RulePatch) -> Result<Option<Rule>, RepositoryError> {
        let Some(current) = self.fetch_rule(id).await? else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(Some(current));
        }

        sqlx::query(
            "UPDATE rules
             SET name = ?, priority = ?, status = ?, exclude_outofstock = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(patch.name.unwrap_or(current.name))
        .bind(patch.priority.unwrap_or(current.priority))
        .bind(patch.status.unwrap_or(current.status).as_flag())
        .bind(patch.exclude_outofstock.unwrap_or(current.exclude_outofstock))
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        self.fetch_rule(id).await
    }

    async fn delete(&self, id: RuleId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rule_index WHERE rule_id = ?").bind(id.0).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM rule_actions WHERE rule_id = ?").bind(id.0).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM rule_conditions WHERE rule_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM rules WHERE id = ?").bind(id.0).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn list(&self, query: &RuleQuery) -> Result<Vec<Rule>, RepositoryError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RULE_COLUMNS} FROM rules"));
        if let Some(status) = query.status {
            builder.push(" WHERE status = ").push_bind(status.as_flag());
        }
        builder
            .push(format!(
                " ORDER BY {} {}, id ASC LIMIT ",
                query.order_by.column(),
                if query.descending { "DESC" } else { "ASC" }
            ))
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn count(&self, status: Option<RuleStatus>) -> Result<u64, RepositoryError> {
        let count: i64 = match status {
            Some(status) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM rules WHERE status = ?")
                    .bind(status.as_flag())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query_scalar("SELECT COUNT(*) FROM rules").fetch_one(&self.pool).await?,
        };
        Ok(count.max(0) as u64)
    }

    async fn conditions(&self, id: RuleId) -> Result<Vec<ConditionGroup>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT group_id, attribute, operator, value, include_children
             FROM rule_conditions WHERE rule_id = ?
             ORDER BY group_id ASC, id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut groups: Vec<ConditionGroup> = Vec::new();
        for row in &rows {
            let group_id: i64 = row.try_get("group_id").map_err(decode_err)?;
            let group_id = u32::try_from(group_id).map_err(decode_err)?;
            let operator: String = row.try_get("operator").map_err(decode_err)?;
            let include_children: i64 = row.try_get("include_children").map_err(decode_err)?;
            let condition = Condition {
                attribute: row.try_get("attribute").map_err(decode_err)?,
                operator: ConditionOperator::parse_or_default(&operator),
                value: row.try_get("value").map_err(decode_err)?,
                include_children: include_children != 0,
            };

            match groups.last_mut() {
                Some(group) if group.group_id == group_id => group.conditions.push(condition),
                _ => groups.push(ConditionGroup::new(group_id, vec![condition])),
            }
        }

        Ok(groups)
    }

    async fn store_conditions(
        &self,
        id: RuleId,
        groups: &[ConditionGroup],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rule_conditions WHERE rule_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        for group in groups {
            for condition in &group.conditions {
                sqlx::query(
                    "INSERT INTO rule_conditions
                        (rule_id, group_id, attribute, operator, value, include_children)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(id.0)
                .bind(i64::from(group.group_id))
                .bind(&condition.attribute)
                .bind(condition.operator.as_str())
                .bind(&condition.value)
                .bind(i64::from(condition.include_children))
                .execute(&mut *tx)
                .await?;
            }
        }
        touch_rule(&mut tx, id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn actions(&self, id: RuleId) -> Result<Vec<Action>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT source, value, action_limit, orderby, include_children
             FROM rule_actions WHERE rule_id = ?
             ORDER BY position ASC, id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_action).collect()
    }

    async fn store_actions(&self, id: RuleId, actions: &[Action]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rule_actions WHERE rule_id = ?").bind(id.0).execute(&mut *tx).await?;
        for (position, action) in actions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO rule_actions
                    (rule_id, position, source, value, action_limit, orderby, include_children)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id.0)
            .bind(position as i64)
            .bind(action.source.kind())
            .bind(action.source.value())
            .bind(i64::from(action.limit))
            .bind(action.orderby.as_str())
            .bind(i64::from(action.source.include_children()))
            .execute(&mut *tx)
            .await?;
        }
        touch_rule(&mut tx, id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn store_index_entries(
        &self,
        id: RuleId,
        entries: &[IndexEntry],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rule_index WHERE rule_id = ?").bind(id.0).execute(&mut *tx).await?;
        for entry in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO rule_index (condition_key, rule_id, priority)
                 VALUES (?, ?, ?)",
            )
            .bind(entry.condition_key.as_str())
            .bind(entry.rule_id.0)
            .bind(entry.priority)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn entries_for(&self, id: RuleId) -> Result<Vec<IndexEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT condition_key, rule_id, priority FROM rule_index
             WHERE rule_id = ? ORDER BY condition_key ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IndexEntry {
                    condition_key: ConditionKey(row.try_get("condition_key").map_err(decode_err)?),
                    rule_id: RuleId(row.try_get("rule_id").map_err(decode_err)?),
                    priority: row.try_get("priority").map_err(decode_err)?,
                })
            })
            .collect()
    }

    async fn truncate_index(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM rule_index").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn candidates(&self, keys: &[ConditionKey]) -> Result<Vec<RuleId>, RepositoryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT rule_id, MIN(priority) AS priority FROM rule_index WHERE condition_key IN (",
        );
        let mut separated = builder.separated(", ");
        for key in keys {
            separated.push_bind(key.as_str());
        }
        separated.push_unseparated(") GROUP BY rule_id ORDER BY priority ASC, rule_id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("rule_id").map(RuleId).map_err(decode_err))
            .collect()
    }
}

async fn touch_rule(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    id: RuleId,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE rules SET updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn row_to_rule(row: &SqliteRow) -> Result<Rule, RepositoryError> {
    let status: i64 = row.try_get("status").map_err(decode_err)?;
    let exclude_outofstock: Option<i64> = row.try_get("exclude_outofstock").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(Rule {
        id: RuleId(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        priority: row.try_get("priority").map_err(decode_err)?,
        status: RuleStatus::from_flag(status),
        exclude_outofstock: exclude_outofstock.map(|flag| flag != 0),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_action(row: &SqliteRow) -> Result<Action, RepositoryError> {
    let source: String = row.try_get("source").map_err(decode_err)?;
    let value: String = row.try_get("value").map_err(decode_err)?;
    let limit: i64 = row.try_get("action_limit").map_err(decode_err)?;
    let orderby: String = row.try_get("orderby").map_err(decode_err)?;
    let include_children: i64 = row.try_get("include_children").map_err(decode_err)?;

    Ok(Action {
        source: ActionSource::from_parts(&source, &value, include_children != 0),
        limit: u32::try_from(limit.max(1)).unwrap_or(u32::MAX),
        orderby: OrderBy::parse_or_default(&orderby),
    })
}

#[async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn insert_rule(&self, draft: RuleDraft) -> PortResult<Rule> {
        Ok(self.insert(draft).await?)
    }

    async fn update_rule(&self, id: RuleId, patch: RulePatch) -> PortResult<Option<Rule>> {
        Ok(self.update(id, patch).await?)
    }

    async fn delete_rule(&self, id: RuleId) -> PortResult<bool> {
        Ok(self.delete(id).await?)
    }

    async fn find_rule(&self, id: RuleId) -> PortResult<Option<Rule>> {
        Ok(self.fetch_rule(id).await?)
    }

    async fn list_rules(&self, query: &RuleQuery) -> PortResult<Vec<Rule>> {
        Ok(self.list(query).await?)
    }

    async fn count_rules(&self, status: Option<RuleStatus>) -> PortResult<u64> {
        Ok(self.count(status).await?)
    }

    async fn load_conditions(&self, id: RuleId) -> PortResult<Vec<ConditionGroup>> {
        Ok(self.conditions(id).await?)
    }

    async fn replace_conditions(&self, id: RuleId, groups: &[ConditionGroup]) -> PortResult<()> {
        Ok(self.store_conditions(id, groups).await?)
    }

    async fn load_actions(&self, id: RuleId) -> PortResult<Vec<Action>> {
        Ok(self.actions(id).await?)
    }

    async fn replace_actions(&self, id: RuleId, actions: &[Action]) -> PortResult<()> {
        Ok(self.store_actions(id, actions).await?)
    }

    async fn replace_index_entries(&self, id: RuleId, entries: &[IndexEntry]) -> PortResult<()> {
        Ok(self.store_index_entries(id, entries).await?)
    }

    async fn index_entries_for(&self, id: RuleId) -> PortResult<Vec<IndexEntry>> {
        Ok(self.entries_for(id).await?)
    }

    async fn clear_index(&self) -> PortResult<u64> {
        Ok(self.truncate_index().await?)
    }

    async fn candidate_rules(&self, keys: &[ConditionKey]) -> PortResult<Vec<RuleId>> {
        Ok(self.candidates(keys).await?)
    }
}
