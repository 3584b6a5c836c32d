use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use shelfmatch_core::domain::product::ProductId;
use shelfmatch_core::ports::{IdListStore, PortResult};

use super::{decode_err, parse_timestamp, RepositoryError};
use crate::DbPool;

pub const BLOB_NAMESPACE: &str = "blob";
pub const CACHE_NAMESPACE: &str = "cache";

/// Keyed product-id lists in the `id_list_store` table, scoped by namespace so
/// the persisted blob store and the TTL cache share one table.
pub struct SqlIdListStore {
    pool: DbPool,
    namespace: &'static str,
}

impl SqlIdListStore {
    pub fn new(pool: DbPool, namespace: &'static str) -> Self {
        Self { pool, namespace }
    }

    pub fn blobs(pool: DbPool) -> Self {
        Self::new(pool, BLOB_NAMESPACE)
    }

    pub fn cache(pool: DbPool) -> Self {
        Self::new(pool, CACHE_NAMESPACE)
    }

    /// Drops rows whose TTL has passed.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM id_list_store
             WHERE namespace = ? AND expires_at IS NOT NULL
               AND julianday(expires_at) <= julianday(?)",
        )
        .bind(self.namespace)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<ProductId>>, RepositoryError> {
        let row = sqlx::query(
            "SELECT ids_json, expires_at FROM id_list_store WHERE namespace = ? AND key = ?",
        )
        .bind(self.namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<String> = row.try_get("expires_at").map_err(decode_err)?;
        if let Some(expires_at) = expires_at {
            if parse_timestamp(&expires_at)? <= Utc::now() {
                return Ok(None);
            }
        }

        let ids_json: String = row.try_get("ids_json").map_err(decode_err)?;
        let ids: Vec<ProductId> = serde_json::from_str(&ids_json).map_err(decode_err)?;
        Ok(Some(ids))
    }

    async fn write(
        &self,
        key: &str,
        ids: &[ProductId],
        ttl: Option<Duration>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let expires_at = ttl
            .map(|ttl| chrono::Duration::from_std(ttl).map(|ttl| (now + ttl).to_rfc3339()))
            .transpose()
            .map_err(decode_err)?;
        let ids_json = serde_json::to_string(ids).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO id_list_store (namespace, key, ids_json, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (namespace, key) DO UPDATE SET
                ids_json = excluded.ids_json,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
        )
        .bind(self.namespace)
        .bind(key)
        .bind(ids_json)
        .bind(expires_at)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM id_list_store WHERE namespace = ? AND key LIKE ? ESCAPE '\\'",
        )
        .bind(self.namespace)
        .bind(format!("{}%", escape_like(prefix)))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[async_trait]
impl IdListStore for SqlIdListStore {
    async fn get(&self, key: &str) -> PortResult<Option<Vec<ProductId>>> {
        Ok(self.read(key).await?)
    }

    async fn set(&self, key: &str, ids: &[ProductId], ttl: Option<Duration>) -> PortResult<()> {
        Ok(self.write(key, ids, ttl).await?)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> PortResult<u64> {
        Ok(self.remove_prefix(prefix).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shelfmatch_core::domain::product::ProductId;
    use shelfmatch_core::ports::IdListStore;

    use super::{escape_like, SqlIdListStore};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn namespaces_do_not_see_each_other() {
        let pool = pool().await;
        let blobs = SqlIdListStore::blobs(pool.clone());
        let cache = SqlIdListStore::cache(pool);

        blobs.set("copurchase:1", &[ProductId(2), ProductId(3)], None).await.expect("set");

        assert_eq!(
            blobs.get("copurchase:1").await.expect("get"),
            Some(vec![ProductId(2), ProductId(3)])
        );
        assert_eq!(cache.get("copurchase:1").await.expect("get"), None);
        assert_eq!(cache.delete_by_prefix("copurchase:").await.expect("delete"), 0);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = SqlIdListStore::cache(pool().await);

        store.set("rec:1:abc", &[ProductId(9)], Some(Duration::ZERO)).await.expect("set");
        store.set("rec:2:abc", &[ProductId(8)], Some(Duration::from_secs(3600))).await.expect("set");

        assert_eq!(store.get("rec:1:abc").await.expect("get"), None);
        assert_eq!(store.get("rec:2:abc").await.expect("get"), Some(vec![ProductId(8)]));
        assert_eq!(store.purge_expired().await.expect("purge"), 1);
    }

    #[tokio::test]
    async fn set_overwrites_and_prefix_delete_counts() {
        let store = SqlIdListStore::cache(pool().await);

        store.set("trending:cat:4", &[ProductId(1)], None).await.expect("set");
        store.set("trending:cat:4", &[ProductId(5), ProductId(6)], None).await.expect("overwrite");
        store.set("trending:global", &[ProductId(1)], None).await.expect("set");
        store.set("similar:1:4", &[ProductId(2)], None).await.expect("set");

        assert_eq!(
            store.get("trending:cat:4").await.expect("get"),
            Some(vec![ProductId(5), ProductId(6)])
        );
        assert_eq!(store.delete_by_prefix("trending:").await.expect("delete"), 2);
        assert!(store.get("similar:1:4").await.expect("get").is_some());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("rec_1%"), "rec\\_1\\%");
    }
}
