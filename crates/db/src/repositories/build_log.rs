use async_trait::async_trait;
use sqlx::Row;

use shelfmatch_core::ports::{BuildLog, PortResult};
use shelfmatch_core::smart::{LastBuild, SmartBuildReport};

use super::{decode_err, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Last smart build, kept in the one-row `smart_builds` table.
pub struct SqlBuildLog {
    pool: DbPool,
}

impl SqlBuildLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn read(&self) -> Result<Option<LastBuild>, RepositoryError> {
        let row = sqlx::query("SELECT built_at, report_json FROM smart_builds WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let built_at: String = row.try_get("built_at").map_err(decode_err)?;
        let report_json: String = row.try_get("report_json").map_err(decode_err)?;
        let report: SmartBuildReport = serde_json::from_str(&report_json).map_err(decode_err)?;
        Ok(Some(LastBuild { built_at: parse_timestamp(&built_at)?, report }))
    }

    async fn write(&self, build: &LastBuild) -> Result<(), RepositoryError> {
        let report_json = serde_json::to_string(&build.report).map_err(decode_err)?;
        sqlx::query(
            "INSERT INTO smart_builds (id, built_at, report_json) VALUES (1, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                built_at = excluded.built_at,
                report_json = excluded.report_json",
        )
        .bind(build.built_at.to_rfc3339())
        .bind(report_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM smart_builds").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BuildLog for SqlBuildLog {
    async fn last_build(&self) -> PortResult<Option<LastBuild>> {
        Ok(self.read().await?)
    }

    async fn save_build(&self, build: &LastBuild) -> PortResult<()> {
        Ok(self.write(build).await?)
    }

    async fn clear(&self) -> PortResult<()> {
        Ok(self.remove().await?)
    }
}
