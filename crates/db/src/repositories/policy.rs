use sqlx::Row;

use super::{decode_err, PolicyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPolicyRepository {
    pool: DbPool,
}

impl SqlPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PolicyRepository for SqlPolicyRepository {
    async fn active_policy(&self) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT content FROM policy_documents
             WHERE active = 1 AND TRIM(content) != ''
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.try_get::<String, _>("content").map_err(decode_err)).transpose()
    }
}
