//! Request hash storage for duplicate detection.

use crate::domain::TimeMs;
use crate::duplicate::{DuplicateNamespace, DuplicateStore};
use async_trait::async_trait;
use sqlx::Row;

use super::Repository;

/// Duplicate store bound to one namespace table.
pub struct NamespacedDuplicates<'a> {
    repo: &'a Repository,
    namespace: DuplicateNamespace,
}

impl Repository {
    pub fn duplicates(&self, namespace: DuplicateNamespace) -> NamespacedDuplicates<'_> {
        NamespacedDuplicates {
            repo: self,
            namespace,
        }
    }

    /// Stored hash for a request id in a namespace.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_duplicate_hash(
        &self,
        namespace: DuplicateNamespace,
        id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        // table names come from a closed enum, never from input
        let sql = format!("SELECT hash FROM {} WHERE id = ?", namespace.table());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("hash")))
    }

    /// Insert a hash unless the id is present. Returns whether a row was written.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn save_duplicate_hash(
        &self,
        namespace: DuplicateNamespace,
        id: &str,
        hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} (id, hash, created_at) VALUES (?, ?, ?) ON CONFLICT(id) DO NOTHING",
            namespace.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(hash)
            .bind(TimeMs::now().as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove the hash stored for a request id.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_duplicate_hash(
        &self,
        namespace: DuplicateNamespace,
        id: &str,
    ) -> Result<(), sqlx::Error> {
        let sql = format!("DELETE FROM {} WHERE id = ?", namespace.table());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl<'a> DuplicateStore for NamespacedDuplicates<'a> {
    async fn get_duplicate(&self, id: &str) -> Result<Option<String>, sqlx::Error> {
        self.repo.get_duplicate_hash(self.namespace, id).await
    }

    async fn save_duplicate_hash(&self, id: &str, hash: &str) -> Result<bool, sqlx::Error> {
        self.repo.save_duplicate_hash(self.namespace, id, hash).await
    }
}
