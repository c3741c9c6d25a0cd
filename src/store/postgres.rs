use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait, QueryFilter,
    Statement, Value,
};
use tracing::debug;

use crate::entities::kv_entry;
use crate::entities::prelude::KvEntry;

use super::{KeyValueStore, MAX_KEY_LEN, StoreError};

// Revives an expired row in place; a live row is left untouched and no row
// is returned, so the caller learns it lost the race.
const INSERT_IF_ABSENT_SQL: &str = r#"
INSERT INTO kv_entries (key, value, expires_at)
VALUES ($1, $2, $3)
ON CONFLICT (key) DO UPDATE
    SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
    WHERE kv_entries.expires_at <= $4
RETURNING key
"#;

pub struct PostgresStore {
    database: DatabaseConnection,
}

impl PostgresStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

fn fixed_now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

fn expiry_from(now: DateTime<FixedOffset>, ttl: Duration) -> Result<DateTime<FixedOffset>, StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl(ttl));
    }
    let delta = chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(ttl))?;
    now.checked_add_signed(delta)
        .ok_or(StoreError::InvalidTtl(ttl))
}

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl KeyValueStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        assert!(key.len() <= MAX_KEY_LEN, "Store key exceeds column bound");
        let row = KvEntry::find_by_id(key.to_string())
            .filter(kv_entry::Column::ExpiresAt.gt(fixed_now()))
            .one(&self.database)
            .await
            .map_err(backend)?;
        Ok(row.map(|model| model.value))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        assert!(key.len() <= MAX_KEY_LEN, "Store key exceeds column bound");
        let expires_at = expiry_from(fixed_now(), ttl)?;
        let row = kv_entry::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            expires_at: Set(expires_at),
        };
        KvEntry::insert(row)
            .on_conflict(
                OnConflict::column(kv_entry::Column::Key)
                    .update_columns([kv_entry::Column::Value, kv_entry::Column::ExpiresAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.database)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        assert!(key.len() <= MAX_KEY_LEN, "Store key exceeds column bound");
        let now = fixed_now();
        let expires_at = expiry_from(now, ttl)?;
        let statement = Statement::from_sql_and_values(
            DbBackend::Postgres,
            INSERT_IF_ABSENT_SQL,
            [
                Value::from(key),
                Value::from(value),
                Value::from(expires_at),
                Value::from(now),
            ],
        );
        let inserted = self
            .database
            .query_one(statement)
            .await
            .map_err(backend)?;
        Ok(inserted.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = KvEntry::delete_by_id(key.to_string())
            .exec(&self.database)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected > 0)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = KvEntry::delete_many()
            .filter(kv_entry::Column::ExpiresAt.lte(fixed_now()))
            .exec(&self.database)
            .await
            .map_err(backend)?;
        debug!("Purged {} expired store rows", result.rows_affected);
        Ok(result.rows_affected)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.database.ping().await.map_err(backend)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use super::*;

    fn row(key: &str, value: &str) -> kv_entry::Model {
        kv_entry::Model {
            key: key.to_string(),
            value: value.to_string(),
            expires_at: fixed_now() + chrono::Duration::hours(24),
        }
    }

    fn store_with(database: MockDatabase) -> PostgresStore {
        PostgresStore::new(database.into_connection())
    }

    #[test]
    fn expiry_is_offset_from_now() {
        let now = fixed_now();
        let expires = expiry_from(now, Duration::from_secs(300)).unwrap();
        assert_eq!((expires - now).num_seconds(), 300);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = expiry_from(fixed_now(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTtl(_)));
    }

    #[test]
    fn conditional_insert_only_revives_expired_rows() {
        assert!(INSERT_IF_ABSENT_SQL.contains("ON CONFLICT (key) DO UPDATE"));
        assert!(INSERT_IF_ABSENT_SQL.contains("WHERE kv_entries.expires_at <= $4"));
        assert!(INSERT_IF_ABSENT_SQL.trim_end().ends_with("RETURNING key"));
    }

    #[tokio::test]
    async fn returned_row_means_the_claim_was_taken() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![row("claim:42", "true")]]),
        );
        let taken = store
            .set_if_absent("claim:42", "true", Duration::from_secs(86_400))
            .await
            .unwrap();
        assert!(taken);
    }

    #[tokio::test]
    async fn empty_result_means_a_live_claim_already_exists() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<kv_entry::Model>::new()]),
        );
        let taken = store
            .set_if_absent("claim:42", "true", Duration::from_secs(86_400))
            .await
            .unwrap();
        assert!(!taken);
    }

    #[tokio::test]
    async fn zero_ttl_claim_never_reaches_the_database() {
        let store = store_with(MockDatabase::new(DatabaseBackend::Postgres));
        let err = store
            .set_if_absent("claim:42", "true", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTtl(_)));
    }

    #[tokio::test]
    async fn get_returns_the_live_value() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![row("nonce:30103", "17")]]),
        );
        assert_eq!(
            store.get("nonce:30103").await.unwrap(),
            Some("17".to_string())
        );
    }

    #[tokio::test]
    async fn get_treats_a_filtered_out_row_as_absent() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<kv_entry::Model>::new()]),
        );
        assert_eq!(store.get("claim:42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_was_removed() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                },
            ]),
        );
        assert!(store.delete("claim:42").await.unwrap());
        assert!(!store.delete("claim:42").await.unwrap());
    }

    #[tokio::test]
    async fn purge_counts_removed_rows() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            }]),
        );
        assert_eq!(store.purge_expired().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn database_errors_surface_as_backend_failures() {
        let store = store_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_errors([DbErr::Custom("connection reset".to_string())]),
        );
        let err = store.get("claim:42").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(message) if message.contains("connection reset")));
    }
}
