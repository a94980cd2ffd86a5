//! Transactional persistence for the API catalog.
//!
//! The store exclusively owns the backing rows; every other component
//! sees either a loaded [`ApiConfig`] snapshot or the compiled routing
//! table derived from one. All mutating operations run inside a single
//! SQLite transaction so children can never be orphaned.
//!
//! SQLite has a single writer; the pool is kept small and a busy timeout
//! absorbs short write contention. This is adequate for a control-plane
//! catalog mutated at operator cadence.

pub mod models;

use std::time::Duration;

use chrono::Utc;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use thiserror::Error;

pub use models::{ApiConfig, ApiKey, ApiParameter, NewApiConfig, ParameterLocation};

/// Errors surfaced by catalog operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn conflict_on_unique(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        _ => StoreError::Database(err),
    }
}

#[derive(FromRow)]
struct ConfigRow {
    id: i64,
    path: String,
    upstream: String,
    required_subscription: String,
    required_headers: String,
    last_accessed: Option<chrono::DateTime<Utc>>,
    request_count: i64,
}

#[derive(FromRow)]
struct ParameterRow {
    name: String,
    location: String,
    required: bool,
    validation: String,
}

#[derive(FromRow)]
struct KeyRow {
    key: String,
    name: String,
    is_active: bool,
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// Handle to the API catalog database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ApiStore {
    pool: SqlitePool,
}

impl ApiStore {
    /// Open (creating if missing) the catalog database at `db_path`.
    pub async fn open(db_path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Run embedded schema migrations. Mandatory before first use.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert a config together with its methods, parameters and keys in
    /// one transaction. Fails with [`StoreError::Conflict`] when the path
    /// (or any key value) already exists.
    pub async fn create(&self, new: NewApiConfig) -> StoreResult<ApiConfig> {
        if new.path.is_empty() || new.upstream.is_empty() {
            return Err(StoreError::Validation(
                "path and upstream are required".into(),
            ));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO api_configs \
             (path, upstream, required_subscription, required_headers, request_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&new.path)
        .bind(&new.upstream)
        .bind(&new.required_subscription)
        .bind(serde_json::to_string(&new.required_headers).unwrap_or_else(|_| "[]".into()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "API path"))?;

        let id = result.last_insert_rowid();
        Self::insert_children(&mut tx, id, &new).await?;
        tx.commit().await?;

        self.load_config(id).await
    }

    /// Longest wildcard-stripped-prefix match for a request path, with
    /// children eagerly loaded. No match is `Ok(None)`, not an error.
    pub async fn get_by_path(&self, request_path: &str) -> StoreResult<Option<ApiConfig>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, path FROM api_configs")
            .fetch_all(&self.pool)
            .await?;

        let best = rows
            .into_iter()
            .filter(|(_, path)| request_path.starts_with(models::stem(path)))
            .max_by_key(|(_, path)| models::stem(path).len());

        match best {
            Some((id, _)) => Ok(Some(self.load_config(id).await?)),
            None => Ok(None),
        }
    }

    /// All live configs with children, ordered by path.
    pub async fn list(&self) -> StoreResult<Vec<ApiConfig>> {
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM api_configs ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        let mut configs = Vec::with_capacity(ids.len());
        for (id,) in ids {
            configs.push(self.load_config(id).await?);
        }
        Ok(configs)
    }

    /// Replace the config addressed by `path`.
    ///
    /// Methods and parameters are fully replaced by the incoming set;
    /// keys are upserted: an incoming key matching an existing `key`
    /// value updates that row in place, new keys are appended, and keys
    /// omitted from the payload are left untouched.
    pub async fn update(&self, path: &str, new: NewApiConfig) -> StoreResult<ApiConfig> {
        if new.path.is_empty() || new.upstream.is_empty() {
            return Err(StoreError::Validation(
                "path and upstream are required".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let id = match Self::find_id(&mut tx, path).await? {
            Some(id) => id,
            None => return Err(StoreError::NotFound("API")),
        };

        sqlx::query(
            "UPDATE api_configs SET path = ?, upstream = ?, required_subscription = ?, \
             required_headers = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&new.path)
        .bind(&new.upstream)
        .bind(&new.required_subscription)
        .bind(serde_json::to_string(&new.required_headers).unwrap_or_else(|_| "[]".into()))
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "API path"))?;

        sqlx::query("DELETE FROM api_methods WHERE api_config_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_parameters WHERE api_config_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for method in &new.methods {
            sqlx::query("INSERT INTO api_methods (api_config_id, method) VALUES (?, ?)")
                .bind(id)
                .bind(method)
                .execute(&mut *tx)
                .await?;
        }
        for parameter in &new.parameters {
            Self::insert_parameter(&mut tx, id, parameter).await?;
        }

        for key in &new.api_keys {
            let updated = sqlx::query(
                "UPDATE api_keys SET name = ?, is_active = ?, expires_at = ? \
                 WHERE api_config_id = ? AND key = ?",
            )
            .bind(&key.name)
            .bind(key.is_active)
            .bind(key.expires_at)
            .bind(id)
            .bind(&key.key)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                Self::insert_key(&mut tx, id, key).await?;
            }
        }

        tx.commit().await?;
        self.load_config(id).await
    }

    /// Delete a config and cascade to its methods, parameters and keys
    /// within one transaction.
    pub async fn delete(&self, path: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let id = match Self::find_id(&mut tx, path).await? {
            Some(id) => id,
            None => return Err(StoreError::NotFound("API")),
        };

        sqlx::query("DELETE FROM api_keys WHERE api_config_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_parameters WHERE api_config_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_methods WHERE api_config_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_configs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Append keys to the config at `path`. Keys whose value already
    /// exists anywhere in the catalog are silently skipped; the returned
    /// count reflects only actual inserts.
    pub async fn add_keys(
        &self,
        path: &str,
        keys: Vec<ApiKey>,
    ) -> StoreResult<(ApiConfig, usize)> {
        let mut tx = self.pool.begin().await?;

        let id = match Self::find_id(&mut tx, path).await? {
            Some(id) => id,
            None => return Err(StoreError::NotFound("API")),
        };

        let mut added = 0usize;
        for key in &keys {
            let exists: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM api_keys WHERE key = ?")
                    .bind(&key.key)
                    .fetch_one(&mut *tx)
                    .await?;
            if exists.0 > 0 {
                continue;
            }
            Self::insert_key(&mut tx, id, key).await?;
            added += 1;
        }

        tx.commit().await?;
        Ok((self.load_config(id).await?, added))
    }

    /// Flip the active flag of one key. `NotFound` when either the path
    /// or the key is absent.
    pub async fn set_key_active(
        &self,
        path: &str,
        key: &str,
        active: bool,
    ) -> StoreResult<ApiConfig> {
        let mut tx = self.pool.begin().await?;

        let id = match Self::find_id(&mut tx, path).await? {
            Some(id) => id,
            None => return Err(StoreError::NotFound("API")),
        };

        let updated = sqlx::query(
            "UPDATE api_keys SET is_active = ? WHERE api_config_id = ? AND key = ?",
        )
        .bind(active)
        .bind(id)
        .bind(key)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("API key"));
        }

        tx.commit().await?;
        self.load_config(id).await
    }

    /// Remove one key from the config at `path`.
    pub async fn delete_key(&self, path: &str, key: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let id = match Self::find_id(&mut tx, path).await? {
            Some(id) => id,
            None => return Err(StoreError::NotFound("API")),
        };

        let deleted = sqlx::query("DELETE FROM api_keys WHERE api_config_id = ? AND key = ?")
            .bind(id)
            .bind(key)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound("API key"));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Best-effort usage counters: `last_accessed = now`,
    /// `request_count += 1`. Failures are logged, never propagated.
    pub async fn increment_stats(&self, path: &str) {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE api_configs SET last_accessed = ?, request_count = request_count + 1, \
             updated_at = ? WHERE path = ?",
        )
        .bind(now)
        .bind(now)
        .bind(path)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(path, error = %e, "failed to update API usage stats");
        }
    }

    async fn find_id(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        path: &str,
    ) -> StoreResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM api_configs WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn insert_children(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        new: &NewApiConfig,
    ) -> StoreResult<()> {
        for method in &new.methods {
            sqlx::query("INSERT INTO api_methods (api_config_id, method) VALUES (?, ?)")
                .bind(id)
                .bind(method)
                .execute(&mut **tx)
                .await?;
        }
        for parameter in &new.parameters {
            Self::insert_parameter(tx, id, parameter).await?;
        }
        for key in &new.api_keys {
            Self::insert_key(tx, id, key).await?;
        }
        Ok(())
    }

    async fn insert_parameter(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        parameter: &ApiParameter,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_parameters (api_config_id, name, location, required, validation) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&parameter.name)
        .bind(parameter.location.as_str())
        .bind(parameter.required)
        .bind(&parameter.validation)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_key(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        key: &ApiKey,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_keys (api_config_id, key, name, is_active, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&key.key)
        .bind(&key.name)
        .bind(key.is_active)
        .bind(key.expires_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| conflict_on_unique(e, "API key"))?;
        Ok(())
    }

    async fn load_config(&self, id: i64) -> StoreResult<ApiConfig> {
        let row: ConfigRow = sqlx::query_as(
            "SELECT id, path, upstream, required_subscription, required_headers, \
             last_accessed, request_count FROM api_configs WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let methods: Vec<(String,)> =
            sqlx::query_as("SELECT method FROM api_methods WHERE api_config_id = ? ORDER BY id")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let parameter_rows: Vec<ParameterRow> = sqlx::query_as(
            "SELECT name, location, required, validation FROM api_parameters \
             WHERE api_config_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let key_rows: Vec<KeyRow> = sqlx::query_as(
            "SELECT key, name, is_active, expires_at FROM api_keys \
             WHERE api_config_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let required_headers: Vec<String> = serde_json::from_str(&row.required_headers)
            .unwrap_or_else(|e| {
                tracing::warn!(path = %row.path, error = %e, "malformed required_headers column");
                Vec::new()
            });

        let parameters = parameter_rows
            .into_iter()
            .filter_map(|p| {
                let location = match p.location.as_str() {
                    "query" => ParameterLocation::Query,
                    "path" => ParameterLocation::Path,
                    "header" => ParameterLocation::Header,
                    "body" => ParameterLocation::Body,
                    other => {
                        tracing::warn!(name = %p.name, location = other, "unknown parameter location");
                        return None;
                    }
                };
                Some(ApiParameter {
                    name: p.name,
                    location,
                    required: p.required,
                    validation: p.validation,
                })
            })
            .collect();

        Ok(ApiConfig {
            id: row.id,
            path: row.path,
            upstream: row.upstream,
            required_subscription: row.required_subscription,
            required_headers,
            last_accessed: row.last_accessed,
            request_count: row.request_count,
            methods: methods.into_iter().map(|(m,)| m).collect(),
            parameters,
            api_keys: key_rows
                .into_iter()
                .map(|k| ApiKey {
                    key: k.key,
                    name: k.name,
                    is_active: k.is_active,
                    expires_at: k.expires_at,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch_store() -> (ApiStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("catalog.db");
        let store = ApiStore::open(db_path.to_str().unwrap()).await.unwrap();
        store.migrate().await.unwrap();
        (store, dir)
    }

    fn weather_config() -> NewApiConfig {
        NewApiConfig {
            path: "/weather/*".into(),
            upstream: "http://u:8083/weather".into(),
            required_subscription: "sub".into(),
            required_headers: vec!["X-Test-Header".into()],
            methods: vec!["GET".into()],
            parameters: vec![],
            api_keys: vec![ApiKey {
                key: "K1".into(),
                name: "k".into(),
                is_active: true,
                expires_at: None,
            }],
        }
    }

    #[tokio::test]
    async fn create_then_prefix_match_round_trip() {
        let (store, _dir) = scratch_store().await;
        let created = store.create(weather_config()).await.unwrap();

        let found = store.get_by_path("/weather/current").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.methods, vec!["GET"]);
        assert_eq!(found.required_headers, vec!["X-Test-Header"]);
        assert_eq!(found.api_keys.len(), 1);
        assert!(found.api_keys[0].is_active);
    }

    #[tokio::test]
    async fn duplicate_path_conflicts() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        let mut second = weather_config();
        second.api_keys.clear();
        let err = store.create(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_key_value_conflicts_across_configs() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        let mut other = weather_config();
        other.path = "/climate/*".into();
        let err = store.create(other).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        let mut nested = weather_config();
        nested.path = "/weather/alerts/*".into();
        nested.api_keys = vec![ApiKey {
            key: "K2".into(),
            name: String::new(),
            is_active: true,
            expires_at: None,
        }];
        store.create(nested).await.unwrap();

        let found = store
            .get_by_path("/weather/alerts/today")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.path, "/weather/alerts/*");

        let found = store.get_by_path("/weather/current").await.unwrap().unwrap();
        assert_eq!(found.path, "/weather/*");

        assert!(store.get_by_path("/nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();
        store.delete("/weather/*").await.unwrap();

        assert!(store.get_by_path("/weather/current").await.unwrap().is_none());

        for table in ["api_keys", "api_parameters", "api_methods"] {
            let orphans: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&store.pool)
                .await
                .unwrap();
            assert_eq!(orphans.0, 0, "{table} rows leaked");
        }

        let err = store.delete("/weather/*").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn add_keys_skips_duplicates() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        let (config, added) = store
            .add_keys(
                "/weather/*",
                vec![
                    ApiKey {
                        key: "K1".into(),
                        name: "dup".into(),
                        is_active: true,
                        expires_at: None,
                    },
                    ApiKey {
                        key: "K2".into(),
                        name: "fresh".into(),
                        is_active: false,
                        expires_at: None,
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(added, 1);
        assert_eq!(config.api_keys.len(), 2);
        // The duplicate did not overwrite the original row.
        assert_eq!(config.find_key("K1").unwrap().name, "k");
    }

    #[tokio::test]
    async fn set_key_active_and_delete_key() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        let config = store
            .set_key_active("/weather/*", "K1", false)
            .await
            .unwrap();
        assert!(!config.find_key("K1").unwrap().is_active);

        let err = store
            .set_key_active("/weather/*", "missing", true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound("API key")));

        let err = store
            .set_key_active("/nowhere/*", "K1", true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound("API")));

        store.delete_key("/weather/*", "K1").await.unwrap();
        let err = store.delete_key("/weather/*", "K1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound("API key")));
    }

    #[tokio::test]
    async fn update_replaces_methods_and_upserts_keys() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        let updated = store
            .update(
                "/weather/*",
                NewApiConfig {
                    path: "/weather/*".into(),
                    upstream: "http://u:9090/v2".into(),
                    required_subscription: "sub".into(),
                    required_headers: vec![],
                    methods: vec!["GET".into(), "POST".into()],
                    parameters: vec![],
                    api_keys: vec![
                        // Existing key updated in place.
                        ApiKey {
                            key: "K1".into(),
                            name: "renamed".into(),
                            is_active: false,
                            expires_at: None,
                        },
                        // New key appended.
                        ApiKey {
                            key: "K9".into(),
                            name: "extra".into(),
                            is_active: true,
                            expires_at: None,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.upstream, "http://u:9090/v2");
        assert_eq!(updated.methods, vec!["GET", "POST"]);
        assert_eq!(updated.api_keys.len(), 2);
        assert_eq!(updated.find_key("K1").unwrap().name, "renamed");
        assert!(!updated.find_key("K1").unwrap().is_active);

        // Keys omitted from a later update payload survive.
        let updated = store
            .update(
                "/weather/*",
                NewApiConfig {
                    path: "/weather/*".into(),
                    upstream: "http://u:9090/v2".into(),
                    required_subscription: "sub".into(),
                    required_headers: vec![],
                    methods: vec!["GET".into()],
                    parameters: vec![],
                    api_keys: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.api_keys.len(), 2);

        let err = store
            .update("/missing/*", weather_config())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn increment_stats_bumps_counters() {
        let (store, _dir) = scratch_store().await;
        store.create(weather_config()).await.unwrap();

        store.increment_stats("/weather/*").await;
        store.increment_stats("/weather/*").await;
        // Unknown paths are swallowed.
        store.increment_stats("/missing/*").await;

        let config = store.get_by_path("/weather/x").await.unwrap().unwrap();
        assert_eq!(config.request_count, 2);
        assert!(config.last_accessed.is_some());
    }
}
