use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Surreal,
};

use crate::error::AppError;

/// External key-value store consumed by the L2 cache layer.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> Result<(), AppError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError>;
}

#[derive(Debug, Deserialize)]
struct KvRecord {
    value: String,
    expires_at: DateTime<Utc>,
}

/// SurrealDB-backed `KvStore`.
///
/// Values are opaque bytes, stored base64-encoded; expiry is checked on read
/// so a lagging cleanup never serves stale entries.
#[derive(Clone)]
pub struct SurrealKvClient {
    pub client: Surreal<Any>,
}

impl SurrealKvClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, AppError> {
        let db = connect(address).await?;
        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        let client = Self { client: db };
        client.ensure_initialized().await?;
        Ok(client)
    }

    /// In-memory instance for tests.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, AppError> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;

        let client = Self { client: db };
        client.ensure_initialized().await?;
        Ok(client)
    }

    async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.client
            .query(
                "DEFINE TABLE IF NOT EXISTS kv_entry SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS unique_kv_key ON TABLE kv_entry FIELDS key UNIQUE;",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SurrealKvClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let mut response = self
            .client
            .query("SELECT value, expires_at FROM kv_entry WHERE key = $key LIMIT 1")
            .bind(("key", key.to_string()))
            .await?;
        let records: Vec<KvRecord> = response.take(0)?;

        let Some(record) = records.into_iter().next() else {
            return Ok(None);
        };

        if Utc::now() >= record.expires_at {
            self.client
                .query("DELETE kv_entry WHERE key = $key")
                .bind(("key", key.to_string()))
                .await?;
            return Ok(None);
        }

        let bytes = BASE64
            .decode(record.value)
            .map_err(|e| AppError::InternalError(format!("corrupt kv value: {e}")))?;
        Ok(Some(bytes))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: u64) -> Result<(), AppError> {
        let expires_at =
            Utc::now() + Duration::milliseconds(i64::try_from(ttl_ms).unwrap_or(i64::MAX));
        let encoded = BASE64.encode(value);

        self.client
            .query(
                "DELETE kv_entry WHERE key = $key;
                 CREATE kv_entry SET key = $key, value = $value, expires_at = $expires_at;",
            )
            .bind(("key", key.to_string()))
            .bind(("value", encoded))
            .bind(("expires_at", expires_at))
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        self.client
            .query("DELETE kv_entry WHERE string::starts_with(key, $prefix)")
            .bind(("prefix", prefix.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup() -> SurrealKvClient {
        SurrealKvClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_bytes() {
        let kv = setup().await;
        kv.put("v1:mock:en:ru:abc", b"payload".to_vec(), 60_000)
            .await
            .expect("put");

        let value = kv.get("v1:mock:en:ru:abc").await.expect("get");
        assert_eq!(value, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn get_misses_after_expiry() {
        let kv = setup().await;
        kv.put("short-lived", b"x".to_vec(), 0).await.expect("put");

        let value = kv.get("short-lived").await.expect("get");
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let kv = setup().await;
        kv.put("k", b"one".to_vec(), 60_000).await.expect("put");
        kv.put("k", b"two".to_vec(), 60_000).await.expect("put");

        let value = kv.get("k").await.expect("get");
        assert_eq!(value, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn delete_prefix_purges_matching_keys() {
        let kv = setup().await;
        kv.put("v1:mock:en:ru:a", b"1".to_vec(), 60_000)
            .await
            .expect("put");
        kv.put("v1:mock:en:de:b", b"2".to_vec(), 60_000)
            .await
            .expect("put");
        kv.put("v1:other:en:ru:c", b"3".to_vec(), 60_000)
            .await
            .expect("put");

        kv.delete_prefix("v1:mock:").await.expect("delete");

        assert_eq!(kv.get("v1:mock:en:ru:a").await.expect("get"), None);
        assert_eq!(kv.get("v1:mock:en:de:b").await.expect("get"), None);
        assert!(kv.get("v1:other:en:ru:c").await.expect("get").is_some());
    }
}
