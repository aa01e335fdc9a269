//! Optional pluggable state storage: embedders that need rate-limit and circuit
//! breaker state shared across processes provide a `StateStorage` impl backed by
//! Redis, a database, or similar. The default used everywhere in this crate is
//! `NoopStateStorage`, which keeps state in-process only.

use async_trait::async_trait;
use std::time::Duration;

/// Opaque key-value storage with TTL, for embedders running multiple instances of a
/// boundary against the same providers.
#[async_trait]
pub trait StateStorage: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Self::Error>;
    async fn del(&self, key: &str) -> Result<(), Self::Error>;
}

/// Type-erases a `StateStorage`'s associated `Error` so `BoundaryClient` can hold one
/// boxed storage implementation regardless of which error type an embedder's backing
/// store raises; `dyn StateStorage` alone isn't object-safe with that associated type.
#[async_trait]
pub(crate) trait ErasedStateStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), String>;
    async fn del(&self, key: &str) -> Result<(), String>;
}

#[async_trait]
impl<T: StateStorage> ErasedStateStorage for T {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        StateStorage::get(self, key).await.map_err(|e| e.to_string())
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), String> {
        StateStorage::set_with_ttl(self, key, value, ttl).await.map_err(|e| e.to_string())
    }

    async fn del(&self, key: &str) -> Result<(), String> {
        StateStorage::del(self, key).await.map_err(|e| e.to_string())
    }
}

/// Does nothing: `get` always misses, `set_with_ttl`/`del` are no-ops. This is what
/// every built-in component is wired to unless an embedder supplies its own store.
#[derive(Debug, Clone, Default)]
pub struct NoopStateStorage;

#[async_trait]
impl StateStorage for NoopStateStorage {
    type Error = std::convert::Infallible;

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(None)
    }

    async fn set_with_ttl(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_store_never_retains_anything() {
        let store = NoopStateStorage;
        store.set_with_ttl("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.del("k").await.unwrap();
    }
}
