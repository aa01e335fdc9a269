//! Optional response schema tracking (§9): embedders that want to detect a provider
//! silently changing its response shape can register a `SchemaStore`. The default
//! `NoopSchemaStore` keeps the boundary usable with zero schema machinery; turning on
//! the `schema-validation` feature makes [`JsonSchemaStore`] validate bodies with
//! `jsonschema` and flag drift instead of just recording it.

use async_trait::async_trait;
use serde_json::Value;

/// Stores and compares JSON schemas for a provider's operations, so a pipeline can
/// warn (never fail the call) when a response no longer matches what was last seen.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save(&self, provider: &str, operation: &str, schema: Value) -> Result<(), Self::Error>;
    async fn load(&self, provider: &str, operation: &str) -> Result<Option<Value>, Self::Error>;
    async fn list(&self, provider: &str) -> Result<Vec<String>, Self::Error>;
    /// Infers whether `body` still conforms to the schema on file for `operation`.
    /// Returns `true` when there's nothing on file to compare against.
    async fn detect(&self, provider: &str, operation: &str, body: &Value) -> Result<bool, Self::Error>;
}

/// Records and checks nothing: `save` is a no-op, `load`/`list` are always empty,
/// `detect` always reports conformance. This is what every pipeline is wired to
/// unless an embedder supplies its own store.
#[derive(Debug, Clone, Default)]
pub struct NoopSchemaStore;

#[async_trait]
impl SchemaStore for NoopSchemaStore {
    type Error = std::convert::Infallible;

    async fn save(&self, _provider: &str, _operation: &str, _schema: Value) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn load(&self, _provider: &str, _operation: &str) -> Result<Option<Value>, Self::Error> {
        Ok(None)
    }

    async fn list(&self, _provider: &str) -> Result<Vec<String>, Self::Error> {
        Ok(Vec::new())
    }

    async fn detect(&self, _provider: &str, _operation: &str, _body: &Value) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[cfg(feature = "schema-validation")]
mod validating {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// Keeps one JSON Schema per `(provider, operation)` pair in memory and validates
    /// bodies against it with `jsonschema`. `save` overwrites whatever schema was on
    /// file; `detect` compiles the stored schema fresh on every call, which is fine
    /// for the drift-detection cadence this is used at (not the request hot path).
    #[derive(Default)]
    pub struct JsonSchemaStore {
        schemas: RwLock<HashMap<(String, String), Value>>,
    }

    impl JsonSchemaStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn key(provider: &str, operation: &str) -> (String, String) {
            (provider.to_string(), operation.to_string())
        }
    }

    #[async_trait]
    impl SchemaStore for JsonSchemaStore {
        type Error = std::convert::Infallible;

        async fn save(&self, provider: &str, operation: &str, schema: Value) -> Result<(), Self::Error> {
            self.schemas.write().unwrap().insert(Self::key(provider, operation), schema);
            Ok(())
        }

        async fn load(&self, provider: &str, operation: &str) -> Result<Option<Value>, Self::Error> {
            Ok(self.schemas.read().unwrap().get(&Self::key(provider, operation)).cloned())
        }

        async fn list(&self, provider: &str) -> Result<Vec<String>, Self::Error> {
            Ok(self
                .schemas
                .read()
                .unwrap()
                .keys()
                .filter(|(p, _)| p == provider)
                .map(|(_, op)| op.clone())
                .collect())
        }

        async fn detect(&self, provider: &str, operation: &str, body: &Value) -> Result<bool, Self::Error> {
            let schemas = self.schemas.read().unwrap();
            let Some(schema) = schemas.get(&Self::key(provider, operation)) else {
                return Ok(true);
            };
            let conforms = jsonschema::JSONSchema::compile(schema).map(|compiled| compiled.is_valid(body)).unwrap_or(true);
            Ok(conforms)
        }
    }
}

#[cfg(feature = "schema-validation")]
pub use validating::JsonSchemaStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_store_always_reports_conformance() {
        let store = NoopSchemaStore;
        assert!(store.detect("stripe", "get_charge", &serde_json::json!({"id": 1})).await.unwrap());
        assert_eq!(store.list("stripe").await.unwrap(), Vec::<String>::new());
    }

    #[cfg(feature = "schema-validation")]
    #[tokio::test]
    async fn json_schema_store_detects_drift() {
        use super::validating::JsonSchemaStore;

        let store = JsonSchemaStore::new();
        store
            .save(
                "stripe",
                "get_charge",
                serde_json::json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}),
            )
            .await
            .unwrap();

        assert!(store.detect("stripe", "get_charge", &serde_json::json!({"id": "ch_1"})).await.unwrap());
        assert!(!store.detect("stripe", "get_charge", &serde_json::json!({"amount": 100})).await.unwrap());
    }
}
