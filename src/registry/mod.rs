//! # Action Handler Registry
//!
//! Closed mapping from `(version, action)` to a business handler with a
//! uniform signature, validated at startup. The transport never interprets
//! `action`; it only resolves it here, and an unresolved action surfaces as a
//! terminal business error, not a protocol failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::auth::Identity;

/// Business failure returned by a handler.
///
/// `retryable` separates transient collaborator trouble (drives the retry
/// policy) from terminal rejections (answered to the caller and recorded
/// idempotently).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub retryable: bool,
}

impl HandlerError {
    /// A failure that will never succeed given the same input
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// A failure that may succeed on retry
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// External business-logic collaborator interface
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, identity: &Identity, data: &Value) -> HandlerResult;
}

/// Adapter so plain synchronous closures can serve as handlers
struct SyncHandler<F>(F);

#[async_trait]
impl<F> ActionHandler for SyncHandler<F>
where
    F: Fn(&Identity, &Value) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, identity: &Identity, data: &Value) -> HandlerResult {
        (self.0)(identity, data)
    }
}

/// Registry key: protocol version plus operation name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub version: String,
    pub action: String,
}

impl ActionKey {
    pub fn new(version: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.version, self.action)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("duplicate handler registration for {0}")]
    DuplicateAction(ActionKey),

    #[error("invalid action name for {0}: {1}")]
    InvalidActionName(ActionKey, String),
}

/// Immutable handler registry, built once at startup
pub struct HandlerRegistry {
    handlers: HashMap<ActionKey, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Resolve a handler; `None` means unknown action (a business error)
    pub fn resolve(&self, version: &str, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .get(&ActionKey::new(version, action))
            .map(Arc::clone)
    }

    pub fn action_count(&self) -> usize {
        self.handlers.len()
    }

    /// Registered keys, sorted for stable logging
    pub fn actions(&self) -> Vec<ActionKey> {
        let mut keys: Vec<_> = self.handlers.keys().cloned().collect();
        keys.sort_by(|a, b| (&a.version, &a.action).cmp(&(&b.version, &b.action)));
        keys
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

/// Builder that validates registrations up front
pub struct HandlerRegistryBuilder {
    handlers: HashMap<ActionKey, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for HandlerRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistryBuilder")
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistryBuilder {
    pub fn register(
        mut self,
        version: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<Self, RegistryError> {
        let key = ActionKey::new(version, action);
        if key.version.trim().is_empty() || key.action.trim().is_empty() {
            return Err(RegistryError::InvalidActionName(
                key,
                "version and action must be non-empty".to_string(),
            ));
        }
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateAction(key));
        }
        self.handlers.insert(key, handler);
        Ok(self)
    }

    /// Register a synchronous closure as a handler
    pub fn register_fn<F>(
        self,
        version: impl Into<String>,
        action: impl Into<String>,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&Identity, &Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(version, action, Arc::new(SyncHandler(handler)))
    }

    pub fn build(self) -> HandlerRegistry {
        let registry = HandlerRegistry {
            handlers: self.handlers,
        };
        info!(
            action_count = registry.action_count(),
            "handler registry built"
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = HandlerRegistry::builder()
            .register_fn("v1", "health_check", |_identity, _data| {
                Ok(json!({"status": "ok"}))
            })
            .unwrap()
            .build();

        let handler = registry.resolve("v1", "health_check").expect("registered");
        let result = handler
            .handle(&Identity::new("user-1"), &json!({}))
            .await
            .unwrap();
        assert_eq!(result["status"], "ok");

        assert!(registry.resolve("v1", "abracadabra").is_none());
        assert!(registry.resolve("v2", "health_check").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let builder = HandlerRegistry::builder()
            .register_fn("v1", "create_task", |_, _| Ok(json!({})))
            .unwrap();

        let err = builder
            .register_fn("v1", "create_task", |_, _| Ok(json!({})))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAction(_)));
    }

    #[test]
    fn test_builder_debug_lists_registered_actions() {
        let builder = HandlerRegistry::builder()
            .register_fn("v1", "create_task", |_, _| Ok(json!({})))
            .unwrap();
        let debug = format!("{builder:?}");
        assert!(debug.contains("create_task"));
    }

    #[test]
    fn test_blank_names_rejected() {
        let err = HandlerRegistry::builder()
            .register_fn("v1", "  ", |_, _| Ok(json!({})))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidActionName(..)));
    }

    #[test]
    fn test_actions_are_sorted() {
        let registry = HandlerRegistry::builder()
            .register_fn("v2", "update_task", |_, _| Ok(json!({})))
            .unwrap()
            .register_fn("v1", "create_task", |_, _| Ok(json!({})))
            .unwrap()
            .register_fn("v1", "list_tasks", |_, _| Ok(json!({})))
            .unwrap()
            .build();

        let keys: Vec<String> = registry.actions().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["v1.create_task", "v1.list_tasks", "v2.update_task"]);
    }
}
