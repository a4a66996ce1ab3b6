//! Capabilities a dispatcher can execute, looked up by name.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named operation the client runs on behalf of the orchestrator.
#[async_trait]
pub trait Capability: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run with the raw arguments payload from the call envelope.
    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError>;
}

/// Parse an arguments payload into a capability's own argument type.
///
/// `null` is treated as an empty object so argument-less calls work.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, CapabilityError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| CapabilityError::InvalidArguments(e.to_string()))
}

/// Read-only name → capability map, built once at startup.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// `(name, description)` pairs sorted by name.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .capabilities
            .values()
            .map(|c| (c.name().to_string(), c.description().to_string()))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistryBuilder {
    /// Add a capability. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        let name = capability.name().to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::warn!(tool = %name, "capability registered twice, keeping the last one");
        }
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            capabilities: self.capabilities,
        }
    }
}
