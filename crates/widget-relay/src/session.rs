//! Per-session protocol handler and the factory that mints one per stream.
//!
//! Each live stream connection owns exactly one `SessionHandler`; handlers
//! never share mutable state, so nothing here needs internal locking.
//! Requests within a session are serialized by `&mut self`.

use crate::operation::{
    InvokeError, Operation, OperationRegistry, RegistryError,
};
use crate::protocol::{
    self, ContentBlock, Request, Response, RpcError, CODE_INTERNAL_ERROR, CODE_INVALID_PARAMS,
};
use crate::resource::{Resource, ResourceError, ResourceRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Server identity reported by `initialize`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One session's private operation/resource binding.
pub struct SessionHandler {
    info: ServerInfo,
    operations: OperationRegistry,
    resources: ResourceRegistry,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

impl SessionHandler {
    /// Dispatch one protocol message.
    ///
    /// Notifications produce no response; everything else produces exactly
    /// one, success or error.
    pub async fn handle(&mut self, req: Request) -> Option<Response> {
        if req.is_notification() {
            debug!(method = %req.method, "dropping notification");
            return None;
        }
        let id = req.id.clone().unwrap_or(Value::Null);

        let result = match req.method.as_str() {
            protocol::METHOD_INITIALIZE => Ok(self.initialize()),
            protocol::METHOD_PING => Ok(json!({})),
            protocol::METHOD_OPERATIONS_LIST => Ok(self.list_operations()),
            protocol::METHOD_OPERATIONS_CALL => self.call_operation(&req.params).await,
            protocol::METHOD_RESOURCES_LIST => Ok(self.list_resources()),
            protocol::METHOD_RESOURCES_READ => self.read_resource(&req.params).await,
            other => Err(RpcError::method_not_found(other)),
        };

        Some(match result {
            Ok(value) => Response::success(id, value),
            Err(error) => Response::failure(id, error),
        })
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": protocol::PROTOCOL_REVISION,
            "capabilities": {
                "operations": {},
                "resources": {},
            },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version,
            },
        })
    }

    fn list_operations(&self) -> Value {
        let listings: Vec<Value> = self
            .operations
            .descriptors()
            .iter()
            .map(|d| d.to_listing())
            .collect();
        json!({ "operations": listings })
    }

    async fn call_operation(&self, params: &Value) -> Result<Value, RpcError> {
        let call: CallParams = serde_json::from_value(params.clone())
            .map_err(|e| RpcError::new(CODE_INVALID_PARAMS, format!("bad call params: {e}")))?;

        let output = self
            .operations
            .invoke(&call.name, call.arguments)
            .await
            .map_err(|e| match &e {
                InvokeError::UnknownOperation(_) => RpcError::new(CODE_INVALID_PARAMS, e.to_string()),
                InvokeError::InvalidInput(violations) => {
                    let detail: Vec<Value> = violations
                        .iter()
                        .map(|v| json!({ "field": v.field, "problem": v.problem }))
                        .collect();
                    RpcError::new(CODE_INVALID_PARAMS, e.to_string())
                        .with_data(json!({ "violations": detail }))
                }
                InvokeError::Operation(_) => RpcError::new(CODE_INTERNAL_ERROR, e.to_string()),
            })?;

        let content: Vec<Value> = output
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
            })
            .collect();
        let mut result = json!({
            "content": content,
            "structured": output.structured,
        });
        if !output.meta.is_null() {
            result["meta"] = output.meta;
        }
        Ok(result)
    }

    fn list_resources(&self) -> Value {
        let listings: Vec<Value> = self
            .resources
            .descriptors()
            .iter()
            .map(|d| d.to_listing())
            .collect();
        json!({ "resources": listings })
    }

    async fn read_resource(&self, params: &Value) -> Result<Value, RpcError> {
        let read: ReadParams = serde_json::from_value(params.clone())
            .map_err(|e| RpcError::new(CODE_INVALID_PARAMS, format!("bad read params: {e}")))?;

        let contents = self.resources.resolve(&read.uri).await.map_err(|e| match e {
            ResourceError::UnknownResource(_) => RpcError::new(CODE_INVALID_PARAMS, e.to_string()),
            // Missing artifacts surface their full diagnostic, path included.
            other => RpcError::new(CODE_INTERNAL_ERROR, other.to_string()),
        })?;

        Ok(json!({
            "contents": [{
                "uri": contents.uri,
                "mimeType": contents.mime_type,
                "text": contents.text,
            }]
        }))
    }
}

/// Builds one isolated `SessionHandler` per new stream connection.
///
/// The descriptor set is validated once at build time; `create` does no I/O
/// (bundle reads happen lazily at `resources/read`).
pub struct SessionHandlerFactory {
    info: ServerInfo,
    operations: Vec<Arc<dyn Operation>>,
    resources: Vec<Arc<dyn Resource>>,
}

impl std::fmt::Debug for SessionHandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandlerFactory")
            .field("info", &self.info)
            .field("operations", &self.operations.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Accumulates descriptors before the uniqueness check.
#[derive(Default)]
pub struct SessionHandlerFactoryBuilder {
    info: ServerInfo,
    operations: Vec<Arc<dyn Operation>>,
    resources: Vec<Arc<dyn Resource>>,
}

impl SessionHandlerFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_operation(mut self, op: Arc<dyn Operation>) -> Self {
        self.operations.push(op);
        self
    }

    pub fn with_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.push(resource);
        self
    }

    /// Validate name/uri uniqueness. Conflicts here should abort startup.
    pub fn build(self) -> Result<SessionHandlerFactory, RegistryError> {
        let mut names = HashSet::new();
        for op in &self.operations {
            let name = op.descriptor().name;
            if !names.insert(name.clone()) {
                return Err(RegistryError::DuplicateName(name));
            }
        }
        let mut uris = HashSet::new();
        for r in &self.resources {
            let uri = r.descriptor().uri;
            if !uris.insert(uri.clone()) {
                return Err(RegistryError::DuplicateUri(uri));
            }
        }
        Ok(SessionHandlerFactory {
            info: self.info,
            operations: self.operations,
            resources: self.resources,
        })
    }
}

impl SessionHandlerFactory {
    pub fn builder() -> SessionHandlerFactoryBuilder {
        SessionHandlerFactoryBuilder::new()
    }

    /// Mint a fresh, fully populated handler for one new session.
    pub fn create(&self) -> Result<SessionHandler, RegistryError> {
        let mut operations = OperationRegistry::new();
        for op in &self.operations {
            operations.register(op.clone())?;
        }
        let mut resources = ResourceRegistry::new();
        for r in &self.resources {
            resources.register(r.clone())?;
        }
        Ok(SessionHandler {
            info: self.info.clone(),
            operations,
            resources,
        })
    }
}
