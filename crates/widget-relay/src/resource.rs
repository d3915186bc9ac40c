//! Resource registry: fetchable payloads served by identifier.
//!
//! In this server a resource is the self-contained markup for one UI widget,
//! assembled from prebuilt artifacts at read time.

use crate::operation::RegistryError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Display metadata a client may use when framing the widget.
#[derive(Debug, Clone, Default)]
pub struct ResourceMeta {
    /// Preferred framing for the widget, e.g. "inline" or "fullscreen".
    pub preferred_frame: Option<String>,
    /// External domains the widget is allowed to reach.
    pub allowed_domains: Vec<String>,
}

impl ResourceMeta {
    pub fn to_json(&self) -> Value {
        json!({
            "preferredFrame": self.preferred_frame,
            "allowedDomains": self.allowed_domains,
        })
    }
}

/// Static metadata for one resource.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
    pub meta: ResourceMeta,
}

impl ResourceDescriptor {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: String::new(),
            mime_type: "text/html".to_string(),
            meta: ResourceMeta::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_meta(mut self, meta: ResourceMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Listing form sent to clients.
    pub fn to_listing(&self) -> Value {
        json!({
            "uri": self.uri,
            "name": self.name,
            "description": self.description,
            "mimeType": self.mime_type,
            "meta": self.meta.to_json(),
        })
    }
}

/// Fetched payload for one resource.
#[derive(Debug, Clone)]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// Resource resolution failures.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// A prebuilt artifact is missing. Fatal for the resource that needs it;
    /// the message names the expected path and how to produce it.
    #[error(
        "widget bundle artifact missing: {} (run `npm run build` in the widgets package to produce it)",
        .path.display()
    )]
    AssetNotFound { path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named, fetchable payload.
#[async_trait]
pub trait Resource: Send + Sync {
    fn descriptor(&self) -> ResourceDescriptor;

    async fn fetch(&self) -> Result<ResourceContents, ResourceError>;
}

/// Static table from resource uri to its fetch function.
#[derive(Default)]
pub struct ResourceRegistry {
    by_uri: HashMap<String, Arc<dyn Resource>>,
    order: Vec<String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Arc<dyn Resource>) -> Result<(), RegistryError> {
        let uri = resource.descriptor().uri;
        if self.by_uri.contains_key(&uri) {
            return Err(RegistryError::DuplicateUri(uri));
        }
        self.order.push(uri.clone());
        self.by_uri.insert(uri, resource);
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        self.order
            .iter()
            .filter_map(|uri| self.by_uri.get(uri))
            .map(|r| r.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }

    pub async fn resolve(&self, uri: &str) -> Result<ResourceContents, ResourceError> {
        let resource = self
            .by_uri
            .get(uri)
            .ok_or_else(|| ResourceError::UnknownResource(uri.to_string()))?;
        resource.fetch().await
    }
}
