//! Core of the widget relay: operation and resource registries, widget
//! bundle loading, and the per-session protocol handler.
//!
//! The HTTP transport lives in `widget-relay-server`; this crate is
//! transport-agnostic and owns no shared state.

pub mod builtin;
pub mod bundle;
pub mod operation;
pub mod protocol;
pub mod resource;
pub mod session;

pub use bundle::BundleDir;
pub use operation::{
    FieldKind, FieldSpec, InputShape, InvokeError, Operation, OperationDescriptor, OperationError,
    OperationRegistry, RegistryError,
};
pub use protocol::{ContentBlock, OperationOutput, Request, Response, RpcError};
pub use resource::{
    Resource, ResourceContents, ResourceDescriptor, ResourceError, ResourceMeta, ResourceRegistry,
};
pub use session::{ServerInfo, SessionHandler, SessionHandlerFactory};
