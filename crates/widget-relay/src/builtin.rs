//! Built-in widget set: the todo-list widget and its `show-todo` operation.

use crate::bundle::BundleDir;
use crate::operation::{
    FieldKind, FieldSpec, InputShape, Operation, OperationDescriptor, OperationError,
    RegistryError,
};
use crate::protocol::{ContentBlock, OperationOutput};
use crate::resource::{
    Resource, ResourceContents, ResourceDescriptor, ResourceError, ResourceMeta,
};
use crate::session::SessionHandlerFactory;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TODO_WIDGET_URI: &str = "ui://widget/todo.html";
const TODO_BUNDLE_NAME: &str = "todo";

/// Echoes a message and an optional todo list into the todo widget.
pub struct ShowTodoOperation {
    origin: String,
}

impl ShowTodoOperation {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }
}

#[async_trait]
impl Operation for ShowTodoOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::new("show-todo", "Show Todo", "Render the todo-list widget")
            .with_input_shape(
                InputShape::new()
                    .required("message", FieldKind::String)
                    .optional(
                        "todos",
                        FieldKind::Records(vec![
                            FieldSpec {
                                name: "label".to_string(),
                                kind: FieldKind::String,
                                required: true,
                            },
                            FieldSpec {
                                name: "done".to_string(),
                                kind: FieldKind::Boolean,
                                required: false,
                            },
                        ]),
                    ),
            )
    }

    async fn execute(&self, args: Value) -> Result<OperationOutput, OperationError> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let todos = args.get("todos").cloned().unwrap_or_else(|| json!([]));

        Ok(OperationOutput::new(
            vec![ContentBlock::text(format!("Showing todo list: {message}"))],
            json!({ "message": message, "todos": todos }),
        )
        .with_meta(json!({
            "widgetUri": TODO_WIDGET_URI,
            "preferredFrame": "inline",
            "origin": self.origin,
        })))
    }
}

/// Serves the todo widget markup from prebuilt artifacts.
pub struct TodoWidgetResource {
    bundles: BundleDir,
}

impl TodoWidgetResource {
    pub fn new(bundles: BundleDir) -> Self {
        Self { bundles }
    }
}

#[async_trait]
impl Resource for TodoWidgetResource {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor::new(TODO_WIDGET_URI, "todo-widget")
            .with_description("Interactive todo-list widget")
            .with_meta(ResourceMeta {
                preferred_frame: Some("inline".to_string()),
                allowed_domains: Vec::new(),
            })
    }

    async fn fetch(&self) -> Result<ResourceContents, ResourceError> {
        let bundle = self.bundles.load(TODO_BUNDLE_NAME)?;
        Ok(ResourceContents {
            uri: TODO_WIDGET_URI.to_string(),
            mime_type: "text/html".to_string(),
            text: bundle.into_html(),
        })
    }
}

/// Factory pre-populated with the built-in widget set.
pub fn builtin_factory(
    bundles: BundleDir,
    origin: impl Into<String>,
) -> Result<SessionHandlerFactory, RegistryError> {
    SessionHandlerFactory::builder()
        .with_operation(Arc::new(ShowTodoOperation::new(origin)))
        .with_resource(Arc::new(TodoWidgetResource::new(bundles)))
        .build()
}
