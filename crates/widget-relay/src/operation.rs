//! Operation registry: named, schema-validated server-side actions.
//!
//! Registration happens once at startup and is read-only afterwards; each
//! session gets its own registry instance so handler state is never shared
//! across connections.

use crate::protocol::OperationOutput;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Primitive kinds accepted by an input shape field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Boolean,
    Integer,
    Number,
    /// A list of records, each record described by its own field specs.
    Records(Vec<FieldSpec>),
}

impl FieldKind {
    fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Records(_) => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Records(_) => value.is_array(),
        }
    }
}

/// One named field of an input shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Declared shape of an operation's input object.
///
/// Unknown extra fields are permitted; required fields must be present and
/// every present field must match its declared kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputShape {
    fields: Vec<FieldSpec>,
}

/// One field-level violation produced by validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub field: String,
    pub problem: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

impl InputShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Validate a raw argument object against this shape.
    pub fn validate(&self, args: &Value) -> Result<(), Vec<FieldViolation>> {
        let mut violations = Vec::new();

        let Some(obj) = args.as_object() else {
            // A missing params object counts as an empty one.
            if args.is_null() && self.fields.iter().all(|f| !f.required) {
                return Ok(());
            }
            violations.push(FieldViolation {
                field: "(root)".to_string(),
                problem: "arguments must be an object".to_string(),
            });
            return Err(violations);
        };

        for field in &self.fields {
            match obj.get(&field.name) {
                None => {
                    if field.required {
                        violations.push(FieldViolation {
                            field: field.name.clone(),
                            problem: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    Self::check_field(field, value, &field.name, &mut violations);
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check_field(field: &FieldSpec, value: &Value, path: &str, out: &mut Vec<FieldViolation>) {
        if !field.kind.matches(value) {
            out.push(FieldViolation {
                field: path.to_string(),
                problem: format!("expected {}", field.kind.type_name()),
            });
            return;
        }
        if let (FieldKind::Records(specs), Some(items)) = (&field.kind, value.as_array()) {
            for (i, item) in items.iter().enumerate() {
                let Some(record) = item.as_object() else {
                    out.push(FieldViolation {
                        field: format!("{path}[{i}]"),
                        problem: "expected an object".to_string(),
                    });
                    continue;
                };
                for spec in specs {
                    let item_path = format!("{path}[{i}].{}", spec.name);
                    match record.get(&spec.name) {
                        None if spec.required => out.push(FieldViolation {
                            field: item_path,
                            problem: "required field is missing".to_string(),
                        }),
                        None => {}
                        Some(v) => Self::check_field(spec, v, &item_path, out),
                    }
                }
            }
        }
    }

    /// Render as a JSON-Schema-style object for `operations/list`.
    pub fn to_schema(&self) -> Value {
        fn properties(fields: &[FieldSpec]) -> (Map<String, Value>, Vec<Value>) {
            let mut props = Map::new();
            let mut required = Vec::new();
            for f in fields {
                let schema = match &f.kind {
                    FieldKind::Records(specs) => {
                        let (nested, nested_required) = properties(specs);
                        json!({
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": Value::Object(nested),
                                "required": nested_required,
                            }
                        })
                    }
                    other => json!({ "type": other.type_name() }),
                };
                props.insert(f.name.clone(), schema);
                if f.required {
                    required.push(Value::String(f.name.clone()));
                }
            }
            (props, required)
        }

        let (props, required) = properties(&self.fields);
        json!({
            "type": "object",
            "properties": Value::Object(props),
            "required": required,
        })
    }
}

/// Static metadata for one operation.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_shape: InputShape,
}

impl OperationDescriptor {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: description.into(),
            input_shape: InputShape::new(),
        }
    }

    pub fn with_input_shape(mut self, shape: InputShape) -> Self {
        self.input_shape = shape;
        self
    }

    /// Listing form sent to clients.
    pub fn to_listing(&self) -> Value {
        json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": self.input_shape.to_schema(),
        })
    }
}

/// Handler execution errors, distinct from input validation.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A named callable action with a declared input shape.
#[async_trait]
pub trait Operation: Send + Sync {
    fn descriptor(&self) -> OperationDescriptor;

    /// Execute with arguments already validated against the input shape.
    async fn execute(&self, args: Value) -> Result<OperationOutput, OperationError>;
}

/// Registration-time conflicts. Fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("duplicate operation name: {0}")]
    DuplicateName(String),

    #[error("duplicate resource uri: {0}")]
    DuplicateUri(String),
}

/// Invocation failures surfaced to the client.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid input: {}", format_violations(.0))]
    InvalidInput(Vec<FieldViolation>),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Static table from operation name to its handler.
#[derive(Default)]
pub struct OperationRegistry {
    by_name: HashMap<String, Arc<dyn Operation>>,
    order: Vec<String>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op: Arc<dyn Operation>) -> Result<(), RegistryError> {
        let name = op.descriptor().name;
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.by_name.insert(name, op);
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<OperationDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .map(|op| op.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Validate input and dispatch to the named handler.
    pub async fn invoke(&self, name: &str, raw: Value) -> Result<OperationOutput, InvokeError> {
        let op = self
            .by_name
            .get(name)
            .ok_or_else(|| InvokeError::UnknownOperation(name.to_string()))?;
        op.descriptor()
            .input_shape
            .validate(&raw)
            .map_err(InvokeError::InvalidInput)?;
        Ok(op.execute(raw).await?)
    }
}
