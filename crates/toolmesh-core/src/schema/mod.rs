//! Schema adaptation for remotely declared tools
//!
//! A provider's `inputSchema` is adapted once per catalog fetch into a
//! [`ToolSchema`] variant tree. The adapted schema validates arguments before
//! a call and renders the call signature advertised to the model.
//!
//! ```rust,ignore
//! let schema = ToolSchema::adapt(&tool.input_schema, |e| log_warn!(logger, "{}", e));
//! let args = schema.validate(&call.input)?;
//! ```

mod adapter;
mod validate;

pub use adapter::{PropertySchema, SchemaAdaptationError, SchemaKind, ToolSchema};
pub use validate::{ValidationError, ValidationIssue};
