//! 能力层：注册表、参数 schema、修订请求能力

pub mod registry;
pub mod revision;
pub mod schema;

pub use registry::{Tool, ToolDefinition, ToolError, ToolRegistry};
pub use revision::{RequestRevisionTool, REQUEST_REVISION_TOOL};
pub use schema::{parameters_schema, RevisionArgs};
