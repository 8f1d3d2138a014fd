//! 智能体名册：接力顺序与各智能体的人设

pub mod directory;

pub use directory::{names_match, AgentDirectory, AgentIdentity};
