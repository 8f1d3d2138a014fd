//! 核心编排层：错误、状态投影、运行监管、主控循环

pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use error::BatonError;
pub use orchestrator::{create_relay, RelayOptions, RelayOrchestrator};
pub use session_supervisor::RelaySupervisor;
pub use state::{RelayPhase, RelaySnapshot};
