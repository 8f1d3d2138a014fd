//! 接力核心：轮次状态、修订信箱、Prompt 拼装、智能体调用器、过程事件

pub mod events;
pub mod invoker;
pub mod mailbox;
pub mod prompt;
pub mod turn;

pub use events::RelayEvent;
pub use invoker::{is_fallback, AgentInvoker, Invocation, InvokerOptions, FALLBACK_PREFIX};
pub use mailbox::{RevisionMailbox, RevisionRequest};
pub use prompt::USER_AGENT_NAME;
pub use turn::{AgentMessage, MessageSlot, RelayBoard, RelayTurn};
