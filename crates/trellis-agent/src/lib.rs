pub mod engine;
pub mod graph;
pub mod invoker;
pub mod progress;
pub mod registry;
pub mod session;

pub use engine::{failure_message, WorkflowEngine, WorkflowRequest};
pub use graph::{Edge, Node, NodeKind, WorkflowGraph, START_NODE_ID};
pub use invoker::LlmInvoker;
pub use progress::{progress_channel, ProgressReceiver, ProgressSender};
pub use registry::AgentRegistry;
pub use session::{SessionManager, SessionPolicy};
