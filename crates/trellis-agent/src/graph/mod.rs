//! Workflow graph model.
//!
//! A workflow is a directed graph of `Node`s connected by `Edge`s, entered
//! through the synthetic start node `goal_node`. The graph is built fresh for
//! every run from the caller's JSON and never mutated afterwards.
//!
//! `ExecutionContext` carries the data that flows from one step to the next:
//! the goal, the previous step's output, and the visited set that stops cycles.

pub mod context;
pub mod edge;
pub mod node;
pub mod workflow;

pub use context::ExecutionContext;
pub use edge::Edge;
pub use node::{Node, NodeData, NodeKind};
pub use workflow::{WorkflowGraph, START_NODE_ID};
