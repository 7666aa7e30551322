//! Declarative dataflow graphs.
//!
//! A graph is authored with a [`GraphBuilder`], frozen into a
//! [`CompiledGraph`], and run by an [`Engine`] which invokes every node once
//! its upstream producers have finished, wave by wave. Node kinds are looked
//! up in a [`NodeTypeRegistry`]; `condition` nodes may steer the run down one
//! of several conditional branches.

pub mod builder;
pub mod builtin;
pub mod compiled;
pub mod document;
pub mod expression;
pub mod node;
pub mod registry;
pub mod runner;

pub use builder::{Connection, GraphBuilder};
pub use builtin::{CONDITION_KIND, CONSTANT_KIND, EXPRESSION_KIND, OUTPUT};
pub use compiled::CompiledGraph;
pub use document::{ConnectionRecord, GraphDocument, NodeRecord};
pub use expression::{ExpressionEvaluator, Scope, SimpleEvaluator};
pub use node::{BranchDescriptor, Node, Port, PortRef};
pub use registry::{NodeType, NodeTypeRegistry, PortLookup};
pub use runner::Engine;
