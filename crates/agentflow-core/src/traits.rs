use std::future::Future;

use futures::future::BoxFuture;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::types::{NodeInputs, NodeOutputs};

/// Node processor — the behaviour behind one node kind.
///
/// Invoked once per node per run with the node's gathered inputs, a handle to
/// the run's shared context, and the node's own configuration payload.
pub trait NodeProcessor: Send + Sync + 'static {
    fn process(
        &self,
        inputs: NodeInputs,
        ctx: ExecutionContext,
        config: serde_json::Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>>;
}

/// Adapter turning an async closure into a [`NodeProcessor`].
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap an async closure as a node processor.
///
/// ```ignore
/// registry.register_node_type(
///     "greet",
///     processor_fn(|_inputs, ctx, _config| async move {
///         ctx.set_str("greeting", "hello");
///         Ok(NodeOutputs::new())
///     }),
///     PortSpec::source(),
/// );
/// ```
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(NodeInputs, ExecutionContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutputs>> + Send + 'static,
{
    FnProcessor { f }
}

impl<F, Fut> NodeProcessor for FnProcessor<F>
where
    F: Fn(NodeInputs, ExecutionContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutputs>> + Send + 'static,
{
    fn process(
        &self,
        inputs: NodeInputs,
        ctx: ExecutionContext,
        config: serde_json::Value,
    ) -> BoxFuture<'_, Result<NodeOutputs>> {
        Box::pin((self.f)(inputs, ctx, config))
    }
}
