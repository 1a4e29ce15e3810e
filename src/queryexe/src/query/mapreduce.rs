//! Map-reduce over the nodes of a cluster.
//!
//! The map function runs once per node against a context bound to that node.
//! With more than one node every map task gets its own scoped thread, and all
//! of them are joined before the reduce. A failing task cancels its siblings.

use crate::context::ExecutionContext;
use common::cluster::ClusterNode;
use common::ids::NodeId;
use common::{EngineError, Row};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Outcome of the map function on one node.
#[derive(Debug)]
pub struct MapResponse {
    pub node: NodeId,
    pub result: Result<Vec<Row>, EngineError>,
}

/// Runs `map` on every node and concatenates the rows in node order. On
/// failure no rows are returned, only the first error of a failing node.
///
/// # Arguments
///
/// * `ctx` - Context of the invocation; node contexts derive from it.
/// * `nodes` - Nodes to run on, in reduce order.
/// * `map` - Work done on each node.
pub fn map_reduce<F>(
    ctx: &ExecutionContext,
    nodes: &[ClusterNode],
    map: F,
) -> Result<Vec<Row>, EngineError>
where
    F: Fn(&ExecutionContext) -> Result<Vec<Row>, EngineError> + Sync,
{
    ctx.check()?;
    let group = ctx.cancel_token().child();
    let base = ctx.clone().with_cancel(group).with_cluster(nodes.to_vec());
    debug!("map over {} nodes", nodes.len());

    let responses: Vec<MapResponse> = if nodes.len() <= 1 {
        nodes.iter().map(|node| map_node(&base, node, &map)).collect()
    } else {
        thread::scope(|s| {
            let handles: Vec<_> = nodes
                .iter()
                .map(|node| {
                    let base = &base;
                    let map = &map;
                    s.spawn(move || map_node(base, node, map))
                })
                .collect();
            handles
                .into_iter()
                .zip(nodes)
                .map(|(handle, node)| {
                    // map_node catches panics of the map function
                    handle.join().unwrap_or_else(|payload| MapResponse {
                        node: node.id,
                        result: Err(node_failure(node, payload)),
                    })
                })
                .collect()
        })
    };

    ctx.check()?;
    reduce(responses)
}

fn map_node<F>(base: &ExecutionContext, node: &ClusterNode, map: &F) -> MapResponse
where
    F: Fn(&ExecutionContext) -> Result<Vec<Row>, EngineError> + Sync,
{
    let node_ctx = base.for_node(node);
    let result = match panic::catch_unwind(AssertUnwindSafe(|| map(&node_ctx))) {
        Ok(result) => result,
        Err(payload) => Err(node_failure(node, payload)),
    };
    match &result {
        Ok(rows) => debug!("{} mapped {} rows", node, rows.len()),
        Err(EngineError::Cancelled) => debug!("{} cancelled", node),
        Err(e) => {
            warn!("{} failed: {}", node, e);
            base.cancel_token().cancel();
        }
    }
    MapResponse {
        node: node.id,
        result,
    }
}

fn node_failure(node: &ClusterNode, payload: Box<dyn Any + Send>) -> EngineError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("map task panicked")
    };
    EngineError::NodeFailure {
        node: node.to_string(),
        message,
    }
}

/// Concatenates the responses in node order. Cancellations caused by a
/// failing sibling give way to the sibling's error.
fn reduce(responses: Vec<MapResponse>) -> Result<Vec<Row>, EngineError> {
    let mut rows = Vec::new();
    let mut cancelled = false;
    for response in responses {
        match response.result {
            Ok(mapped) => rows.extend(mapped),
            Err(EngineError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }
    if cancelled {
        return Err(EngineError::Cancelled);
    }
    Ok(rows)
}
