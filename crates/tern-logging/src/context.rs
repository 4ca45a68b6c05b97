//! Node context injection for multi-node logging
//!
//! A simulation runs every node on one thread, so log lines would be
//! indistinguishable without knowing which node was being stepped. The
//! guard here records the active node in thread-local storage and
//! [`NodeContextLayer`](crate::layers::NodeContextLayer) attaches it to
//! every span opened while it is alive.

use std::cell::RefCell;

use tern_core::Address;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    pub node: Address,
    pub mode: NodeMode,
}

/// How the node is being driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Stepped by a discrete-event simulation on virtual time
    Simulated,
    /// Running on its own task against the wall clock
    Driven,
}

impl std::fmt::Display for NodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeMode::Simulated => write!(f, "simulated"),
            NodeMode::Driven => write!(f, "driven"),
        }
    }
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Creating the guard sets the node for the current thread. Dropping it
/// restores whatever context was active before.
///
/// # Example
///
/// ```ignore
/// use tern_logging::NodeContextGuard;
///
/// let _guard = NodeContextGuard::simulated(node.address());
/// node.handle_timers();
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    pub fn new(node: Address, mode: NodeMode) -> Self {
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow().clone());
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(NodeContextData { node, mode }));
        Self { previous }
    }

    /// Guard for a node stepped by a simulation
    pub fn simulated(node: Address) -> Self {
        Self::new(node, NodeMode::Simulated)
    }

    /// Get the current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node() -> Option<Address> {
        Self::current().map(|ctx| ctx.node)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context set
///
/// # Example
///
/// ```ignore
/// with_node_context!(address, {
///     node.receive(frame);
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::simulated($node);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_context_guard() {
        assert!(NodeContextGuard::current().is_none());

        {
            let _guard = NodeContextGuard::simulated(Address::from_index(0));
            let ctx = NodeContextGuard::current().unwrap();
            assert_eq!(ctx.node, Address::from_index(0));
            assert_eq!(ctx.mode, NodeMode::Simulated);
        }

        assert!(NodeContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        let a = Address::from_index(0);
        let b = Address::from_index(1);

        {
            let _guard_a = NodeContextGuard::simulated(a);
            assert_eq!(NodeContextGuard::current_node(), Some(a));

            {
                let _guard_b = NodeContextGuard::new(b, NodeMode::Driven);
                assert_eq!(NodeContextGuard::current_node(), Some(b));
            }

            // Restored after the inner guard drops
            assert_eq!(NodeContextGuard::current_node(), Some(a));
        }

        assert!(NodeContextGuard::current_node().is_none());
    }

    #[test]
    fn test_macro_scopes_context() {
        let node = Address::from_index(3);
        let seen = with_node_context!(node, { NodeContextGuard::current_node() });
        assert_eq!(seen, Some(node));
        assert!(NodeContextGuard::current_node().is_none());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(NodeMode::Simulated.to_string(), "simulated");
        assert_eq!(NodeMode::Driven.to_string(), "driven");
    }
}
