//! Reactive core of the monitoring pipeline.
//!
//! [`AsyncResource`] owns one upstream fetch and its load state.
//! [`DerivedGraph`] wires resources and pure functions together and
//! recomputes derived values synchronously, once per change batch, in
//! dependency order.
//!
//! Both are single-threaded (`Rc`/`RefCell`). Resources spawn their loads
//! with `tokio::task::spawn_local`, so they must be created inside a
//! `tokio::task::LocalSet`.

pub mod error;
pub mod graph;
pub mod resource;

pub use error::{GraphError, ResourceError};
pub use graph::{DerivedGraph, Inputs, Node, NodeId, NodeState};
pub use resource::{AsyncResource, LoadState, Loaded, ResourceOptions};

/// Registration handle returned by `subscribe`. Subscriptions stay active
/// until [`Subscription::unsubscribe`] is called; dropping the handle does
/// not cancel them.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
