//! Glitch-free synchronous derivation graph.
//!
//! Nodes are either sources (set from outside, typically from an
//! [`AsyncResource`]) or derived (a pure function of declared inputs).
//! Inputs must already exist when a node is created, so node creation
//! order is a topological order and cycles cannot be expressed.
//!
//! A change marks the direct dependents `Stale`. Stabilizing walks the
//! nodes once in creation order and recomputes every stale node exactly
//! once, so a diamond recomputes its join a single time per batch. A
//! recompute that fails keeps the node's previous value, records the error
//! and still marks its dependents stale.
//!
//! Sets issued while a batch is being stabilized or its subscribers are
//! being notified are queued into the next batch.

use crate::error::GraphError;
use crate::resource::{AsyncResource, LoadState};
use crate::Subscription;
use log::{debug, warn};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

type AnyValue = Rc<dyn Any>;
type Compute = Rc<dyn Fn(&Inputs) -> anyhow::Result<AnyValue>>;
type Listener = Rc<dyn Fn(Option<AnyValue>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Typed handle to a node.
pub struct Node<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Node<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Node<T> {}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Stale,
    Computing,
    Current,
}

/// Values of a derived node's declared inputs, passed to its compute
/// function.
pub struct Inputs<'a> {
    node: &'a str,
    names: &'a [String],
    ids: &'a [NodeId],
    values: &'a [Option<AnyValue>],
}

impl Inputs<'_> {
    /// Value of a declared input.
    pub fn get<T: 'static>(&self, input: &Node<T>) -> Result<Rc<T>, GraphError> {
        let Some(position) = self.ids.iter().position(|id| *id == input.id) else {
            return Err(GraphError::UndeclaredInput {
                node: self.node.to_string(),
                input: format!("#{}", input.id.0),
            });
        };
        let name = &self.names[position];
        let value = self.values[position]
            .clone()
            .ok_or_else(|| GraphError::Unavailable(name.clone()))?;
        value
            .downcast::<T>()
            .map_err(|_| GraphError::TypeMismatch(name.clone()))
    }
}

enum Kind {
    Source,
    Derived { inputs: Vec<NodeId>, compute: Compute },
}

struct Slot {
    name: String,
    kind: Kind,
    type_id: TypeId,
    value: Option<AnyValue>,
    error: Option<String>,
    state: NodeState,
    dependents: Vec<NodeId>,
    recomputes: u64,
    listeners: Vec<(u64, Listener)>,
}

#[derive(Default)]
struct Inner {
    nodes: Vec<Slot>,
    /// Nodes whose value changed since subscribers were last notified.
    changed: BTreeSet<usize>,
    batch_depth: usize,
    flushing: bool,
    batches: u64,
    next_listener: u64,
    attachments: Vec<Subscription>,
}

impl Inner {
    fn slot(&self, id: NodeId) -> Result<&Slot, GraphError> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownNode(id.0))
    }

    fn mark_dependents_stale(&mut self, index: usize) {
        let dependents = self.nodes[index].dependents.clone();
        for dependent in dependents {
            self.nodes[dependent.0].state = NodeState::Stale;
        }
    }

    fn has_stale(&self) -> bool {
        self.nodes.iter().any(|n| n.state == NodeState::Stale)
    }
}

/// Process-wide dependency graph of derived values.
///
/// Cloning yields another handle to the same graph.
#[derive(Clone, Default)]
pub struct DerivedGraph {
    inner: Rc<RefCell<Inner>>,
}

impl fmt::Debug for DerivedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("DerivedGraph")
            .field("nodes", &inner.nodes.len())
            .field("batches", &inner.batches)
            .finish()
    }
}

impl DerivedGraph {
    pub fn new() -> Self {
        DerivedGraph::default()
    }

    /// Add an externally set node.
    pub fn source<T: 'static>(&self, name: &str, initial: T) -> Node<T> {
        let mut inner = self.inner.borrow_mut();
        let id = NodeId(inner.nodes.len());
        inner.nodes.push(Slot {
            name: name.to_string(),
            kind: Kind::Source,
            type_id: TypeId::of::<T>(),
            value: Some(Rc::new(initial)),
            error: None,
            state: NodeState::Current,
            dependents: Vec::new(),
            recomputes: 0,
            listeners: Vec::new(),
        });
        Node {
            id,
            _marker: PhantomData,
        }
    }

    /// Add a node computed from `inputs`. It is computed right away, or at
    /// the end of the enclosing batch.
    pub fn derive<U, F>(&self, name: &str, inputs: &[NodeId], compute: F) -> Result<Node<U>, GraphError>
    where
        U: 'static,
        F: Fn(&Inputs) -> anyhow::Result<U> + 'static,
    {
        let id = {
            let mut inner = self.inner.borrow_mut();
            for input in inputs {
                inner.slot(*input)?;
            }
            let id = NodeId(inner.nodes.len());
            for input in inputs {
                inner.nodes[input.0].dependents.push(id);
            }
            let compute: Compute = Rc::new(move |values: &Inputs| {
                compute(values).map(|v| Rc::new(v) as AnyValue)
            });
            inner.nodes.push(Slot {
                name: name.to_string(),
                kind: Kind::Derived {
                    inputs: inputs.to_vec(),
                    compute,
                },
                type_id: TypeId::of::<U>(),
                value: None,
                error: None,
                state: NodeState::Stale,
                dependents: Vec::new(),
                recomputes: 0,
                listeners: Vec::new(),
            });
            id
        };
        self.flush();
        Ok(Node {
            id,
            _marker: PhantomData,
        })
    }

    /// Replace a source value and recompute everything downstream.
    pub fn set<T: 'static>(&self, node: &Node<T>, value: T) -> Result<(), GraphError> {
        {
            let mut inner = self.inner.borrow_mut();
            let slot = inner.nodes.get_mut(node.id.0).ok_or(GraphError::UnknownNode(node.id.0))?;
            if !matches!(slot.kind, Kind::Source) {
                return Err(GraphError::NotASource(slot.name.clone()));
            }
            if slot.type_id != TypeId::of::<T>() {
                return Err(GraphError::TypeMismatch(slot.name.clone()));
            }
            slot.value = Some(Rc::new(value));
            inner.changed.insert(node.id.0);
            inner.mark_dependents_stale(node.id.0);
        }
        self.flush();
        Ok(())
    }

    /// Apply several sets as one change batch.
    pub fn batch<R>(&self, f: impl FnOnce(&DerivedGraph) -> R) -> R {
        self.inner.borrow_mut().batch_depth += 1;
        let result = f(self);
        self.inner.borrow_mut().batch_depth -= 1;
        self.flush();
        result
    }

    /// Mirror a resource's settled state into a new source node.
    pub fn attach_resource<T: 'static>(&self, resource: &AsyncResource<T>) -> Node<LoadState<T>> {
        let node = self.source(resource.name(), resource.settled());
        let graph: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        let subscription = resource.subscribe(move |state| {
            if let Some(inner) = graph.upgrade() {
                let graph = DerivedGraph { inner };
                if let Err(e) = graph.set(&node, state.clone()) {
                    warn!("failed to propagate resource state: {}", e);
                }
            }
        });
        self.inner.borrow_mut().attachments.push(subscription);
        node
    }

    /// Cancel every resource attachment made with [`attach_resource`].
    ///
    /// [`attach_resource`]: DerivedGraph::attach_resource
    pub fn detach_resources(&self) {
        let attachments = std::mem::take(&mut self.inner.borrow_mut().attachments);
        for subscription in attachments {
            subscription.unsubscribe();
        }
    }

    /// Register a callback run after every batch that changed `node`.
    pub fn subscribe<T: 'static>(
        &self,
        node: &Node<T>,
        callback: impl Fn(Option<Rc<T>>) + 'static,
    ) -> Result<Subscription, GraphError> {
        let listener: Listener = Rc::new(move |value: Option<AnyValue>| {
            callback(value.and_then(|v| v.downcast::<T>().ok()));
        });
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner
                .nodes
                .get_mut(node.id.0)
                .ok_or(GraphError::UnknownNode(node.id.0))?
                .listeners
                .push((id, listener));
            id
        };
        let graph: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        let index = node.id.0;
        Ok(Subscription::new(move || {
            if let Some(inner) = graph.upgrade() {
                if let Some(slot) = inner.borrow_mut().nodes.get_mut(index) {
                    slot.listeners.retain(|(i, _)| *i != id);
                }
            }
        }))
    }

    /// Latest value of a node; a failed recompute leaves the previous one.
    pub fn get<T: 'static>(&self, node: &Node<T>) -> Option<Rc<T>> {
        let inner = self.inner.borrow();
        inner
            .nodes
            .get(node.id.0)?
            .value
            .clone()?
            .downcast::<T>()
            .ok()
    }

    /// Error recorded by the node's last recompute.
    pub fn error(&self, id: NodeId) -> Option<String> {
        self.inner.borrow().slot(id).ok()?.error.clone()
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.inner.borrow().slot(id).ok().map(|s| s.state)
    }

    pub fn name(&self, id: NodeId) -> Option<String> {
        self.inner.borrow().slot(id).ok().map(|s| s.name.clone())
    }

    pub fn recompute_count(&self, id: NodeId) -> u64 {
        self.inner.borrow().slot(id).map(|s| s.recomputes).unwrap_or(0)
    }

    /// Number of stabilized batches so far.
    pub fn batches(&self) -> u64 {
        self.inner.borrow().batches
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.batch_depth > 0 || inner.flushing {
                return;
            }
            inner.flushing = true;
        }
        loop {
            self.stabilize();
            self.notify();
            if !self.inner.borrow().has_stale() {
                break;
            }
        }
        self.inner.borrow_mut().flushing = false;
    }

    /// One pass over the nodes in creation order. Compute functions run
    /// with the graph unborrowed.
    fn stabilize(&self) {
        let (batch, count) = {
            let mut inner = self.inner.borrow_mut();
            inner.batches += 1;
            (inner.batches, inner.nodes.len())
        };
        for index in 0..count {
            let (name, ids, names, values, compute) = {
                let mut inner = self.inner.borrow_mut();
                let slot = &inner.nodes[index];
                if slot.state != NodeState::Stale {
                    continue;
                }
                let Kind::Derived { inputs, compute } = &slot.kind else {
                    inner.nodes[index].state = NodeState::Current;
                    continue;
                };
                let ids = inputs.clone();
                let compute = Rc::clone(compute);
                let name = slot.name.clone();
                let names: Vec<String> = ids.iter().map(|i| inner.nodes[i.0].name.clone()).collect();
                let values: Vec<Option<AnyValue>> = ids.iter().map(|i| inner.nodes[i.0].value.clone()).collect();
                inner.nodes[index].state = NodeState::Computing;
                (name, ids, names, values, compute)
            };

            let result = compute(&Inputs {
                node: &name,
                names: &names,
                ids: &ids,
                values: &values,
            });

            let mut inner = self.inner.borrow_mut();
            let slot = &mut inner.nodes[index];
            slot.recomputes += 1;
            slot.state = NodeState::Current;
            match result {
                Ok(value) => {
                    debug!("batch {}: recomputed {}", batch, name);
                    slot.value = Some(value);
                    slot.error = None;
                }
                Err(e) => {
                    warn!("batch {}: recompute of {} failed: {:#}", batch, name, e);
                    slot.error = Some(format!("{:#}", e));
                }
            }
            inner.changed.insert(index);
            inner.mark_dependents_stale(index);
        }
    }

    /// Run listeners of every changed node, in node order then
    /// registration order.
    fn notify(&self) {
        let pending: Vec<(Listener, Option<AnyValue>)> = {
            let mut inner = self.inner.borrow_mut();
            let changed = std::mem::take(&mut inner.changed);
            changed
                .into_iter()
                .flat_map(|index| {
                    let slot = &inner.nodes[index];
                    slot.listeners
                        .iter()
                        .map(|(_, l)| (Rc::clone(l), slot.value.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        for (listener, value) in pending {
            listener(value);
        }
    }
}
