use crate::cell::{Cell, Derived, Getter, Readable};
use crate::effect::Subscription;
use crate::error::{GraphError, Result};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Opaque handle to a node of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(NodeIndex);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Primitive,
    Derived,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    dirty: bool,
    computing: bool,
}

type EffectFn = Rc<RefCell<dyn FnMut()>>;

struct EffectSlot {
    node: NodeId,
    run: EffectFn,
}

pub(crate) struct Inner {
    // Edges point from a dependency to the cell that reads it.
    deps: StableDiGraph<Node, ()>,
    effects: BTreeMap<u64, EffectSlot>,
    next_effect: u64,
    queue: VecDeque<u64>,
    flushing: bool,
}

/// Owner of every cell, their dependency edges and the registered effects.
///
/// A graph is single threaded. Handles are cheap to clone and all point at
/// the same state.
#[derive(Clone)]
pub struct Graph {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Graph")
            .field("cells", &inner.deps.node_count())
            .field("edges", &inner.deps.edge_count())
            .field("effects", &inner.effects.len())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                deps: StableDiGraph::new(),
                effects: BTreeMap::new(),
                next_effect: 0,
                queue: VecDeque::new(),
                flushing: false,
            })),
        }
    }

    /// Create a primitive, externally writable cell.
    pub fn cell<T>(&self, initial: T) -> Cell<T>
    where
        T: Clone + PartialEq + 'static,
    {
        let owner = self.add_node(NodeKind::Primitive);
        Cell::new(self.clone(), owner, initial)
    }

    /// Create a read-only cell computed from other cells.
    ///
    /// `compute` runs lazily on the first read and again only after a cell
    /// it read through the [`Getter`] has changed. It must be pure.
    pub fn derive<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn(&Getter<'_>) -> T + 'static,
    {
        let owner = self.add_node(NodeKind::Derived);
        Derived::new(self.clone(), owner, Rc::new(compute))
    }

    /// Run `run` with the new value every time `source` changes.
    ///
    /// The effect does not run for the current value. It stays installed
    /// until the returned [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<R, F>(&self, source: &R, mut run: F) -> Subscription
    where
        R: Readable,
        F: FnMut(&R::Value) + 'static,
    {
        // Reading once wires up the edges of a derived source, otherwise a
        // write upstream would never reach this effect.
        let mut last = source.try_get().ok();
        let watched = source.clone();
        let effect = move || match watched.try_get() {
            Ok(value) => {
                if last.as_ref() != Some(&value) {
                    run(&value);
                    last = Some(value);
                }
            }
            Err(e) => warn!("Skipping effect: {}", e),
        };

        let mut inner = self.inner.borrow_mut();
        let id = inner.next_effect;
        inner.next_effect += 1;
        inner.effects.insert(
            id,
            EffectSlot {
                node: source.node(),
                run: Rc::new(RefCell::new(effect)),
            },
        );
        trace!(effect = id, node = %source.node(), "effect installed");
        Subscription::new(Rc::downgrade(&self.inner), id)
    }

    pub fn effect_count(&self) -> usize {
        self.inner.borrow().effects.len()
    }

    /// Number of live cells, derived cells included.
    pub fn cell_count(&self) -> usize {
        self.inner.borrow().deps.node_count()
    }

    fn add_node(&self, kind: NodeKind) -> Rc<NodeOwner> {
        let node = NodeId(self.inner.borrow_mut().deps.add_node(Node {
            kind,
            dirty: kind == NodeKind::Derived,
            computing: false,
        }));
        Rc::new(NodeOwner {
            graph: Rc::downgrade(&self.inner),
            node,
        })
    }

    /// Record that `dependent` read `dependency` during its computation.
    pub(crate) fn track(&self, dependent: NodeId, dependency: NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.deps.contains_edge(dependency.0, dependent.0) {
            return Ok(());
        }
        if dependent == dependency
            || has_path_connecting(&inner.deps, dependent.0, dependency.0, None)
        {
            return Err(GraphError::Cycle(dependent));
        }
        inner.deps.update_edge(dependency.0, dependent.0, ());
        Ok(())
    }

    pub(crate) fn is_dirty(&self, node: NodeId) -> bool {
        self.inner
            .borrow()
            .deps
            .node_weight(node.0)
            .is_none_or(|n| n.dirty)
    }

    /// Mark `node` as computing and forget the edges of its previous run.
    pub(crate) fn begin_compute(&self, node: NodeId) -> Result<ComputeGuard> {
        let mut inner = self.inner.borrow_mut();
        match inner.deps.node_weight_mut(node.0) {
            Some(n) if n.computing => return Err(GraphError::Cycle(node)),
            Some(n) => n.computing = true,
            None => return Err(GraphError::Cycle(node)),
        }
        let stale: Vec<_> = inner
            .deps
            .edges_directed(node.0, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            inner.deps.remove_edge(edge);
        }
        Ok(ComputeGuard {
            graph: Rc::downgrade(&self.inner),
            node,
        })
    }

    /// Invalidate everything downstream of `node` and run the effects
    /// watching any of it.
    pub(crate) fn mark_changed(&self, node: NodeId) {
        {
            let mut inner = self.inner.borrow_mut();
            let mut touched = HashSet::new();
            let mut dfs = Dfs::new(&inner.deps, node.0);
            while let Some(n) = dfs.next(&inner.deps) {
                touched.insert(n);
            }
            for n in &touched {
                if let Some(weight) = inner.deps.node_weight_mut(*n)
                    && weight.kind == NodeKind::Derived
                    && *n != node.0
                {
                    weight.dirty = true;
                }
            }
            let queued: Vec<u64> = inner
                .effects
                .iter()
                .filter(|(_, slot)| touched.contains(&slot.node.0))
                .map(|(id, _)| *id)
                .collect();
            trace!(node = %node, cells = touched.len(), effects = queued.len(), "cell changed");
            inner.queue.extend(queued);
        }
        self.flush();
    }

    fn flush(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.flushing {
                return;
            }
            inner.flushing = true;
        }
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                match inner.queue.pop_front() {
                    Some(id) => inner.effects.get(&id).map(|slot| slot.run.clone()),
                    None => {
                        inner.flushing = false;
                        return;
                    }
                }
            };
            // An effect whose write re-queues itself picks the change up on
            // its next turn in the queue.
            if let Some(run) = next
                && let Ok(mut run) = run.try_borrow_mut()
            {
                (*run)();
            }
        }
    }
}

/// Shared by every clone of a cell. The last one dropped takes the node,
/// and its edges, out of the graph.
pub(crate) struct NodeOwner {
    graph: Weak<RefCell<Inner>>,
    node: NodeId,
}

impl NodeOwner {
    pub(crate) fn id(&self) -> NodeId {
        self.node
    }
}

impl Drop for NodeOwner {
    fn drop(&mut self) {
        let Some(inner) = self.graph.upgrade() else {
            return;
        };
        match inner.try_borrow_mut() {
            Ok(mut inner) => {
                inner.deps.remove_node(self.node.0);
                trace!(node = %self.node, "cell dropped");
            }
            Err(_) => warn!(node = %self.node, "graph busy, cell could not be removed"),
        }
    }
}

/// Clears the `computing` flag of a derived node once its computation ends,
/// including by unwinding.
pub(crate) struct ComputeGuard {
    graph: Weak<RefCell<Inner>>,
    node: NodeId,
}

impl ComputeGuard {
    pub(crate) fn finish(self) {
        if let Some(inner) = self.graph.upgrade()
            && let Some(n) = inner.borrow_mut().deps.node_weight_mut(self.node.0)
        {
            n.dirty = false;
        }
    }
}

impl Drop for ComputeGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.graph.upgrade()
            && let Ok(mut inner) = inner.try_borrow_mut()
            && let Some(n) = inner.deps.node_weight_mut(self.node.0)
        {
            n.computing = false;
        }
    }
}

pub(crate) fn remove_effect(graph: &Weak<RefCell<Inner>>, id: u64) -> bool {
    let Some(inner) = graph.upgrade() else {
        return false;
    };
    match inner.try_borrow_mut() {
        Ok(mut guard) => {
            let slot = guard.effects.remove(&id);
            // The effect owns clones of the cells it reads; they must drop
            // after the borrow ends.
            drop(guard);
            slot.is_some()
        }
        Err(_) => {
            warn!(effect = id, "graph busy, effect could not be removed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_rejects_self_edge() {
        let graph = Graph::new();
        let cell = graph.cell(1);
        let node = cell.node();
        assert_eq!(graph.track(node, node), Err(GraphError::Cycle(node)));
    }

    #[test]
    fn test_track_rejects_back_edge() {
        let graph = Graph::new();
        let a = graph.derive(|_| 1);
        let b = graph.derive(|_| 2);
        graph.track(b.node(), a.node()).unwrap();
        assert_eq!(
            graph.track(a.node(), b.node()),
            Err(GraphError::Cycle(a.node()))
        );
    }

    #[test]
    fn test_new_derived_node_starts_dirty() {
        let graph = Graph::new();
        let cell = graph.cell(0);
        let derived = graph.derive(|_| 0);
        assert!(!graph.is_dirty(cell.node()));
        assert!(graph.is_dirty(derived.node()));
    }

    #[test]
    fn test_track_same_edge_twice() {
        let graph = Graph::new();
        let cell = graph.cell(1);
        let derived = graph.derive(|_| 0);
        graph.track(derived.node(), cell.node()).unwrap();
        graph.track(derived.node(), cell.node()).unwrap();
        assert_eq!(graph.inner.borrow().deps.edge_count(), 1);
    }

    #[test]
    fn test_node_id_display() {
        let graph = Graph::new();
        let cell = graph.cell(0);
        assert_eq!(cell.node().to_string(), "#0");
    }
}
