use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeOwner};
use crate::lens::{Lens, Path};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Anything a derived cell or an effect can read.
pub trait Readable: Clone + 'static {
    type Value: Clone + PartialEq + 'static;

    /// The graph node that changes when this value may have changed.
    fn node(&self) -> NodeId;

    fn try_get(&self) -> Result<Self::Value>;

    /// Read the current value.
    ///
    /// # Panics
    ///
    /// Panics if the read closes a dependency cycle between derived cells.
    fn get(&self) -> Self::Value {
        match self.try_get() {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
}

/// A cell that accepts writes.
pub trait Writable: Readable {
    /// Commit `value`. Returns `false`, and notifies nobody, when it equals
    /// the current value.
    fn set(&self, value: Self::Value) -> bool;
}

struct Slot<T> {
    value: T,
    initial: T,
}

/// Primitive cell, written from outside the graph.
pub struct Cell<T> {
    graph: Graph,
    owner: Rc<NodeOwner>,
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            owner: self.owner.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("node", &self.owner.id())
            .field("value", &self.slot.borrow().value)
            .finish()
    }
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    pub(crate) fn new(graph: Graph, owner: Rc<NodeOwner>, initial: T) -> Self {
        Self {
            graph,
            owner,
            slot: Rc::new(RefCell::new(Slot {
                value: initial.clone(),
                initial,
            })),
        }
    }

    pub fn get(&self) -> T {
        self.slot.borrow().value.clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.slot.borrow().value)
    }

    pub fn set(&self, value: T) -> bool {
        {
            let mut slot = self.slot.borrow_mut();
            if slot.value == value {
                return false;
            }
            slot.value = value;
        }
        self.graph.mark_changed(self.owner.id());
        true
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = self.with(f);
        self.set(next)
    }

    /// Restore the value the cell was created with.
    pub fn reset(&self) -> bool {
        let initial = self.slot.borrow().initial.clone();
        self.set(initial)
    }

    /// A read-write view on the part of this cell selected by `path`.
    pub fn lens<A>(&self, path: Path<T, A>) -> Lens<T, A>
    where
        A: Clone + PartialEq + 'static,
    {
        Lens::new(self.clone(), path)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl<T> Readable for Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    type Value = T;

    fn node(&self) -> NodeId {
        self.owner.id()
    }

    fn try_get(&self) -> Result<T> {
        Ok(Cell::get(self))
    }
}

impl<T> Writable for Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    fn set(&self, value: T) -> bool {
        Cell::set(self, value)
    }
}

/// Handed to derived computations; every read through it becomes a
/// dependency edge.
pub struct Getter<'a> {
    graph: &'a Graph,
    dependent: NodeId,
}

impl Getter<'_> {
    /// # Panics
    ///
    /// Panics if reading `source` would close a dependency cycle.
    pub fn get<R: Readable>(&self, source: &R) -> R::Value {
        match self.try_get(source) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_get<R: Readable>(&self, source: &R) -> Result<R::Value> {
        self.graph.track(self.dependent, source.node())?;
        source.try_get()
    }
}

type Compute<T> = Rc<dyn Fn(&Getter<'_>) -> T>;

/// Read-only cell computed from other cells, memoized until one of them
/// changes.
pub struct Derived<T> {
    graph: Graph,
    owner: Rc<NodeOwner>,
    memo: Rc<RefCell<Option<T>>>,
    compute: Compute<T>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            owner: self.owner.clone(),
            memo: self.memo.clone(),
            compute: self.compute.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("node", &self.owner.id())
            .field("memo", &self.memo.borrow())
            .finish()
    }
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    pub(crate) fn new(graph: Graph, owner: Rc<NodeOwner>, compute: Compute<T>) -> Self {
        Self {
            graph,
            owner,
            memo: Rc::new(RefCell::new(None)),
            compute,
        }
    }
}

impl<T> Readable for Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    type Value = T;

    fn node(&self) -> NodeId {
        self.owner.id()
    }

    fn try_get(&self) -> Result<T> {
        if !self.graph.is_dirty(self.owner.id())
            && let Some(value) = self.memo.borrow().as_ref()
        {
            return Ok(value.clone());
        }

        let guard = self.graph.begin_compute(self.owner.id())?;
        trace!(node = %self.owner.id(), "recomputing derived cell");
        let getter = Getter {
            graph: &self.graph,
            dependent: self.owner.id(),
        };
        let value = (self.compute)(&getter);
        guard.finish();
        *self.memo.borrow_mut() = Some(value.clone());
        Ok(value)
    }
}
