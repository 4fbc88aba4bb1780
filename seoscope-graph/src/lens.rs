use crate::cell::{Cell, Readable, Writable};
use crate::error::Result;
use crate::graph::NodeId;
use std::fmt;

/// Pure accessor pair focusing on one part of `S`.
///
/// Works on plain values, no graph needed. A [`Lens`] is a `Path` applied to
/// a [`Cell`].
pub struct Path<S, A> {
    get: fn(&S) -> &A,
    get_mut: fn(&mut S) -> &mut A,
}

impl<S, A> Clone for Path<S, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, A> Copy for Path<S, A> {}

impl<S, A> fmt::Debug for Path<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Path")
    }
}

impl<S, A> Path<S, A> {
    pub const fn new(get: fn(&S) -> &A, get_mut: fn(&mut S) -> &mut A) -> Self {
        Self { get, get_mut }
    }

    pub fn get<'a>(&self, root: &'a S) -> &'a A {
        (self.get)(root)
    }

    pub fn over(&self, root: &mut S, f: impl FnOnce(&mut A)) {
        f((self.get_mut)(root));
    }
}

impl<S: Clone, A> Path<S, A> {
    /// Copy of `root` with the focused part replaced by `value`; every
    /// sibling is left as it was.
    pub fn with(&self, root: &S, value: A) -> S {
        let mut next = root.clone();
        *(self.get_mut)(&mut next) = value;
        next
    }
}

/// Build a [`Path`] to a field: `path!(Settings => base_url)`.
#[macro_export]
macro_rules! path {
    ($root:ty => $($field:tt).+) => {
        $crate::Path::<$root, _>::new(
            |root| &root.$($field).+,
            |root| &mut root.$($field).+,
        )
    };
}

/// Read-write view on a sub-path of a larger cell.
pub struct Lens<S, A> {
    parent: Cell<S>,
    path: Path<S, A>,
}

impl<S, A> Clone for Lens<S, A> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            path: self.path,
        }
    }
}

impl<S, A> Lens<S, A>
where
    S: Clone + PartialEq + 'static,
    A: Clone + PartialEq + 'static,
{
    pub(crate) fn new(parent: Cell<S>, path: Path<S, A>) -> Self {
        Self { parent, path }
    }

    pub fn get(&self) -> A {
        self.parent.with(|root| self.path.get(root).clone())
    }

    /// Rebuild the parent with only this sub-path replaced.
    pub fn set(&self, value: A) -> bool {
        let next = self.parent.with(|root| {
            if self.path.get(root) == &value {
                None
            } else {
                Some(self.path.with(root, value))
            }
        });
        match next {
            Some(root) => self.parent.set(root),
            None => false,
        }
    }

    pub fn update(&self, f: impl FnOnce(&A) -> A) -> bool {
        let next = self.parent.with(|root| f(self.path.get(root)));
        self.set(next)
    }

    pub fn parent(&self) -> &Cell<S> {
        &self.parent
    }
}

impl<S, A> Readable for Lens<S, A>
where
    S: Clone + PartialEq + 'static,
    A: Clone + PartialEq + 'static,
{
    type Value = A;

    // A lens has no node of its own; readers depend on the whole parent and
    // effects compare the focused value.
    fn node(&self) -> NodeId {
        self.parent.node()
    }

    fn try_get(&self) -> Result<A> {
        Ok(Lens::get(self))
    }
}

impl<S, A> Writable for Lens<S, A>
where
    S: Clone + PartialEq + 'static,
    A: Clone + PartialEq + 'static,
{
    fn set(&self, value: A) -> bool {
        Lens::set(self, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Inner {
        depth: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Root {
        name: String,
        inner: Inner,
    }

    fn root() -> Root {
        Root {
            name: "a".to_string(),
            inner: Inner { depth: 1 },
        }
    }

    #[test]
    fn test_path_with_replaces_only_focus() {
        let path: Path<Root, String> = path!(Root => name);
        let next = path.with(&root(), "b".to_string());
        assert_eq!(next.name, "b");
        assert_eq!(next.inner, Inner { depth: 1 });
    }

    #[test]
    fn test_path_nested_field() {
        let path: Path<Root, u32> = path!(Root => inner.depth);
        let original = root();
        let next = path.with(&original, 7);
        assert_eq!(*path.get(&next), 7);
        assert_eq!(*path.get(&original), 1);
    }

    #[test]
    fn test_path_over_mutates_in_place() {
        let path: Path<Root, u32> = path!(Root => inner.depth);
        let mut value = root();
        path.over(&mut value, |d| *d += 4);
        assert_eq!(value.inner.depth, 5);
    }
}
