use crate::graph::{Inner, remove_effect};
use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;

/// Handle to an installed effect. Dropping it removes the effect, which is
/// how a view tears its subscriptions down.
#[must_use = "dropping a Subscription removes its effect"]
pub struct Subscription {
    graph: Weak<RefCell<Inner>>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(graph: Weak<RefCell<Inner>>, id: u64) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        remove_effect(&self.graph, self.id);
    }
}
