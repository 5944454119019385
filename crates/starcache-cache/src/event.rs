//! Cache events and listener plumbing.
//!
//! Inner listener objects are replaced with a tagged event record plus a
//! plain list of listener functions, each addressable by id for removal.

use std::sync::Arc;

use starcache_segment::SegmentHeader;

/// What happened to a segment in a cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEventKind {
    Created,
    Deleted,
}

/// A cache tier event.
#[derive(Debug, Clone)]
pub struct SegmentCacheEvent {
    /// Whether the event originated in this process.
    pub is_local: bool,
    /// Header of the affected segment.
    pub source: Arc<SegmentHeader>,
    pub kind: SegmentEventKind,
}

/// Handle for removing a registered listener.
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&SegmentCacheEvent) + Send + Sync>;

/// Ordered list of listener functions.
#[derive(Default)]
pub struct ListenerList {
    next_id: ListenerId,
    listeners: Vec<(ListenerId, Listener)>,
}

impl std::fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerList")
            .field("count", &self.listeners.len())
            .finish()
    }
}

impl ListenerList {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned id removes it.
    pub fn add(&mut self, listener: Listener) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was present.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver an event to every listener in registration order.
    pub fn emit(&self, event: &SegmentCacheEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starcache_predicate::ColumnPredicate;
    use starcache_types::{ColumnDesc, Datum, MeasureExpr, RollupAggregator, Star, StarId};
    use std::sync::Mutex;

    fn test_header() -> Arc<SegmentHeader> {
        let star = Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![ColumnDesc::plain("year", 10)],
        );
        let measure = MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum);
        Arc::new(SegmentHeader::new(
            &star,
            &measure,
            vec![(0, ColumnPredicate::ValueEq(Datum::Int(1997)))],
            &[],
        ))
    }

    #[test]
    fn test_emit_reaches_all_listeners_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = ListenerList::new();
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            listeners.add(Arc::new(move |event: &SegmentCacheEvent| {
                seen.lock()
                    .expect("test mutex")
                    .push((tag, event.kind));
            }));
        }
        listeners.emit(&SegmentCacheEvent {
            is_local: true,
            source: test_header(),
            kind: SegmentEventKind::Created,
        });
        assert_eq!(
            *seen.lock().expect("test mutex"),
            vec![("a", SegmentEventKind::Created), ("b", SegmentEventKind::Created)]
        );
    }

    #[test]
    fn test_remove_by_id() {
        let mut listeners = ListenerList::new();
        let id = listeners.add(Arc::new(|_| {}));
        assert_eq!(listeners.len(), 1);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id), "second removal is a no-op");
        assert!(listeners.is_empty());
    }
}
