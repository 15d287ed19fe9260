//! Display ordering for local collections.
//!
//! A policy is a pure comparator. The synchronizer re-sorts after every
//! optimistic mutation and after every reconciled change event, so both
//! paths always agree on presentation order.

use std::cmp::Ordering;

use crate::entity::Entity;

pub trait SortPolicy<E>: Send + Sync {
    /// Total order over records. Implementations must end in a unique
    /// tie-break (the record id) so sorting is deterministic.
    fn compare(&self, a: &E, b: &E) -> Ordering;
}

/// Sort `records` in place. Stable, so equal keys keep their relative order.
pub fn apply<E: Entity>(policy: &dyn SortPolicy<E>, records: &mut [E]) {
    records.sort_by(|a, b| policy.compare(a, b));
}

/// Whether `records` already satisfies `policy`.
pub fn is_sorted<E: Entity>(policy: &dyn SortPolicy<E>, records: &[E]) -> bool {
    records
        .windows(2)
        .all(|pair| policy.compare(&pair[0], &pair[1]) != Ordering::Greater)
}

/// Open records before finished ones.
#[must_use]
pub fn open_first(a_done: bool, b_done: bool) -> Ordering {
    a_done.cmp(&b_done)
}

/// Records with a value before records without one, values ascending.
#[must_use]
pub fn some_first<T: Ord>(a: Option<&T>, b: Option<&T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_sorts_before_done() {
        assert_eq!(open_first(false, true), Ordering::Less);
        assert_eq!(open_first(true, false), Ordering::Greater);
        assert_eq!(open_first(true, true), Ordering::Equal);
    }

    #[test]
    fn missing_values_sort_last() {
        assert_eq!(some_first(Some(&3), None), Ordering::Less);
        assert_eq!(some_first::<i32>(None, Some(&1)), Ordering::Greater);
        assert_eq!(some_first(Some(&1), Some(&2)), Ordering::Less);
    }
}
