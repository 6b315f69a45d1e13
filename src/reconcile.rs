//! Diffing of a client-supplied child collection against what is stored.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Child row owned by a single parent record.
pub trait ChildRecord: Clone {
    type Key: Ord + Clone;
    type Payload: Ord;

    /// Stored id; `None` for rows the client has not saved yet.
    fn record_id(&self) -> Option<i64>;

    /// Business identity used to match rows that carry no id.
    fn natural_key(&self) -> Self::Key;

    /// Content compared when deciding whether a matched row needs an update.
    fn payload(&self) -> Self::Payload;

    fn same_payload(&self, other: &Self) -> bool {
        self.payload() == other.payload()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan<T> {
    pub to_insert: Vec<T>,
    pub to_update: Vec<(i64, T)>,
    pub to_delete: Vec<i64>,
}

impl<T> ReconcilePlan<T> {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

impl<T> Default for ReconcilePlan<T> {
    fn default() -> Self {
        Self {
            to_insert: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
        }
    }
}

/// Total order over desired rows so the plan never depends on input order.
fn canonical<T: ChildRecord>(a: &T, b: &T) -> Ordering {
    a.natural_key()
        .cmp(&b.natural_key())
        .then_with(|| a.payload().cmp(&b.payload()))
        .then_with(|| a.record_id().cmp(&b.record_id()))
}

/// Full reconcile: rows with a known id are updated in place, rows without
/// one are matched to an unclaimed stored row with the same natural key
/// before falling back to an insert, and stored rows nobody claimed are
/// deleted. Exact matches (same key and payload) are claimed before
/// key-only matches.
pub fn reconcile_by_identity<T: ChildRecord>(desired: &[T], current: &[T]) -> ReconcilePlan<T> {
    let stored: BTreeMap<i64, &T> = current
        .iter()
        .filter_map(|c| c.record_id().map(|id| (id, c)))
        .collect();
    let mut claimed: HashSet<i64> = HashSet::new();
    let mut plan = ReconcilePlan::default();

    let mut ordered: Vec<&T> = desired.iter().collect();
    ordered.sort_by(|a, b| canonical(*a, *b));

    let mut pending: Vec<&T> = Vec::new();
    for d in ordered {
        match d.record_id() {
            Some(id) if stored.contains_key(&id) && !claimed.contains(&id) => {
                claimed.insert(id);
                if !stored[&id].same_payload(d) {
                    plan.to_update.push((id, d.clone()));
                }
            }
            _ => pending.push(d),
        }
    }

    let mut unmatched: Vec<&T> = Vec::new();
    for d in pending {
        let key = d.natural_key();
        let exact = stored
            .iter()
            .find(|(id, c)| !claimed.contains(*id) && c.natural_key() == key && c.same_payload(d))
            .map(|(id, _)| *id);
        match exact {
            Some(id) => {
                claimed.insert(id);
            }
            None => unmatched.push(d),
        }
    }

    for d in unmatched {
        let key = d.natural_key();
        let loose = stored
            .iter()
            .find(|(id, c)| !claimed.contains(*id) && c.natural_key() == key)
            .map(|(id, _)| *id);
        match loose {
            Some(id) => {
                claimed.insert(id);
                plan.to_update.push((id, d.clone()));
            }
            None => plan.to_insert.push(d.clone()),
        }
    }

    plan.to_delete = stored.keys().filter(|id| !claimed.contains(*id)).copied().collect();
    plan.to_update.sort_by_key(|(id, _)| *id);
    plan
}

/// Set reconcile on the natural key alone: missing keys are inserted, stored
/// rows whose key is no longer wanted are deleted, nothing is updated.
/// Duplicated stored keys collapse to the lowest id; duplicated desired keys
/// collapse to the lowest payload.
pub fn reconcile_by_natural_key<T: ChildRecord>(desired: &[T], current: &[T]) -> ReconcilePlan<T> {
    let mut wanted: BTreeMap<T::Key, &T> = BTreeMap::new();
    for d in desired {
        let key = d.natural_key();
        match wanted.get(&key) {
            Some(w) if canonical(*w, d) != Ordering::Greater => {}
            _ => {
                wanted.insert(key, d);
            }
        }
    }

    let mut sorted: Vec<&T> = current.iter().collect();
    sorted.sort_by_key(|c| c.record_id());
    let mut kept: BTreeSet<T::Key> = BTreeSet::new();
    let mut plan = ReconcilePlan::default();
    for c in sorted {
        let key = c.natural_key();
        let Some(id) = c.record_id() else {
            continue;
        };
        if wanted.contains_key(&key) && kept.insert(key) {
            continue;
        }
        plan.to_delete.push(id);
    }

    plan.to_insert = wanted
        .into_iter()
        .filter(|(k, _)| !kept.contains(k))
        .map(|(_, d)| d.clone())
        .collect();
    plan.to_delete.sort_unstable();
    plan
}
