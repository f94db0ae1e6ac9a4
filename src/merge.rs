//! Reconciliation of server snapshots with locally-known pending state.
//!
//! The server snapshot is the source of truth. The one exception: an entry we
//! know is pending (just created or just triggered) may not have propagated
//! to the read path yet, and dropping it would make it flicker out of the UI
//! until the next sync. For those ids the local copy is retained.
//!
//! Local optimistic edits to content fields are *not* protected here - where
//! server and local share an id, the server copy wins wholesale.

use std::collections::HashSet;

/// Items that carry a stable id the merge can key on.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Merge `server` (authoritative) with `local`, keeping local copies of any
/// id in `pending` that the server snapshot does not contain yet.
///
/// Server order is preserved; retained pending entries follow in local order.
/// The operation is idempotent: reconciling a result against the same
/// snapshot and pending set yields the same list.
pub fn reconcile<T: Keyed + Clone>(
    server: &[T],
    local: &[T],
    pending: &HashSet<String>,
) -> Vec<T> {
    let server_ids: HashSet<&str> = server.iter().map(|item| item.key()).collect();

    let mut merged: Vec<T> = server.to_vec();
    for item in local {
        if pending.contains(item.key()) && !server_ids.contains(item.key()) {
            merged.push(item.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        body: String,
    }

    impl Item {
        fn new(id: &str, body: &str) -> Self {
            Self {
                id: id.into(),
                body: body.into(),
            }
        }
    }

    impl Keyed for Item {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn pending(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_server_wins_on_shared_ids() {
        let server = vec![Item::new("a", "server")];
        let local = vec![Item::new("a", "local edit")];
        let merged = reconcile(&server, &local, &pending(&["a"]));
        assert_eq!(merged, vec![Item::new("a", "server")]);
    }

    #[test]
    fn test_pending_entry_absent_from_server_is_retained() {
        // A just-uploaded file still indexing server-side.
        let server = vec![Item::new("a", "ok")];
        let local = vec![Item::new("a", "stale"), Item::new("f1", "uploading")];
        let merged = reconcile(&server, &local, &pending(&["f1"]));
        assert_eq!(
            merged,
            vec![Item::new("a", "ok"), Item::new("f1", "uploading")]
        );
    }

    #[test]
    fn test_non_pending_local_entries_are_dropped() {
        let server: Vec<Item> = vec![];
        let local = vec![Item::new("gone", "deleted server-side")];
        let merged = reconcile(&server, &local, &HashSet::new());
        assert!(merged.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let server = vec![Item::new("a", "s"), Item::new("b", "s")];
        let local = vec![Item::new("b", "l"), Item::new("c", "l")];
        let p = pending(&["c"]);

        let once = reconcile(&server, &local, &p);
        let twice = reconcile(&server, &once, &p);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unrelated_keys_commute() {
        let server = vec![Item::new("a", "s")];
        let local_x = vec![Item::new("x", "l")];
        let local_y = vec![Item::new("y", "l")];

        let mut via_x_then_y = reconcile(&server, &local_x, &pending(&["x"]));
        via_x_then_y = reconcile(&via_x_then_y, &local_y, &pending(&["y"]));

        let mut via_y_then_x = reconcile(&server, &local_y, &pending(&["y"]));
        via_y_then_x = reconcile(&via_y_then_x, &local_x, &pending(&["x"]));

        let ids = |items: &[Item]| {
            let mut v: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(ids(&via_x_then_y), ids(&via_y_then_x));
    }
}
