//! Sets of addresses under observation.
//!
//! Balance observation drives `GET /balances`; history observation tells the
//! external indexing job which addresses to follow.

use std::ops::Bound;

use sled::Tree;

use super::db::{composite_key, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Balances,
    HistoryFrom,
    HistoryTo,
}

impl ObservationKind {
    fn as_str(self) -> &'static str {
        match self {
            ObservationKind::Balances => "balances",
            ObservationKind::HistoryFrom => "history-from",
            ObservationKind::HistoryTo => "history-to",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservationStore {
    tree: Tree,
}

impl ObservationStore {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Start observing. `false` if the address was already observed.
    pub fn add(&self, kind: ObservationKind, address: &str) -> DbResult<bool> {
        let added = self
            .tree
            .compare_and_swap(
                composite_key(&[kind.as_str(), address]),
                None::<&[u8]>,
                Some(&[] as &[u8]),
            )?
            .is_ok();
        if added {
            tracing::info!(kind = kind.as_str(), address, "observation started");
        }
        Ok(added)
    }

    /// Stop observing. `false` if the address was not observed.
    pub fn remove(&self, kind: ObservationKind, address: &str) -> DbResult<bool> {
        let removed = self
            .tree
            .remove(composite_key(&[kind.as_str(), address]))?
            .is_some();
        if removed {
            tracing::info!(kind = kind.as_str(), address, "observation stopped");
        }
        Ok(removed)
    }

    pub fn contains(&self, kind: ObservationKind, address: &str) -> DbResult<bool> {
        Ok(self
            .tree
            .contains_key(composite_key(&[kind.as_str(), address]))?)
    }

    /// Up to `take` observed addresses, ordered, starting after
    /// `continuation`. Returns the continuation for the next page.
    pub fn list(
        &self,
        kind: ObservationKind,
        take: usize,
        continuation: Option<&str>,
    ) -> DbResult<(Vec<String>, Option<String>)> {
        let mut prefix = kind.as_str().as_bytes().to_vec();
        prefix.push(0);

        let start = match continuation {
            Some(after) => Bound::Excluded(composite_key(&[kind.as_str(), after])),
            None => Bound::Included(prefix.clone()),
        };

        let mut addresses = Vec::new();
        let mut more = false;
        for item in self.tree.range((start, Bound::Unbounded)) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if addresses.len() == take {
                more = true;
                break;
            }
            addresses.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }

        let next = if more { addresses.last().cloned() } else { None };
        Ok((addresses, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GatewayDB;

    #[test]
    fn add_is_exclusive_and_remove_reports_absence() {
        let db = GatewayDB::open_temporary().unwrap();
        let store = db.observations();

        assert!(store.add(ObservationKind::Balances, "rA").unwrap());
        assert!(!store.add(ObservationKind::Balances, "rA").unwrap());
        assert!(store.contains(ObservationKind::Balances, "rA").unwrap());
        assert!(!store.contains(ObservationKind::HistoryFrom, "rA").unwrap());

        assert!(store.remove(ObservationKind::Balances, "rA").unwrap());
        assert!(!store.remove(ObservationKind::Balances, "rA").unwrap());
    }

    #[test]
    fn lists_one_kind_in_pages() {
        let db = GatewayDB::open_temporary().unwrap();
        let store = db.observations();
        for address in ["rA", "rB", "rC"] {
            store.add(ObservationKind::Balances, address).unwrap();
        }
        store.add(ObservationKind::HistoryTo, "rZ").unwrap();

        let (page, next) = store.list(ObservationKind::Balances, 2, None).unwrap();
        assert_eq!(page, vec!["rA", "rB"]);
        assert_eq!(next.as_deref(), Some("rB"));

        let (page, next) = store
            .list(ObservationKind::Balances, 2, next.as_deref())
            .unwrap();
        assert_eq!(page, vec!["rC"]);
        assert!(next.is_none());
    }
}
