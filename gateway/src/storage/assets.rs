//! Asset repository, keyed by asset id.

use std::ops::Bound;

use sled::Tree;

use super::db::{decode, encode, DbResult};
use crate::asset::Asset;

#[derive(Debug, Clone)]
pub struct AssetStore {
    tree: Tree,
}

impl AssetStore {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub fn upsert(&self, asset: &Asset) -> DbResult<()> {
        self.tree.insert(asset.asset_id.as_bytes(), encode(asset)?)?;
        tracing::debug!(asset_id = %asset.asset_id, issuer = %asset.address, "asset stored");
        Ok(())
    }

    pub fn get(&self, asset_id: &str) -> DbResult<Option<Asset>> {
        match self.tree.get(asset_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Up to `take` assets ordered by id, starting after `continuation`.
    ///
    /// Returns the page and the continuation for the next one, `None` once
    /// the listing is exhausted.
    pub fn list(
        &self,
        take: usize,
        continuation: Option<&str>,
    ) -> DbResult<(Vec<Asset>, Option<String>)> {
        let start = match continuation {
            Some(after) => Bound::Excluded(after.as_bytes().to_vec()),
            None => Bound::Unbounded,
        };

        let mut page = Vec::with_capacity(take);
        let mut iter = self.tree.range((start, Bound::Unbounded));
        for item in iter.by_ref().take(take) {
            let (_key, value) = item?;
            page.push(decode::<Asset>(&value)?);
        }

        let next = match (iter.next(), page.last()) {
            (Some(_), Some(last)) => Some(last.asset_id.clone()),
            _ => None,
        };
        Ok((page, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GatewayDB;

    fn issued(id: &str) -> Asset {
        Asset {
            asset_id: id.to_string(),
            address: "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh".into(),
            accuracy: 2,
            name: id.to_string(),
        }
    }

    #[test]
    fn upsert_replaces() {
        let db = GatewayDB::open_temporary().unwrap();
        let store = db.assets();
        store.upsert(&issued("USD")).unwrap();

        let mut renamed = issued("USD");
        renamed.name = "US Dollar".into();
        store.upsert(&renamed).unwrap();

        assert_eq!(store.get("USD").unwrap().unwrap().name, "US Dollar");
    }

    #[test]
    fn pages_by_continuation() {
        let db = GatewayDB::open_temporary().unwrap();
        let store = db.assets();
        for id in ["EUR", "USD", "XRP"] {
            store.upsert(&issued(id)).unwrap();
        }

        let (first, next) = store.list(2, None).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(next.as_deref(), Some("USD"));

        let (second, next) = store.list(2, next.as_deref()).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].asset_id, "XRP");
        assert!(next.is_none());
    }

    #[test]
    fn exact_page_has_no_continuation() {
        let db = GatewayDB::open_temporary().unwrap();
        db.assets().upsert(&issued("EUR")).unwrap();
        let (page, next) = db.assets().list(1, None).unwrap();
        assert_eq!(page.len(), 1);
        assert!(next.is_none());
    }
}
