use std::collections::BTreeMap;

use tracing::warn;

use super::CanonicalStore;
use crate::error::Result;
use crate::model::StoreId;

/// The stores of one run, addressed by the `target_store` of work items.
///
/// Results for an id that was never registered go to the primary store.
#[derive(Debug, Default)]
pub struct StoreSet {
    primary: CanonicalStore,
    others: BTreeMap<StoreId, CanonicalStore>,
}

impl StoreSet {
    pub fn single(primary: CanonicalStore) -> Self {
        Self {
            primary,
            others: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: StoreId, store: CanonicalStore) -> Option<CanonicalStore> {
        if id == StoreId::PRIMARY {
            return Some(std::mem::replace(&mut self.primary, store));
        }
        self.others.insert(id, store)
    }

    pub fn get(&self, id: StoreId) -> Option<&CanonicalStore> {
        if id == StoreId::PRIMARY {
            return Some(&self.primary);
        }
        self.others.get(&id)
    }

    pub fn primary(&self) -> &CanonicalStore {
        &self.primary
    }

    pub fn route(&mut self, id: StoreId) -> &mut CanonicalStore {
        if id == StoreId::PRIMARY {
            return &mut self.primary;
        }
        match self.others.get_mut(&id) {
            Some(store) => store,
            None => {
                warn!("No store registered as {}, routing to the primary store", id);
                &mut self.primary
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StoreId, &CanonicalStore)> {
        std::iter::once((StoreId::PRIMARY, &self.primary))
            .chain(self.others.iter().map(|(id, store)| (*id, store)))
    }

    pub fn refresh_file_status(&mut self) -> usize {
        self.primary.refresh_file_status()
            + self
                .others
                .values_mut()
                .map(CanonicalStore::refresh_file_status)
                .sum::<usize>()
    }

    /// Save every store that has a backing path.
    pub fn save_all(&self) -> Result<()> {
        for (_, store) in self.iter() {
            if store.path().is_some() {
                store.save()?;
            }
        }
        Ok(())
    }

    pub fn into_primary(self) -> CanonicalStore {
        self.primary
    }
}
