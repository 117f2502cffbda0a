use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Product -> version map of everything that must survive cleanup.
///
/// Shared between resolver workers. The only mutation is
/// [`RetainedSet::insert_if_absent`], so a product's version is written
/// exactly once and the map only ever grows.
#[derive(Debug, Clone, Default)]
pub struct RetainedSet {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl RetainedSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // Entries are never left half-written, so a poisoned map is still valid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `product -> version` unless the product is already retained.
    /// Returns whether this call performed the insert.
    pub fn insert_if_absent(&self, product: &str, version: &str) -> bool {
        let mut map = self.lock();
        if map.contains_key(product) {
            return false;
        }
        map.insert(product.to_string(), version.to_string());
        true
    }

    pub fn version_of(&self, product: &str) -> Option<String> {
        self.lock().get(product).cloned()
    }

    pub fn products(&self) -> Vec<String> {
        let mut products: Vec<String> = self.lock().keys().cloned().collect();
        products.sort();
        products
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot used by the pruning phases once resolution has finished.
    pub fn freeze(&self) -> Closure {
        Closure(self.lock().iter().map(|(p, v)| (p.clone(), v.clone())).collect())
    }
}

/// Read-only, ordered view of the final retained set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Closure(BTreeMap<String, String>);

impl Closure {
    pub fn get(&self, product: &str) -> Option<&str> {
        self.0.get(product).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<P: Into<String>, V: Into<String>> FromIterator<(P, V)> for Closure {
    fn from_iter<I: IntoIterator<Item = (P, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(p, v)| (p.into(), v.into())).collect())
    }
}
