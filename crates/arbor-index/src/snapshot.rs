use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

#[derive(Clone)]
struct Entry<U, V> {
    unit: U,
    value: V,
}

/// An immutable generation of the index.
///
/// Every entry is attributed to the source unit that produced it, so a unit's
/// contributions can be replaced as a whole when the unit is rescanned.
#[derive(Clone)]
pub struct IndexSnapshot<U, K, V> {
    generation: u64,
    entries: HashMap<K, Entry<U, V>>,
    by_unit: HashMap<U, HashSet<K>>,
}

impl<U, K, V> Default for IndexSnapshot<U, K, V> {
    fn default() -> Self {
        Self {
            generation: 0,
            entries: HashMap::new(),
            by_unit: HashMap::new(),
        }
    }
}

impl<U, K, V> IndexSnapshot<U, K, V>
where
    U: Clone + Eq + Hash,
    K: Clone + Eq + Hash,
{
    /// Number of merged scans that led to this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn unit_of(&self, key: &K) -> Option<&U> {
        self.entries.get(key).map(|entry| &entry.unit)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys currently attributed to `unit`.
    pub fn keys_of<'a>(&'a self, unit: &U) -> impl Iterator<Item = &'a K> + 'a {
        self.by_unit.get(unit).into_iter().flatten()
    }

    pub fn units(&self) -> impl Iterator<Item = &U> {
        self.by_unit.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(key, entry)| (key, &entry.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Drops every entry attributed to `unit`.
    pub(crate) fn purge_unit(&mut self, unit: &U) -> usize {
        let Some(keys) = self.by_unit.remove(unit) else {
            return 0;
        };
        let mut purged = 0;
        for key in keys {
            if self
                .entries
                .get(&key)
                .is_some_and(|entry| &entry.unit == unit)
            {
                self.entries.remove(&key);
                purged += 1;
            }
        }
        purged
    }

    /// Inserts `key`, taking it over from whichever unit held it before.
    pub(crate) fn insert(&mut self, unit: U, key: K, value: V) {
        let previous = self.entries.insert(
            key.clone(),
            Entry {
                unit: unit.clone(),
                value,
            },
        );
        if let Some(previous) = previous {
            if previous.unit != unit {
                if let Some(keys) = self.by_unit.get_mut(&previous.unit) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        self.by_unit.remove(&previous.unit);
                    }
                }
            }
        }
        self.by_unit.entry(unit).or_default().insert(key);
    }
}

impl<U, K, V> fmt::Debug for IndexSnapshot<U, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSnapshot")
            .field("generation", &self.generation)
            .field("entries", &self.entries.len())
            .field("units", &self.by_unit.len())
            .finish()
    }
}
