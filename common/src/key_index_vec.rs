use std::hash::Hash;
use std::ops::{Index, IndexMut};

use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};

use crate::is_debug;

pub trait KeyIndexKey<K> {
    fn key(&self) -> &K;
}

/// Insertion-ordered vector with O(1) lookup by key.
///
/// Position in `items` is meaningful to callers (e.g. creation order), so removal shifts later
/// items down instead of swapping.
#[derive(Debug, Clone)]
pub struct KeyIndexVec<K: Copy + Eq + Hash, V: KeyIndexKey<K>> {
    items: Vec<V>,
    idx_by_key: hashbrown::HashMap<K, usize>,
}

impl<K, V> Default for KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K>,
{
    fn default() -> Self {
        Self {
            items: Vec::new(),
            idx_by_key: hashbrown::HashMap::new(),
        }
    }
}

impl<K, V> KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K>,
{
    /// Appends `v`; returns `false` and leaves the vector untouched if the key is taken.
    pub fn push(&mut self, v: V) -> bool {
        let key = *v.key();
        if self.idx_by_key.contains_key(&key) {
            return false;
        }

        self.idx_by_key.insert(key, self.items.len());
        self.items.push(v);
        true
    }

    pub fn remove_by_key(&mut self, key: &K) -> Option<V> {
        let idx = self.idx_by_key.remove(key)?;
        let removed = self.items.remove(idx);

        for (pos, item) in self.items.iter().enumerate().skip(idx) {
            self.idx_by_key.insert(*item.key(), pos);
        }
        self.check();

        Some(removed)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, V> {
        self.items.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.items.iter().map(|item| *item.key())
    }

    pub fn as_slice(&self) -> &[V] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.idx_by_key.contains_key(key)
    }

    pub fn index_of_key(&self, key: &K) -> Option<usize> {
        self.idx_by_key.get(key).copied()
    }

    pub fn by_key(&self, key: &K) -> Option<&V> {
        self.index_of_key(key).map(|idx| &self.items[idx])
    }

    pub fn by_key_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.index_of_key(key)?;
        Some(&mut self.items[idx])
    }

    fn check(&self) {
        if !is_debug() {
            return;
        }

        assert_eq!(self.items.len(), self.idx_by_key.len());
        for (idx, item) in self.items.iter().enumerate() {
            assert_eq!(self.idx_by_key.get(item.key()), Some(&idx));
        }
    }
}

impl<K, V> Index<usize> for KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K>,
{
    type Output = V;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.items[idx]
    }
}

impl<K, V> IndexMut<usize> for KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K>,
{
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.items[idx]
    }
}

impl<'a, K, V> IntoIterator for &'a KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K>,
{
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<K, V> PartialEq for KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K> + PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<K, V> Serialize for KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K> + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.items.serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for KeyIndexVec<K, V>
where
    K: Copy + Eq + Hash,
    V: KeyIndexKey<K> + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let items: Vec<V> = Vec::deserialize(deserializer)?;
        let mut result = Self::default();
        for item in items {
            if !result.push(item) {
                return Err(SerdeError::custom("Duplicate key in KeyIndexVec"));
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deserialize, serialize, FileFormat};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct TestItem {
        id: u32,
        value: i32,
    }

    impl KeyIndexKey<u32> for TestItem {
        fn key(&self) -> &u32 {
            &self.id
        }
    }

    fn sample() -> KeyIndexVec<u32, TestItem> {
        let mut vec = KeyIndexVec::default();
        assert!(vec.push(TestItem { id: 10, value: 100 }));
        assert!(vec.push(TestItem { id: 20, value: 200 }));
        assert!(vec.push(TestItem { id: 30, value: 300 }));
        vec
    }

    #[test]
    fn push_rejects_duplicate_keys() {
        let mut vec = sample();

        assert!(!vec.push(TestItem { id: 20, value: 0 }));
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.by_key(&20).unwrap().value, 200);
    }

    #[test]
    fn remove_keeps_order_and_indices() {
        let mut vec = sample();

        let removed = vec.remove_by_key(&10).unwrap();
        assert_eq!(removed.value, 100);
        assert_eq!(vec.keys().collect::<Vec<_>>(), vec![20, 30]);
        assert_eq!(vec.index_of_key(&30), Some(1));
        assert!(vec.remove_by_key(&10).is_none());
    }

    #[test]
    fn roundtrip_formats() -> anyhow::Result<()> {
        let vec = sample();

        for format in FileFormat::all() {
            let text = serialize(&vec, format)?;
            let back: KeyIndexVec<u32, TestItem> = deserialize(&text, format)?;
            assert_eq!(back, vec);
            assert_eq!(back.index_of_key(&30), Some(2));
        }

        Ok(())
    }

    #[test]
    fn deserialize_rejects_duplicates() {
        let json = r#"[{"id": 1, "value": 1}, {"id": 1, "value": 2}]"#;
        let result: anyhow::Result<KeyIndexVec<u32, TestItem>> =
            deserialize(json, FileFormat::Json);

        assert!(result.is_err());
    }
}
