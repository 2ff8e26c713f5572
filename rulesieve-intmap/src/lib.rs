/*!
Open-addressed `i64 → i64` hash map.

Built for hot paths that key by small dense integers (byte-indexed
transition tables, packed step keys), where a general-purpose `HashMap`
pays for hashing and per-entry indirection it doesn't need.

- Keys and values are non-negative; [`NO_VALUE`] (`-1`) is the absent
  sentinel returned by [`IntIntMap::get`] and [`IntIntMap::remove`].
- Capacity is always a power of two; the table rehashes above a 0.75
  load factor (tombstones included).

## Example
```
use rulesieve_intmap::{IntIntMap, NO_VALUE};

let mut map = IntIntMap::new();
map.put(0x41, 7);
assert_eq!(map.get(0x41), 7);
assert_eq!(map.get(0x42), NO_VALUE);
assert_eq!(map.remove(0x41), 7);
assert!(map.is_empty());
```
*/

/// Returned by [`IntIntMap::get`] and [`IntIntMap::remove`] when the key is
/// not present. Never a legal value.
pub const NO_VALUE: i64 = -1;

const EMPTY: i64 = -1;
const DELETED: i64 = -2;
const MIN_CAPACITY: usize = 8;

#[derive(Clone)]
pub struct IntIntMap {
    keys: Box<[i64]>,
    vals: Box<[i64]>,
    /// Live entries.
    len: usize,
    /// Live entries plus tombstones; drives the load factor.
    used: usize,
}

impl IntIntMap {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Capacity is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            keys: vec![EMPTY; capacity].into_boxed_slice(),
            vals: vec![0; capacity].into_boxed_slice(),
            len: 0,
            used: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn mask(&self) -> usize {
        self.keys.len() - 1
    }

    #[inline]
    fn bucket(&self, key: i64) -> usize {
        // Fibonacci spread; keys are often tiny and sequential.
        (key as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) as usize & self.mask()
    }

    /// Inserts or replaces. Returns the previous value, or [`NO_VALUE`].
    ///
    /// Panics if `key` or `value` is negative.
    pub fn put(&mut self, key: i64, value: i64) -> i64 {
        assert!(key >= 0, "negative key");
        assert!(value >= 0, "negative value");

        if (self.used + 1) * 4 > self.keys.len() * 3 {
            self.rehash(if self.len * 2 >= self.keys.len() {
                self.keys.len() * 2
            } else {
                // Mostly tombstones; same capacity is enough.
                self.keys.len()
            });
        }

        let mask = self.mask();
        let mut i = self.bucket(key);
        let mut first_deleted = usize::MAX;
        loop {
            match self.keys[i] {
                k if k == key => {
                    let old = self.vals[i];
                    self.vals[i] = value;
                    return old;
                }
                EMPTY => {
                    let slot = if first_deleted != usize::MAX {
                        first_deleted
                    } else {
                        self.used += 1;
                        i
                    };
                    self.keys[slot] = key;
                    self.vals[slot] = value;
                    self.len += 1;
                    return NO_VALUE;
                }
                DELETED => {
                    if first_deleted == usize::MAX {
                        first_deleted = i;
                    }
                }
                _ => {}
            }
            i = (i + 1) & mask;
        }
    }

    /// Returns the value for `key`, or [`NO_VALUE`].
    pub fn get(&self, key: i64) -> i64 {
        debug_assert!(key >= 0);
        let mask = self.mask();
        let mut i = self.bucket(key);
        loop {
            match self.keys[i] {
                k if k == key => return self.vals[i],
                EMPTY => return NO_VALUE,
                _ => i = (i + 1) & mask,
            }
        }
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.get(key) != NO_VALUE
    }

    /// Removes `key`. Returns the removed value, or [`NO_VALUE`].
    pub fn remove(&mut self, key: i64) -> i64 {
        debug_assert!(key >= 0);
        let mask = self.mask();
        let mut i = self.bucket(key);
        loop {
            match self.keys[i] {
                k if k == key => {
                    let old = self.vals[i];
                    self.keys[i] = DELETED;
                    self.len -= 1;
                    return old;
                }
                EMPTY => return NO_VALUE,
                _ => i = (i + 1) & mask,
            }
        }
    }

    pub fn clear(&mut self) {
        self.keys.fill(EMPTY);
        self.len = 0;
        self.used = 0;
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { map: self, i: 0 }
    }

    fn rehash(&mut self, capacity: usize) {
        let old_keys = std::mem::replace(
            &mut self.keys,
            vec![EMPTY; capacity].into_boxed_slice(),
        );
        let old_vals = std::mem::replace(&mut self.vals, vec![0; capacity].into_boxed_slice());
        self.len = 0;
        self.used = 0;
        for (&k, &v) in old_keys.iter().zip(old_vals.iter()) {
            if k >= 0 {
                self.put(k, v);
            }
        }
    }
}

impl Default for IntIntMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IntIntMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub struct Iter<'a> {
    map: &'a IntIntMap,
    i: usize,
}

impl Iterator for Iter<'_> {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        while self.i < self.map.keys.len() {
            let i = self.i;
            self.i += 1;
            if self.map.keys[i] >= 0 {
                return Some((self.map.keys[i], self.map.vals[i]));
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a IntIntMap {
    type Item = (i64, i64);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn put_get_remove() {
        let mut map = IntIntMap::new();
        assert_eq!(map.get(3), NO_VALUE);
        assert_eq!(map.put(3, 30), NO_VALUE);
        assert_eq!(map.put(3, 31), 30);
        assert_eq!(map.get(3), 31);
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(3), 31);
        assert_eq!(map.remove(3), NO_VALUE);
        assert!(map.is_empty());
    }

    #[test]
    fn zero_key_and_value() {
        let mut map = IntIntMap::new();
        map.put(0, 0);
        assert_eq!(map.get(0), 0);
        assert!(map.contains_key(0));
        assert_eq!(map.remove(0), 0);
        assert!(map.contains_key(0) == false);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut map = IntIntMap::new();
        for k in 0..10_000 {
            map.put(k, k * 2);
        }
        assert_eq!(map.len(), 10_000);
        for k in 0..10_000 {
            assert_eq!(map.get(k), k * 2);
        }
    }

    #[test]
    fn tombstones_do_not_break_probing() {
        let mut map = IntIntMap::new();
        // Force collisions and interleaved deletes within one probe chain.
        for k in 0..64 {
            map.put(k, k);
        }
        for k in (0..64).step_by(2) {
            assert_eq!(map.remove(k), k);
        }
        for k in 0..64 {
            let expected = if k % 2 == 0 { NO_VALUE } else { k };
            assert_eq!(map.get(k), expected);
        }
        // Reinsertion reuses tombstone slots.
        for k in (0..64).step_by(2) {
            map.put(k, k + 100);
        }
        for k in (0..64).step_by(2) {
            assert_eq!(map.get(k), k + 100);
        }
    }

    #[test]
    fn iterates_live_entries_once() {
        let mut map = IntIntMap::new();
        for k in 0..100 {
            map.put(k, k + 1);
        }
        map.remove(50);
        let mut seen: Vec<(i64, i64)> = map.iter().collect();
        seen.sort();
        assert_eq!(seen.len(), 99);
        assert!(seen.iter().all(|&(k, v)| v == k + 1 && k != 50));
        // Fused on exhaustion.
        let mut it = map.iter();
        for _ in 0..99 {
            assert!(it.next().is_some());
        }
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn clone_is_independent() {
        let mut map = IntIntMap::new();
        map.put(1, 10);
        let mut copy = map.clone();
        copy.put(1, 20);
        copy.put(2, 30);
        assert_eq!(map.get(1), 10);
        assert_eq!(map.get(2), NO_VALUE);
        assert_eq!(copy.get(1), 20);
    }

    #[test]
    #[should_panic(expected = "negative key")]
    fn rejects_negative_keys() {
        IntIntMap::new().put(-5, 1);
    }

    proptest! {
        #[test]
        fn behaves_like_hashmap(ops in prop::collection::vec((0i64..512, 0i64..1024, any::<bool>()), 0..400)) {
            let mut map = IntIntMap::new();
            let mut model: HashMap<i64, i64> = HashMap::new();
            for (k, v, insert) in ops {
                if insert {
                    prop_assert_eq!(map.put(k, v), model.insert(k, v).unwrap_or(NO_VALUE));
                } else {
                    prop_assert_eq!(map.remove(k), model.remove(&k).unwrap_or(NO_VALUE));
                }
                prop_assert_eq!(map.len(), model.len());
            }
            for (&k, &v) in &model {
                prop_assert_eq!(map.get(k), v);
            }
        }
    }
}
