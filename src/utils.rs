use std::{collections::HashMap, hash::Hash};

#[cfg(test)]
pub mod test_helpers;

/// Positions of the first repeated item of a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Duplicate {
    /// Position of the earlier occurrence.
    pub first_index: usize,
    /// Position of the repeat.
    pub last_index: usize,
}

/// Finds the first item equal to an earlier one.
pub fn find_first_duplicate<T: Eq + Hash>(items: &[T]) -> Option<Duplicate> {
    find_first_duplicate_by_key(items, |item| item)
}

/// Finds the first item whose key equals the key of an earlier item.
///
/// "First" is the smallest `last_index`; the scan stops there.
pub fn find_first_duplicate_by_key<'a, T, K: Eq + Hash>(
    items: &'a [T],
    mut key: impl FnMut(&'a T) -> K,
) -> Option<Duplicate> {
    let mut seen = HashMap::with_capacity(items.len());
    for (last_index, item) in items.iter().enumerate() {
        let item_key = key(item);
        if let Some(&first_index) = seen.get(&item_key) {
            return Some(Duplicate {
                first_index,
                last_index,
            });
        }
        seen.insert(item_key, last_index);
    }
    None
}
