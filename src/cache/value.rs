//! Cache Value Module
//!
//! The "describe yourself" capability every cached value provides for metadata.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::mem::size_of;
use std::sync::Arc;

// == Cache Value ==
/// Bound for values stored in a [`Cache`](crate::Cache).
///
/// The defaults are enough for plain structs (`impl CacheValue for User {}`);
/// collections override `size_estimate` and `item_count`.
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Short type tag shown in metadata.
    fn type_tag(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Approximate heap plus inline size in bytes.
    fn size_estimate(&self) -> usize {
        size_of::<Self>()
    }

    /// Number of items, for collection values.
    fn item_count(&self) -> Option<usize> {
        None
    }
}

macro_rules! scalar_cache_value {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheValue for $ty {})*
    };
}

scalar_cache_value!(bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, ());

impl CacheValue for String {
    fn size_estimate(&self) -> usize {
        size_of::<String>() + self.len()
    }
}

impl<T: CacheValue> CacheValue for Option<T> {
    fn size_estimate(&self) -> usize {
        size_of::<Self>() + self.as_ref().map_or(0, |v| v.size_estimate())
    }
}

impl<T: CacheValue> CacheValue for Arc<T> {
    fn type_tag(&self) -> &'static str {
        self.as_ref().type_tag()
    }

    fn size_estimate(&self) -> usize {
        self.as_ref().size_estimate()
    }

    fn item_count(&self) -> Option<usize> {
        self.as_ref().item_count()
    }
}

impl<T: CacheValue> CacheValue for Vec<T> {
    fn size_estimate(&self) -> usize {
        size_of::<Self>() + self.iter().map(CacheValue::size_estimate).sum::<usize>()
    }

    fn item_count(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T: CacheValue> CacheValue for VecDeque<T> {
    fn size_estimate(&self) -> usize {
        size_of::<Self>() + self.iter().map(CacheValue::size_estimate).sum::<usize>()
    }

    fn item_count(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T> CacheValue for HashSet<T>
where
    T: CacheValue + Eq + std::hash::Hash,
{
    fn size_estimate(&self) -> usize {
        size_of::<Self>() + self.iter().map(CacheValue::size_estimate).sum::<usize>()
    }

    fn item_count(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> CacheValue for HashMap<K, V>
where
    K: CacheValue + Eq + std::hash::Hash,
    V: CacheValue,
{
    fn size_estimate(&self) -> usize {
        size_of::<Self>()
            + self
                .iter()
                .map(|(k, v)| k.size_estimate() + v.size_estimate())
                .sum::<usize>()
    }

    fn item_count(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> CacheValue for BTreeMap<K, V>
where
    K: CacheValue + Ord,
    V: CacheValue,
{
    fn size_estimate(&self) -> usize {
        size_of::<Self>()
            + self
                .iter()
                .map(|(k, v)| k.size_estimate() + v.size_estimate())
                .sum::<usize>()
    }

    fn item_count(&self) -> Option<usize> {
        Some(self.len())
    }
}
