//! Partition placement and work dispatch

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "parallel")]
use std::sync::Arc;

use crate::error::{Result, SpError};

/// Where a new scenario goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Fewest scenarios first, ties to the lowest partition index
    #[default]
    LeastLoaded,
    Worker(usize),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Local,
    ThreadPool,
}

/// Dispatches per-partition work
///
/// `Local` runs partitions one after another in the caller. `ThreadPool`
/// runs them on a dedicated rayon pool, one task per partition.
#[derive(Debug, Clone, Default)]
pub enum Transport {
    #[default]
    Local,
    #[cfg(feature = "parallel")]
    ThreadPool(Arc<rayon::ThreadPool>),
}

impl Transport {
    /// Build a rayon pool; `threads == 0` lets rayon pick
    #[cfg(feature = "parallel")]
    pub fn thread_pool(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sp-worker-{}", i))
            .build()
            .map_err(|e| SpError::Config(format!("thread pool: {}", e)))?;
        Ok(Transport::ThreadPool(Arc::new(pool)))
    }

    pub fn from_kind(kind: TransportKind, threads: usize) -> Result<Self> {
        match kind {
            TransportKind::Local => Ok(Transport::Local),
            #[cfg(feature = "parallel")]
            TransportKind::ThreadPool => Self::thread_pool(threads),
            #[cfg(not(feature = "parallel"))]
            TransportKind::ThreadPool => {
                let _ = threads;
                Err(SpError::Config(
                    "thread pool transport requires the `parallel` feature".to_string(),
                ))
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Local => TransportKind::Local,
            #[cfg(feature = "parallel")]
            Transport::ThreadPool(_) => TransportKind::ThreadPool,
        }
    }

    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Send + Sync,
    {
        match self {
            Transport::Local => items.iter().map(f).collect(),
            #[cfg(feature = "parallel")]
            Transport::ThreadPool(pool) => pool.install(|| items.par_iter().map(f).collect()),
        }
    }

    pub fn map_mut<T, R, F>(&self, items: &mut [T], f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(&mut T) -> R + Send + Sync,
    {
        match self {
            Transport::Local => items.iter_mut().map(f).collect(),
            #[cfg(feature = "parallel")]
            Transport::ThreadPool(pool) => pool.install(|| items.par_iter_mut().map(f).collect()),
        }
    }
}

pub(crate) fn least_loaded(sizes: &[usize]) -> usize {
    sizes
        .iter()
        .enumerate()
        .min_by_key(|(i, size)| (**size, *i))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// How many of `n` new scenarios each partition receives so that sizes end
/// up as level as possible. Equivalent to `n` least-loaded placements.
pub(crate) fn fill_plan(sizes: &[usize], n: usize) -> Vec<usize> {
    let mut heap: BinaryHeap<Reverse<(usize, usize)>> = sizes
        .iter()
        .copied()
        .enumerate()
        .map(|(i, size)| Reverse((size, i)))
        .collect();
    let mut counts = vec![0; sizes.len()];
    for _ in 0..n {
        if let Some(Reverse((size, i))) = heap.pop() {
            counts[i] += 1;
            heap.push(Reverse((size + 1, i)));
        }
    }
    counts
}

/// Contiguous chunk sizes for `total` items over `parts` partitions
pub(crate) fn even_split(total: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    let base = total / parts;
    let extra = total % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_least_loaded_breaks_ties_by_index() {
        assert_eq!(least_loaded(&[2, 1, 1]), 1);
        assert_eq!(least_loaded(&[0, 0]), 0);
    }

    #[rstest]
    #[case(vec![0, 0, 0], 7, vec![3, 2, 2])]
    #[case(vec![5, 0, 1], 4, vec![0, 3, 1])]
    #[case(vec![2, 2], 0, vec![0, 0])]
    fn test_fill_plan(#[case] sizes: Vec<usize>, #[case] n: usize, #[case] expected: Vec<usize>) {
        assert_eq!(fill_plan(&sizes, n), expected);
    }

    #[rstest]
    #[case(10, 3, vec![4, 3, 3])]
    #[case(2, 4, vec![1, 1, 0, 0])]
    #[case(0, 2, vec![0, 0])]
    fn test_even_split(#[case] total: usize, #[case] parts: usize, #[case] expected: Vec<usize>) {
        assert_eq!(even_split(total, parts), expected);
    }

    #[test]
    fn test_local_transport_preserves_order() {
        let items = vec![1, 2, 3];
        assert_eq!(Transport::Local.map(&items, |x| x * 10), vec![10, 20, 30]);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_thread_pool_transport_preserves_order() {
        let transport = Transport::thread_pool(2).unwrap();
        let mut items: Vec<usize> = (0..16).collect();
        let out = transport.map_mut(&mut items, |x| {
            *x += 1;
            *x
        });
        assert_eq!(out, (1..17).collect::<Vec<_>>());
        assert_eq!(transport.kind(), TransportKind::ThreadPool);
    }
}
