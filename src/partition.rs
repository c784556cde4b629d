use std::ops::Range;

use serde::Deserialize;
use tracing::debug;

use crate::align::{align_up, ceil_div};
use crate::error::{Result, TilingError};

/// How leftover elements are spread over cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Equal aligned chunks; the last used core takes whatever is left.
    #[default]
    TailAbsorb,
    /// Whole blocks dealt round-robin: the first `blocks % used` cores get
    /// one extra block, the last used core trims the sub-block shortfall.
    ///
    /// The remainder is spread over several cores instead of the tail, and
    /// `used_core_count` may exceed `ceil(n / per_core_chunk)`: 9 blocks on
    /// 8 cores use all 8 with a 2-block chunk. Only `Σ counts == n` and
    /// contiguity hold.
    Balanced,
}

/// One core's slice of the flattened tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorePlan {
    pub core: usize,
    pub element_offset: usize,
    pub element_count: usize,
}

impl CorePlan {
    pub fn is_idle(&self) -> bool {
        self.element_count == 0
    }

    pub fn end(&self) -> usize {
        self.element_offset + self.element_count
    }

    pub fn range(&self) -> Range<usize> {
        self.element_offset..self.end()
    }
}

/// Result of splitting `N` elements over the platform's cores.
///
/// `cores` has one entry per platform core; entries at or past
/// `used_core_count` are idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub cores: Vec<CorePlan>,
    pub used_core_count: usize,
    pub per_core_chunk: usize,
}

impl Partition {
    pub fn total_elements(&self) -> usize {
        self.cores.iter().map(|c| c.element_count).sum()
    }

    pub fn used(&self) -> &[CorePlan] {
        &self.cores[..self.used_core_count]
    }
}

/* ============================================================
   Partitioner
   ============================================================ */

#[derive(Debug, Clone, Copy)]
pub struct CorePartitioner {
    block: usize,
    min_core_elems: usize,
    strategy: PartitionStrategy,
}

impl CorePartitioner {
    pub fn new(block: usize) -> Self {
        Self {
            block: block.max(1),
            min_core_elems: 0,
            strategy: PartitionStrategy::TailAbsorb,
        }
    }

    /// Floor on the per-core chunk, so tiny tensors use fewer cores.
    pub fn with_min_core_elems(mut self, min_core_elems: usize) -> Self {
        self.min_core_elems = min_core_elems;
        self
    }

    pub fn with_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn partition(&self, n: usize, core_count: usize) -> Result<Partition> {
        if core_count == 0 {
            return Err(TilingError::ZeroCoreCount);
        }

        let partition = if n == 0 {
            empty_partition(core_count)
        } else {
            match self.strategy {
                PartitionStrategy::TailAbsorb => self.tail_absorb(n, core_count),
                PartitionStrategy::Balanced => self.balanced(n, core_count),
            }
        };

        debug!(
            n,
            core_count,
            used = partition.used_core_count,
            per_core_chunk = partition.per_core_chunk,
            strategy = ?self.strategy,
            "partitioned elements across cores"
        );
        Ok(partition)
    }

    fn tail_absorb(&self, n: usize, core_count: usize) -> Partition {
        let per_core_chunk = align_up(
            align_up(ceil_div(n, core_count), self.block).max(self.min_core_elems),
            self.block,
        );
        let used = ceil_div(n, per_core_chunk);

        let cores = (0..core_count)
            .map(|core| {
                if core + 1 < used {
                    CorePlan {
                        core,
                        element_offset: core * per_core_chunk,
                        element_count: per_core_chunk,
                    }
                } else if core + 1 == used {
                    let offset = core * per_core_chunk;
                    CorePlan {
                        core,
                        element_offset: offset,
                        element_count: n - offset,
                    }
                } else {
                    idle(core, n)
                }
            })
            .collect();

        Partition {
            cores,
            used_core_count: used,
            per_core_chunk,
        }
    }

    fn balanced(&self, n: usize, core_count: usize) -> Partition {
        let blocks = ceil_div(n, self.block);
        let min_blocks = ceil_div(self.min_core_elems, self.block).max(1);
        let used = core_count.min(blocks).min((blocks / min_blocks).max(1));

        let small = blocks / used;
        let big_cores = blocks % used;

        let mut cores = Vec::with_capacity(core_count);
        let mut offset = 0;
        for core in 0..core_count {
            if core >= used {
                cores.push(idle(core, n));
                continue;
            }
            let nominal = (if core < big_cores { small + 1 } else { small }) * self.block;
            let count = if core + 1 == used { n - offset } else { nominal };
            cores.push(CorePlan {
                core,
                element_offset: offset,
                element_count: count,
            });
            offset += count;
        }

        Partition {
            cores,
            used_core_count: used,
            per_core_chunk: (small + usize::from(big_cores > 0)) * self.block,
        }
    }
}

fn idle(core: usize, n: usize) -> CorePlan {
    CorePlan {
        core,
        element_offset: n,
        element_count: 0,
    }
}

/// An empty tensor still dispatches one core, which does nothing.
fn empty_partition(core_count: usize) -> Partition {
    Partition {
        cores: (0..core_count).map(|core| idle(core, 0)).collect(),
        used_core_count: 1,
        per_core_chunk: 0,
    }
}

/// Split `n` elements over `core_count` cores in `block`-aligned chunks,
/// the last used core absorbing the remainder.
pub fn partition(n: usize, core_count: usize, block: usize) -> Result<Vec<CorePlan>> {
    CorePartitioner::new(block)
        .partition(n, core_count)
        .map(|p| p.cores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counts(p: &Partition) -> Vec<usize> {
        p.cores.iter().map(|c| c.element_count).collect()
    }

    #[test]
    fn thousand_over_eight_cores() {
        let p = CorePartitioner::new(8).partition(1000, 8).unwrap();

        assert_eq!(p.per_core_chunk, 128);
        assert_eq!(p.used_core_count, 8);
        assert_eq!(counts(&p), vec![128, 128, 128, 128, 128, 128, 128, 104]);
        assert_eq!(p.cores[7].element_offset, 896);
    }

    #[test]
    fn empty_tensor_uses_one_idle_core() {
        let p = CorePartitioner::new(8).partition(0, 4).unwrap();

        assert_eq!(p.used_core_count, 1);
        assert_eq!(p.cores.len(), 4);
        assert!(p.cores.iter().all(|c| c.is_idle()));
    }

    #[test]
    fn small_tensor_leaves_cores_idle() {
        let p = CorePartitioner::new(8).partition(20, 8).unwrap();

        // ceil(20/8)=3 -> chunk 8, used ceil(20/8)=3
        assert_eq!(p.used_core_count, 3);
        assert_eq!(counts(&p), vec![8, 8, 4, 0, 0, 0, 0, 0]);
        assert!(p.cores[3..].iter().all(|c| c.element_offset == 20));
    }

    #[test]
    fn zero_cores_is_fatal() {
        assert_eq!(partition(10, 0, 8).unwrap_err(), TilingError::ZeroCoreCount);
    }

    #[test]
    fn min_core_elems_reduces_used_cores() {
        let p = CorePartitioner::new(8)
            .with_min_core_elems(256)
            .partition(1000, 8)
            .unwrap();

        assert_eq!(p.per_core_chunk, 256);
        assert_eq!(p.used_core_count, 4);
        assert_eq!(&counts(&p)[..4], &[256, 256, 256, 232]);
    }

    #[test]
    fn balanced_deals_extra_blocks_first() {
        let p = CorePartitioner::new(8)
            .with_strategy(PartitionStrategy::Balanced)
            .partition(1000, 8)
            .unwrap();

        // 125 blocks over 8 cores: 5 cores get 16 blocks, 3 get 15
        assert_eq!(counts(&p), vec![128, 128, 128, 128, 128, 120, 120, 120]);
        assert_eq!(p.per_core_chunk, 128);
    }

    #[test]
    fn balanced_last_core_trims_shortfall() {
        let p = CorePartitioner::new(8)
            .with_strategy(PartitionStrategy::Balanced)
            .partition(30, 8)
            .unwrap();

        assert_eq!(p.used_core_count, 4);
        assert_eq!(&counts(&p)[..4], &[8, 8, 8, 6]);
    }

    #[test]
    fn balanced_uses_more_cores_than_chunk_implies() {
        let p = CorePartitioner::new(8)
            .with_strategy(PartitionStrategy::Balanced)
            .partition(72, 8)
            .unwrap();

        assert_eq!(p.per_core_chunk, 16);
        assert_eq!(p.used_core_count, 8);
        assert_ne!(p.used_core_count, ceil_div(72, p.per_core_chunk));
        assert_eq!(counts(&p), vec![16, 8, 8, 8, 8, 8, 8, 8]);
    }

    fn strategy() -> impl Strategy<Value = PartitionStrategy> {
        prop_oneof![Just(PartitionStrategy::TailAbsorb), Just(PartitionStrategy::Balanced)]
    }

    proptest! {
        #[test]
        fn counts_sum_to_n(n in 0usize..100_000, cores in 1usize..64, block in 1usize..64, s in strategy()) {
            let p = CorePartitioner::new(block).with_strategy(s).partition(n, cores).unwrap();

            prop_assert_eq!(p.total_elements(), n);
            prop_assert_eq!(p.cores.len(), cores);
            prop_assert!(p.used_core_count >= 1 && p.used_core_count <= cores);
            prop_assert!(p.cores[p.used_core_count..].iter().all(|c| c.is_idle()));

            let mut next = 0;
            for c in p.used() {
                prop_assert_eq!(c.element_offset, next);
                next = c.end();
            }
        }

        #[test]
        fn only_last_used_core_differs(n in 1usize..100_000, cores in 1usize..64, block in 1usize..64) {
            let p = CorePartitioner::new(block).partition(n, cores).unwrap();
            let used = p.used();

            prop_assert_eq!(p.used_core_count, cores.min(ceil_div(n, p.per_core_chunk)));
            for c in &used[..used.len() - 1] {
                prop_assert_eq!(c.element_count, p.per_core_chunk);
                prop_assert_eq!(c.element_count % block, 0);
            }
            prop_assert!(used[used.len() - 1].element_count > 0);
        }

        #[test]
        fn partition_is_pure(n in 0usize..10_000, cores in 1usize..32, block in 1usize..32) {
            prop_assert_eq!(partition(n, cores, block).unwrap(), partition(n, cores, block).unwrap());
        }
    }
}
