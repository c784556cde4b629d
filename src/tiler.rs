use serde::Deserialize;
use tracing::{debug, info};

use crate::align::align_up;
use crate::error::{Result, TilingError};
use crate::loops::TilePlan;
use crate::merge::{ReduceAxis, SLOT_STRIDE};
use crate::partition::{CorePartitioner, PartitionStrategy};
use crate::pipeline::BUFFER_NUM;
use crate::plan::{CoreTiling, MergeLayout, TilingKey, TilingPlan};
use crate::platform::{PlatformInfo, PlatformProvider};
use crate::scratch::{ScratchPolicy, ScratchTilePlanner};
use crate::tensor::TensorDescriptor;

/// Per-operator tiling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Scratch slots resident at once: double buffering times the number
    /// of input, output and temporary streams.
    pub living_buffers: usize,
    /// Scratch bytes held back for caches and shared temporaries.
    pub reserved_scratch_bytes: usize,
    /// Per-core chunk alignment in elements; defaults to the copy block.
    pub core_align_elems: Option<usize>,
    pub min_core_elems: usize,
    pub strategy: PartitionStrategy,
    pub scratch_policy: ScratchPolicy,
    /// Set for cross-core reductions.
    pub reduce_axis: Option<ReduceAxis>,
}

impl Default for OperatorConfig {
    /// One double-buffered input and one double-buffered output.
    fn default() -> Self {
        Self {
            living_buffers: 2 * BUFFER_NUM,
            reserved_scratch_bytes: 0,
            core_align_elems: None,
            min_core_elems: 0,
            strategy: PartitionStrategy::TailAbsorb,
            scratch_policy: ScratchPolicy::Strict,
            reduce_axis: None,
        }
    }
}

impl OperatorConfig {
    pub fn with_living_buffers(mut self, living_buffers: usize) -> Self {
        self.living_buffers = living_buffers;
        self
    }

    pub fn with_reserved_scratch_bytes(mut self, bytes: usize) -> Self {
        self.reserved_scratch_bytes = bytes;
        self
    }

    pub fn with_core_align_elems(mut self, elems: usize) -> Self {
        self.core_align_elems = Some(elems);
        self
    }

    pub fn with_min_core_elems(mut self, elems: usize) -> Self {
        self.min_core_elems = elems;
        self
    }

    pub fn with_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_scratch_policy(mut self, policy: ScratchPolicy) -> Self {
        self.scratch_policy = policy;
        self
    }

    pub fn with_reduce_axis(mut self, axis: ReduceAxis) -> Self {
        self.reduce_axis = Some(axis);
        self
    }
}

/* ============================================================
   Planning
   ============================================================ */

/// Query `provider` once and tile against the answer.
pub fn plan_with<P: PlatformProvider + ?Sized>(
    desc: &TensorDescriptor,
    provider: &P,
    config: &OperatorConfig,
) -> Result<TilingPlan> {
    let platform = provider.platform_info()?;
    plan(desc, &platform, config)
}

/// Build the tiling plan for one dispatch.
///
/// Every precondition is checked here; the executor trusts the result.
pub fn plan(desc: &TensorDescriptor, platform: &PlatformInfo, config: &OperatorConfig) -> Result<TilingPlan> {
    platform.validate()?;

    let elem_size = desc.elem_size();
    if elem_size == 0 {
        return Err(TilingError::ZeroElementSize);
    }
    if config.living_buffers == 0 {
        return Err(TilingError::ZeroLivingBuffers);
    }

    let n = desc.element_count();
    let (rows, cols) = desc.shape().as_matrix();
    let block = platform.block_elems(elem_size);

    let merge = config.reduce_axis.map(|axis| MergeLayout {
        slot_count: axis.slot_count(rows, cols),
        slot_stride: SLOT_STRIDE,
    });

    // the local accumulator of a reduction lives in scratch too
    let accumulator = merge
        .map(|m| align_up(m.slot_count * elem_size, platform.block_bytes))
        .unwrap_or(0);
    let reserved = config.reserved_scratch_bytes + accumulator;
    if reserved >= platform.scratch_bytes {
        return Err(TilingError::ReservedExceedsScratch {
            reserved,
            scratch: platform.scratch_bytes,
        });
    }
    let usable = platform.scratch_bytes - reserved;

    let planner = ScratchTilePlanner::new(usable, elem_size, config.living_buffers, block, config.scratch_policy)?;
    debug!(
        usable,
        reserved,
        raw_capacity = planner.raw_capacity(),
        block,
        "scratch budget"
    );

    let core_block = config
        .core_align_elems
        .map(|a| align_up(a.max(1), block))
        .unwrap_or(block);
    let partition = CorePartitioner::new(core_block)
        .with_min_core_elems(config.min_core_elems)
        .with_strategy(config.strategy)
        .partition(n, platform.core_count)?;

    let cores = partition
        .cores
        .iter()
        .map(|&core| CoreTiling {
            core,
            tile: TilePlan::new(core.element_count, planner.tile_elems(core.element_count)),
        })
        .collect();

    let key = match config.reduce_axis {
        _ if n == 0 => TilingKey::Empty,
        None => TilingKey::Elementwise,
        Some(axis) => TilingKey::for_reduction(axis),
    };

    let plan = TilingPlan {
        key,
        dtype: desc.dtype(),
        elem_size,
        block_elems: block,
        living_buffers: config.living_buffers,
        core_count: platform.core_count,
        used_core_count: partition.used_core_count,
        total_elements: n,
        rows,
        cols,
        cores,
        merge,
    };

    info!("{}", plan);
    Ok(plan)
}
