use serde::Deserialize;
use tracing::warn;

use crate::align::align_down;
use crate::error::{Result, TilingError};

/// What to do when scratch cannot hold one aligned block per living buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchPolicy {
    /// Refuse to tile.
    #[default]
    Strict,
    /// Plan a one-block tile anyway and oversubscribe scratch.
    Permissive,
}

/// Elements a single buffer slot can hold when `living_buffers` slots
/// share `scratch_bytes`.
#[inline]
pub fn raw_capacity(scratch_bytes: usize, living_buffers: usize, elem_size: usize) -> usize {
    scratch_bytes / living_buffers.max(1) / elem_size.max(1)
}

/// Sub-tile size for a core owning `core_elems` elements.
///
/// Aligned down to `block`, never larger than the core's share, never
/// smaller than one block. The last clamp wins, so a capacity below one
/// block still yields `block` and oversubscribes scratch.
pub fn plan_tile(
    core_elems: usize,
    scratch_bytes: usize,
    elem_size: usize,
    living_buffers: usize,
    block: usize,
) -> usize {
    let block = block.max(1);
    let tile = align_down(raw_capacity(scratch_bytes, living_buffers, elem_size), block);
    tile.min(core_elems).max(block)
}

/* ============================================================
   Validated planner
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchTilePlanner {
    scratch_bytes: usize,
    elem_size: usize,
    living_buffers: usize,
    block: usize,
    policy: ScratchPolicy,
}

impl ScratchTilePlanner {
    pub fn new(
        scratch_bytes: usize,
        elem_size: usize,
        living_buffers: usize,
        block: usize,
        policy: ScratchPolicy,
    ) -> Result<Self> {
        if elem_size == 0 {
            return Err(TilingError::ZeroElementSize);
        }
        if living_buffers == 0 {
            return Err(TilingError::ZeroLivingBuffers);
        }

        let planner = Self {
            scratch_bytes,
            elem_size,
            living_buffers,
            block: block.max(1),
            policy,
        };

        if !planner.fits() {
            match policy {
                ScratchPolicy::Strict => {
                    return Err(TilingError::InsufficientScratch {
                        available: scratch_bytes,
                        required: planner.required_bytes(),
                    });
                }
                ScratchPolicy::Permissive => warn!(
                    scratch_bytes,
                    required = planner.required_bytes(),
                    living_buffers,
                    "scratch holds less than one block per buffer; tile will oversubscribe"
                ),
            }
        }

        Ok(planner)
    }

    pub fn raw_capacity(&self) -> usize {
        raw_capacity(self.scratch_bytes, self.living_buffers, self.elem_size)
    }

    /// Bytes needed for one aligned block in every living buffer.
    pub fn required_bytes(&self) -> usize {
        self.living_buffers * self.block * self.elem_size
    }

    pub fn fits(&self) -> bool {
        self.raw_capacity() >= self.block
    }

    pub fn policy(&self) -> ScratchPolicy {
        self.policy
    }

    pub fn tile_elems(&self, core_elems: usize) -> usize {
        plan_tile(core_elems, self.scratch_bytes, self.elem_size, self.living_buffers, self.block)
    }
}
