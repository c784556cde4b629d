use core::fmt;
use core::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::dtype::DType;
use crate::error::{Result, TilingError};
use crate::loops::TilePlan;
use crate::merge::ReduceAxis;
use crate::partition::CorePlan;

/// Selects the kernel variant a plan was built for.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TilingKey {
    /// Zero elements; one core launches and does nothing.
    Empty = 0,
    Elementwise = 100,
    ReduceAll = 200,
    ReduceColumns = 201,
    ReduceRows = 202,
}

impl TilingKey {
    pub fn for_reduction(axis: ReduceAxis) -> Self {
        match axis {
            ReduceAxis::All => TilingKey::ReduceAll,
            ReduceAxis::Columns => TilingKey::ReduceColumns,
            ReduceAxis::Rows => TilingKey::ReduceRows,
        }
    }

    pub fn from_u64(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(TilingKey::Empty),
            100 => Some(TilingKey::Elementwise),
            200 => Some(TilingKey::ReduceAll),
            201 => Some(TilingKey::ReduceColumns),
            202 => Some(TilingKey::ReduceRows),
            _ => None,
        }
    }

    pub fn reduce_axis(self) -> Option<ReduceAxis> {
        match self {
            TilingKey::ReduceAll => Some(ReduceAxis::All),
            TilingKey::ReduceColumns => Some(ReduceAxis::Columns),
            TilingKey::ReduceRows => Some(ReduceAxis::Rows),
            TilingKey::Empty | TilingKey::Elementwise => None,
        }
    }
}

/// Per-core pairing of the element range and its sub-tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreTiling {
    pub core: CorePlan,
    pub tile: TilePlan,
}

impl CoreTiling {
    pub fn is_idle(&self) -> bool {
        self.core.is_idle()
    }
}

/// Shape of the cross-core merge buffer. `slot_stride` is in 64-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeLayout {
    pub slot_count: usize,
    pub slot_stride: usize,
}

/* ============================================================
   TilingPlan
   ============================================================ */

/// Immutable result of tiling one dispatch.
///
/// Built once on the host, then shared read-only by every core for the
/// lifetime of the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingPlan {
    pub key: TilingKey,
    pub dtype: Option<DType>,
    pub elem_size: usize,
    /// Alignment block in elements used for tiles and copy padding.
    pub block_elems: usize,
    pub living_buffers: usize,
    pub core_count: usize,
    pub used_core_count: usize,
    pub total_elements: usize,
    /// Row-major matrix view of the input, used by axis reductions.
    pub rows: usize,
    pub cols: usize,
    /// One entry per platform core.
    pub cores: Vec<CoreTiling>,
    pub merge: Option<MergeLayout>,
}

impl TilingPlan {
    /// Cores to launch.
    pub fn block_dim(&self) -> usize {
        self.used_core_count
    }

    pub fn needs_sync_all(&self) -> bool {
        self.merge.is_some()
    }

    /// Shared-memory bytes needed by the merge buffer.
    pub fn workspace_bytes(&self) -> usize {
        self.merge
            .map(|m| m.slot_count * m.slot_stride * size_of::<u64>())
            .unwrap_or(0)
    }

    pub fn core(&self, core: usize) -> &CoreTiling {
        &self.cores[core]
    }

    pub fn used_cores(&self) -> &[CoreTiling] {
        &self.cores[..self.used_core_count]
    }

    pub fn header(&self) -> PlanHeader {
        let (slot_count, slot_stride) = self
            .merge
            .map(|m| (m.slot_count as u64, m.slot_stride as u64))
            .unwrap_or((0, 0));

        PlanHeader {
            tiling_key: self.key as u64,
            dtype: self.dtype.map(DType::id).unwrap_or(0),
            elem_size: self.elem_size as u64,
            block_elems: self.block_elems as u64,
            living_buffers: self.living_buffers as u64,
            core_count: self.core_count as u64,
            used_core_count: self.used_core_count as u64,
            total_elements: self.total_elements as u64,
            rows: self.rows as u64,
            cols: self.cols as u64,
            slot_count,
            slot_stride,
        }
    }

    /// Header followed by one record per platform core.
    pub fn to_bytes(&self) -> Vec<u8> {
        let records: Vec<CoreRecord> = self.cores.iter().map(CoreRecord::from).collect();

        let mut out = Vec::with_capacity(size_of::<PlanHeader>() + records.len() * size_of::<CoreRecord>());
        out.extend_from_slice(bytemuck::bytes_of(&self.header()));
        out.extend_from_slice(bytemuck::cast_slice(&records));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let h = PlanHeader::read(bytes)?;

        let key = TilingKey::from_u64(h.tiling_key)
            .ok_or_else(|| TilingError::MalformedPlan(format!("unknown tiling key {}", h.tiling_key)))?;
        let dtype = match h.dtype {
            0 => None,
            id => Some(
                DType::from_id(id)
                    .ok_or_else(|| TilingError::MalformedPlan(format!("unknown dtype id {}", id)))?,
            ),
        };

        if h.used_core_count == 0 || h.used_core_count > h.core_count {
            return Err(TilingError::MalformedPlan(format!(
                "{} used cores out of {}",
                h.used_core_count, h.core_count
            )));
        }

        let cores = (0..h.core_count as usize)
            .map(|core| CoreRecord::read(bytes, core).map(|r| r.to_core_tiling(core)))
            .collect::<Result<Vec<_>>>()?;
        check_coverage(&cores, h.total_elements as usize)?;

        Ok(TilingPlan {
            key,
            dtype,
            elem_size: h.elem_size as usize,
            block_elems: h.block_elems as usize,
            living_buffers: h.living_buffers as usize,
            core_count: h.core_count as usize,
            used_core_count: h.used_core_count as usize,
            total_elements: h.total_elements as usize,
            rows: h.rows as usize,
            cols: h.cols as usize,
            cores,
            merge: (h.slot_stride != 0).then_some(MergeLayout {
                slot_count: h.slot_count as usize,
                slot_stride: h.slot_stride as usize,
            }),
        })
    }
}

/// Every record stays inside the tensor and together they cover it once.
fn check_coverage(cores: &[CoreTiling], total: usize) -> Result<()> {
    let mut sum = 0usize;
    for c in cores {
        let end = c.core.element_offset.checked_add(c.core.element_count);
        if end.map_or(true, |end| end > total) {
            return Err(TilingError::MalformedPlan(format!(
                "core {} range {}+{} runs past {} elements",
                c.core.core, c.core.element_offset, c.core.element_count, total
            )));
        }
        sum += c.core.element_count;
    }
    if sum != total {
        return Err(TilingError::MalformedPlan(format!(
            "core records cover {} elements, header says {}",
            sum, total
        )));
    }
    Ok(())
}

impl fmt::Display for TilingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tilingKey={} dtype={} elemSize={} block={} living={} blockDim={}/{} n={} matrix={}x{}",
            self.key as u64,
            self.dtype.map(|d| d.to_string()).unwrap_or_else(|| "raw".to_string()),
            self.elem_size,
            self.block_elems,
            self.living_buffers,
            self.used_core_count,
            self.core_count,
            self.total_elements,
            self.rows,
            self.cols,
        )?;
        if let Some(m) = self.merge {
            write!(
                f,
                " mergeSlots={} slotStride={} workspace={}",
                m.slot_count,
                m.slot_stride,
                self.workspace_bytes()
            )?;
        }
        for c in self.used_cores() {
            write!(
                f,
                "\n  core {:>3}: offset={} count={} tile={} loops={} tail={}",
                c.core.core,
                c.core.element_offset,
                c.core.element_count,
                c.tile.tile_elems,
                c.tile.full_tile_loops,
                c.tile.tail_elems,
            )?;
        }
        Ok(())
    }
}

/* ============================================================
   Flat records
   ============================================================ */

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PlanHeader {
    pub tiling_key: u64,
    /// `DType::id`, 0 when untyped.
    pub dtype: u64,
    pub elem_size: u64,
    pub block_elems: u64,
    pub living_buffers: u64,
    pub core_count: u64,
    pub used_core_count: u64,
    pub total_elements: u64,
    pub rows: u64,
    pub cols: u64,
    pub slot_count: u64,
    pub slot_stride: u64,
}

impl PlanHeader {
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let len = size_of::<PlanHeader>();
        if bytes.len() < len {
            return Err(TilingError::MalformedPlan(format!(
                "header needs {} bytes, got {}",
                len,
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..len]))
    }
}

/// What one core reads from the flat plan.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CoreRecord {
    pub element_offset: u64,
    pub element_count: u64,
    pub tile_elems: u64,
    pub full_tile_loops: u64,
    pub tail_elems: u64,
}

impl CoreRecord {
    /// Pull the record for `core` without decoding the others.
    pub fn read(bytes: &[u8], core: usize) -> Result<Self> {
        let header = PlanHeader::read(bytes)?;
        if core as u64 >= header.core_count {
            return Err(TilingError::MalformedPlan(format!(
                "core {} out of range for {} cores",
                core, header.core_count
            )));
        }

        let start = size_of::<PlanHeader>() + core * size_of::<CoreRecord>();
        let end = start + size_of::<CoreRecord>();
        if bytes.len() < end {
            return Err(TilingError::MalformedPlan(format!(
                "record for core {} ends at byte {}, buffer has {}",
                core,
                end,
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[start..end]))
    }

    pub fn to_core_tiling(&self, core: usize) -> CoreTiling {
        CoreTiling {
            core: CorePlan {
                core,
                element_offset: self.element_offset as usize,
                element_count: self.element_count as usize,
            },
            tile: TilePlan {
                tile_elems: self.tile_elems as usize,
                full_tile_loops: self.full_tile_loops as usize,
                tail_elems: self.tail_elems as usize,
            },
        }
    }
}

impl From<&CoreTiling> for CoreRecord {
    fn from(c: &CoreTiling) -> Self {
        CoreRecord {
            element_offset: c.core.element_offset as u64,
            element_count: c.core.element_count as u64,
            tile_elems: c.tile.tile_elems as u64,
            full_tile_loops: c.tile.full_tile_loops as u64,
            tail_elems: c.tile.tail_elems as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_core_plan() -> TilingPlan {
        let cores = vec![
            CoreTiling {
                core: CorePlan { core: 0, element_offset: 0, element_count: 16 },
                tile: TilePlan::new(16, 8),
            },
            CoreTiling {
                core: CorePlan { core: 1, element_offset: 16, element_count: 4 },
                tile: TilePlan::new(4, 8),
            },
            CoreTiling {
                core: CorePlan { core: 2, element_offset: 20, element_count: 0 },
                tile: TilePlan::new(0, 8),
            },
        ];
        TilingPlan {
            key: TilingKey::ReduceAll,
            dtype: Some(DType::F32),
            elem_size: 4,
            block_elems: 8,
            living_buffers: 2,
            core_count: 3,
            used_core_count: 2,
            total_elements: 20,
            rows: 1,
            cols: 20,
            cores,
            merge: Some(MergeLayout { slot_count: 1, slot_stride: 8 }),
        }
    }

    #[test]
    fn flat_layout_is_fixed() {
        assert_eq!(size_of::<PlanHeader>(), 12 * 8);
        assert_eq!(size_of::<CoreRecord>(), 5 * 8);

        let plan = two_core_plan();
        assert_eq!(plan.to_bytes().len(), 96 + 3 * 40);
    }

    #[test]
    fn core_reads_only_its_record() {
        let bytes = two_core_plan().to_bytes();
        let r = CoreRecord::read(&bytes, 1).unwrap();

        assert_eq!(r.element_offset, 16);
        assert_eq!(r.element_count, 4);
        assert_eq!((r.tile_elems, r.full_tile_loops, r.tail_elems), (8, 0, 4));
    }

    #[test]
    fn decoded_plan_matches() {
        let plan = two_core_plan();
        assert_eq!(TilingPlan::from_bytes(&plan.to_bytes()).unwrap(), plan);
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let bytes = two_core_plan().to_bytes();

        assert!(matches!(PlanHeader::read(&bytes[..10]), Err(TilingError::MalformedPlan(_))));
        assert!(matches!(
            CoreRecord::read(&bytes[..bytes.len() - 1], 2),
            Err(TilingError::MalformedPlan(_))
        ));
        assert!(matches!(CoreRecord::read(&bytes, 3), Err(TilingError::MalformedPlan(_))));
    }

    #[test]
    fn unknown_key_is_malformed() {
        let mut bytes = two_core_plan().to_bytes();
        bytes[..8].copy_from_slice(&7u64.to_ne_bytes());
        assert!(matches!(TilingPlan::from_bytes(&bytes), Err(TilingError::MalformedPlan(_))));
    }

    #[test]
    fn inconsistent_header_is_malformed() {
        let bytes = two_core_plan().to_bytes();
        // used_core_count is the seventh header word
        for used in [0u64, 5] {
            let mut b = bytes.clone();
            b[48..56].copy_from_slice(&used.to_ne_bytes());
            assert!(matches!(TilingPlan::from_bytes(&b), Err(TilingError::MalformedPlan(_))));
        }
    }

    #[test]
    fn records_must_cover_tensor() {
        let bytes = two_core_plan().to_bytes();
        let count_of = |core: usize| 96 + core * 40 + 8;

        // core 1 claims 5 elements, records sum to 21
        let mut b = bytes.clone();
        b[count_of(1)..count_of(1) + 8].copy_from_slice(&5u64.to_ne_bytes());
        assert!(matches!(TilingPlan::from_bytes(&b), Err(TilingError::MalformedPlan(_))));

        // core 1 moved past the end, sum still 20
        let mut b = bytes.clone();
        b[count_of(1) - 8..count_of(1)].copy_from_slice(&18u64.to_ne_bytes());
        assert!(matches!(TilingPlan::from_bytes(&b), Err(TilingError::MalformedPlan(_))));
    }

    #[test]
    fn metadata_follows_merge_layout() {
        let plan = two_core_plan();
        assert_eq!(plan.block_dim(), 2);
        assert!(plan.needs_sync_all());
        assert_eq!(plan.workspace_bytes(), 64);

        let dump = plan.to_string();
        assert!(dump.starts_with("tilingKey=200 dtype=f32"));
        assert_eq!(dump.lines().count(), 3);
    }

    #[test]
    fn keys_map_to_axes() {
        for axis in [ReduceAxis::All, ReduceAxis::Columns, ReduceAxis::Rows] {
            let key = TilingKey::for_reduction(axis);
            assert_eq!(key.reduce_axis(), Some(axis));
            assert_eq!(TilingKey::from_u64(key as u64), Some(key));
        }
        assert_eq!(TilingKey::Elementwise.reduce_axis(), None);
    }
}
