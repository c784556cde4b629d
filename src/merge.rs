//! Cross-core reduction: local reduce, barrier, atomic combine into a
//! padded merge buffer, barrier, leader gather.

use core::marker::PhantomData;
use core::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::{debug, trace};

use crate::dtype::Element;
use crate::pipeline::{PipelineExecutor, StageTrace, Tile, TileKernel};
use crate::plan::TilingPlan;
use crate::shape::Shape;
use crate::sync::CoreBarrier;

pub const CACHE_LINE_BYTES: usize = 64;

/// Words per merge slot; one slot per cache line.
pub const SLOT_STRIDE: usize = CACHE_LINE_BYTES / size_of::<u64>();

/// The core that gathers the merged result.
pub const LEADER_CORE: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    Min,
    Max,
    Sum,
}

impl CombineOp {
    pub fn identity<T: Element>(self) -> T {
        match self {
            CombineOp::Min => T::highest(),
            CombineOp::Max => T::lowest(),
            CombineOp::Sum => T::zero(),
        }
    }

    #[inline(always)]
    pub fn combine<T: Element>(self, a: T, b: T) -> T {
        match self {
            CombineOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            CombineOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            CombineOp::Sum => a.accumulate(b),
        }
    }
}

/// Which outputs a reduction produces over the `[rows, cols]` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceAxis {
    /// One scalar.
    All,
    /// One value per column (reduce over rows).
    Columns,
    /// One value per row (reduce over columns).
    Rows,
}

impl ReduceAxis {
    pub fn slot_count(self, rows: usize, cols: usize) -> usize {
        match self {
            ReduceAxis::All => 1,
            ReduceAxis::Columns => cols,
            ReduceAxis::Rows => rows,
        }
    }

    /// Merge slot that flat element `index` folds into.
    #[inline(always)]
    pub fn slot_of(self, index: usize, cols: usize) -> usize {
        match self {
            ReduceAxis::All => 0,
            ReduceAxis::Columns => index % cols,
            ReduceAxis::Rows => index / cols,
        }
    }

    pub fn output_shape(self, rows: usize, cols: usize) -> Shape {
        Shape::vector(self.slot_count(rows, cols))
    }
}

/* ============================================================
   Merge buffer
   ============================================================ */

#[repr(align(64))]
#[derive(Debug)]
struct PaddedSlot(AtomicU64);

const _: () = assert!(size_of::<PaddedSlot>() == SLOT_STRIDE * size_of::<u64>());

/// Shared accumulator, one cache line per output element.
///
/// Every slot starts at the identity of `op`, so combining in any order
/// from any number of cores yields the sequential result.
#[derive(Debug)]
pub struct MergeBuffer<T> {
    slots: Vec<PaddedSlot>,
    op: CombineOp,
    _elem: PhantomData<T>,
}

impl<T: Element> MergeBuffer<T> {
    pub fn new(slot_count: usize, op: CombineOp) -> Self {
        let init = op.identity::<T>().to_slot_bits();
        Self {
            slots: (0..slot_count).map(|_| PaddedSlot(AtomicU64::new(init))).collect(),
            op,
            _elem: PhantomData,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn op(&self) -> CombineOp {
        self.op
    }

    /// Bytes of shared memory backing the buffer.
    pub fn workspace_bytes(&self) -> usize {
        self.slots.len() * size_of::<PaddedSlot>()
    }

    /// Atomically fold `value` into `slot`.
    pub fn combine(&self, slot: usize, value: T) {
        let cell = &self.slots[slot].0;
        let mut current = cell.load(Ordering::Acquire);
        loop {
            let next = self.op.combine(T::from_slot_bits(current), value).to_slot_bits();
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }

    pub fn read(&self, slot: usize) -> T {
        T::from_slot_bits(self.slots[slot].0.load(Ordering::Acquire))
    }

    pub fn gather(&self) -> Vec<T> {
        (0..self.slots.len()).map(|s| self.read(s)).collect()
    }
}

/* ============================================================
   Local phase
   ============================================================ */

/// Folds tiles into a private accumulator, one entry per merge slot.
pub struct LocalReduce<T> {
    op: CombineOp,
    axis: ReduceAxis,
    cols: usize,
    acc: Vec<T>,
}

impl<T: Element> LocalReduce<T> {
    pub fn new(op: CombineOp, axis: ReduceAxis, slot_count: usize, cols: usize) -> Self {
        Self {
            op,
            axis,
            cols: cols.max(1),
            acc: vec![op.identity(); slot_count],
        }
    }

    pub fn partials(&self) -> &[T] {
        &self.acc
    }
}

impl<T: Element> TileKernel<T> for LocalReduce<T> {
    type Output = T;

    fn pad_value(&self) -> T {
        self.op.identity()
    }

    fn compute(&mut self, tile: &Tile, input: &[T], _output: &mut [T]) {
        let op = self.op;
        match self.axis {
            // padded lanes hold the identity, so fold the whole block
            ReduceAxis::All => {
                self.acc[0] = input.iter().fold(self.acc[0], |a, &x| op.combine(a, x));
            }
            axis => {
                for (i, &x) in input[..tile.len].iter().enumerate() {
                    let slot = axis.slot_of(tile.global_offset + i, self.cols);
                    self.acc[slot] = op.combine(self.acc[slot], x);
                }
            }
        }
    }
}

/* ============================================================
   Protocol
   ============================================================ */

/// What one core runs for a cross-core reduction. All launched cores
/// must call [`MergeProtocol::run`]; the barriers have no timeout.
pub struct MergeProtocol<'a, T> {
    plan: &'a TilingPlan,
    buffer: &'a MergeBuffer<T>,
    barrier: &'a CoreBarrier,
    axis: ReduceAxis,
    trace: Option<&'a StageTrace>,
}

impl<'a, T: Element> MergeProtocol<'a, T> {
    pub fn new(
        plan: &'a TilingPlan,
        buffer: &'a MergeBuffer<T>,
        barrier: &'a CoreBarrier,
        axis: ReduceAxis,
    ) -> Self {
        Self {
            plan,
            buffer,
            barrier,
            axis,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<&'a StageTrace>) -> Self {
        self.trace = trace;
        self
    }

    /// Returns the merged output on the leader core, `None` elsewhere.
    pub fn run(&self, core: usize, input: &[T]) -> Option<Vec<T>> {
        let op = self.buffer.op();
        let mut local = LocalReduce::new(op, self.axis, self.buffer.slot_count(), self.plan.cols);

        PipelineExecutor::new(self.plan, core)
            .with_trace(self.trace)
            .run(input, None, &mut local);
        trace!(core, "local reduce done");

        self.barrier.sync_all(core);

        let identity = op.identity::<T>();
        for (slot, &partial) in local.partials().iter().enumerate() {
            // combining the identity is a no-op
            if partial != identity {
                self.buffer.combine(slot, partial);
            }
        }

        self.barrier.sync_all(core);

        if core == LEADER_CORE {
            let out = self.buffer.gather();
            debug!(core, slots = out.len(), ?op, axis = ?self.axis, "leader gathered merge buffer");
            Some(out)
        } else {
            None
        }
    }
}
