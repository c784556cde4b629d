//! Per-core double-buffered pipeline.
//!
//! A core walks `IDLE -> COPY_IN -> COMPUTE -> COPY_OUT` once per tile and
//! returns to `IDLE` after its tail tile. Tiles alternate between two
//! scratch slots, and the three engines run concurrently: the copy-in of
//! tile `i + 1` may proceed while tile `i` is still computing. Ordering is
//! enforced only per slot, through the flags in [`PipeSync`].

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::trace;

use crate::align::align_up;
use crate::copy::{copy_in, copy_out};
use crate::dtype::Element;
use crate::loops::TilePlan;
use crate::plan::{CoreTiling, TilingPlan};
use crate::sync::{HardEvent, PipeSync};

/// Scratch slots per stream.
pub const BUFFER_NUM: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CopyIn,
    Compute,
    CopyOut,
}

/* ============================================================
   Tile descriptor
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Iteration number within the core.
    pub index: usize,
    pub slot: usize,
    /// Offset relative to the core's first element.
    pub offset: usize,
    /// Offset into the flattened tensor.
    pub global_offset: usize,
    pub len: usize,
    /// `len` rounded up to the copy block.
    pub padded_len: usize,
    pub is_tail: bool,
}

impl Tile {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/* ============================================================
   Tile iterator
   ============================================================ */

pub struct TileIter {
    plan: TilePlan,
    base: usize,
    block: usize,
    current: usize,
    count: usize,
}

impl TileIter {
    pub fn new(tiling: &CoreTiling, block: usize) -> Self {
        let count = if tiling.is_idle() { 0 } else { tiling.tile.iterations() };
        Self {
            plan: tiling.tile,
            base: tiling.core.element_offset,
            block,
            current: 0,
            count,
        }
    }
}

impl Iterator for TileIter {
    type Item = Tile;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.count {
            return None;
        }

        let index = self.current;
        self.current += 1;

        let offset = self.plan.tile_offset(index);
        let len = self.plan.tile_len(index);
        Some(Tile {
            index,
            slot: index % BUFFER_NUM,
            offset,
            global_offset: self.base + offset,
            len,
            padded_len: align_up(len, self.block),
            is_tail: index + 1 == self.count,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.current;
        (left, Some(left))
    }
}

impl ExactSizeIterator for TileIter {}

/* ============================================================
   Kernel seam
   ============================================================ */

/// Per-tile compute stage.
///
/// `input` and `output` cover the padded tile; only the first `tile.len`
/// lanes hold real data. `output` is empty when the pipeline has no
/// copy-out stream.
pub trait TileKernel<T: Element> {
    type Output: Element;

    /// Fill value for padded lanes.
    fn pad_value(&self) -> T {
        T::default()
    }

    fn compute(&mut self, tile: &Tile, input: &[T], output: &mut [Self::Output]);
}

/// Applies a scalar function lane by lane.
pub struct MapKernel<F, O> {
    f: F,
    _out: PhantomData<fn() -> O>,
}

impl<F, O> MapKernel<F, O> {
    pub fn new(f: F) -> Self {
        Self { f, _out: PhantomData }
    }
}

impl<T, O, F> TileKernel<T> for MapKernel<F, O>
where
    T: Element,
    O: Element,
    F: FnMut(T) -> O,
{
    type Output = O;

    fn compute(&mut self, tile: &Tile, input: &[T], output: &mut [O]) {
        for (o, &x) in output[..tile.len].iter_mut().zip(&input[..tile.len]) {
            *o = (self.f)(x);
        }
    }
}

/* ============================================================
   Stage trace
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEvent {
    pub core: usize,
    pub tile: usize,
    pub slot: usize,
    pub stage: Stage,
    pub begin: u64,
    pub end: u64,
}

/// Records stage spans against one shared sequence counter, so
/// happens-before edges show up as `end < begin`.
#[derive(Debug, Default)]
pub struct StageTrace {
    seq: AtomicU64,
    events: Mutex<Vec<StageEvent>>,
}

impl StageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn record<R>(&self, core: usize, tile: &Tile, stage: Stage, f: impl FnOnce() -> R) -> R {
        let begin = self.seq.fetch_add(1, Ordering::SeqCst);
        let out = f();
        let end = self.seq.fetch_add(1, Ordering::SeqCst);

        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StageEvent {
                core,
                tile: tile.index,
                slot: tile.slot,
                stage,
                begin,
                end,
            });
        out
    }

    /// All events ordered by start.
    pub fn events(&self) -> Vec<StageEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner).clone();
        events.sort_by_key(|e| e.begin);
        events
    }

    pub fn find(&self, core: usize, tile: usize, stage: Stage) -> Option<StageEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .find(|e| e.core == core && e.tile == tile && e.stage == stage)
    }
}

/* ============================================================
   Executor
   ============================================================ */

struct SlotBuf<T, O> {
    input: Vec<T>,
    output: Vec<O>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one core's share of a plan.
#[derive(Clone, Copy)]
pub struct PipelineExecutor<'a> {
    plan: &'a TilingPlan,
    core: usize,
    trace: Option<&'a StageTrace>,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(plan: &'a TilingPlan, core: usize) -> Self {
        Self {
            plan,
            core,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<&'a StageTrace>) -> Self {
        self.trace = trace;
        self
    }

    pub fn tiling(&self) -> &'a CoreTiling {
        self.plan.core(self.core)
    }

    pub fn tiles(&self) -> TileIter {
        TileIter::new(self.tiling(), self.plan.block_elems)
    }

    fn stage<R>(&self, tile: &Tile, stage: Stage, f: impl FnOnce() -> R) -> R {
        trace!(core = self.core, tile = tile.index, slot = tile.slot, ?stage, len = tile.len, "stage");
        match self.trace {
            Some(t) => t.record(self.core, tile, stage, f),
            None => f(),
        }
    }

    /// Stream this core's range of `input` through `kernel`.
    ///
    /// `input` is the whole flattened tensor; `output`, when present, is
    /// this core's own slice and must hold `element_count` elements.
    /// Without an output stream the compute engine frees each slot itself.
    ///
    /// The plan is trusted. A panicking kernel leaves the copy engines
    /// blocked, which hangs the dispatch just like a faulted core.
    pub fn run<T, K>(&self, input: &[T], output: Option<&mut [K::Output]>, kernel: &mut K)
    where
        T: Element,
        K: TileKernel<T>,
    {
        let tiling = self.tiling();
        if tiling.is_idle() {
            trace!(core = self.core, "no elements, core exits");
            return;
        }

        let slot_len = align_up(tiling.tile.tile_elems, self.plan.block_elems);
        let out_len = if output.is_some() { slot_len } else { 0 };
        let slots: [Mutex<SlotBuf<T, K::Output>>; BUFFER_NUM] = std::array::from_fn(|_| {
            Mutex::new(SlotBuf {
                input: vec![T::default(); slot_len],
                output: vec![<K::Output as Default>::default(); out_len],
            })
        });
        let sync = PipeSync::new(BUFFER_NUM);
        let release = if output.is_some() {
            HardEvent::ComputeToCopyOut
        } else {
            HardEvent::CopyOutToCopyIn
        };

        let pad = kernel.pad_value();
        let src = &input[tiling.core.range()];
        let (slots, sync, this) = (&slots, &sync, *self);

        thread::scope(|s| {
            s.spawn(move || {
                for tile in this.tiles() {
                    sync.wait_flag(HardEvent::CopyOutToCopyIn, tile.slot);
                    this.stage(&tile, Stage::CopyIn, || {
                        let mut buf = lock(&slots[tile.slot]);
                        copy_in(&src[tile.range()], &mut buf.input[..tile.padded_len], pad);
                    });
                    sync.set_flag(HardEvent::CopyInToCompute, tile.slot);
                }
            });

            if let Some(output) = output {
                s.spawn(move || {
                    for tile in this.tiles() {
                        sync.wait_flag(HardEvent::ComputeToCopyOut, tile.slot);
                        this.stage(&tile, Stage::CopyOut, || {
                            let buf = lock(&slots[tile.slot]);
                            copy_out(&buf.output, &mut output[tile.range()]);
                        });
                        sync.set_flag(HardEvent::CopyOutToCopyIn, tile.slot);
                    }
                });
            }

            for tile in this.tiles() {
                sync.wait_flag(HardEvent::CopyInToCompute, tile.slot);
                this.stage(&tile, Stage::Compute, || {
                    let mut guard = lock(&slots[tile.slot]);
                    let buf = &mut *guard;
                    let out = tile.padded_len.min(buf.output.len());
                    kernel.compute(&tile, &buf.input[..tile.padded_len], &mut buf.output[..out]);
                });
                sync.set_flag(release, tile.slot);
            }
        });
    }
}
