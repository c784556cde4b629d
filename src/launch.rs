//! Static SPMD launch: one thread per used core, identical code,
//! core-indexed data, joined before returning.

use std::panic;
use std::thread;

use tracing::debug;

use crate::dtype::Element;
use crate::error::{Result, TilingError};
use crate::merge::{CombineOp, MergeBuffer, MergeProtocol, ReduceAxis, LEADER_CORE};
use crate::pipeline::{PipelineExecutor, StageTrace, TileKernel};
use crate::plan::{CoreTiling, TilingPlan};
use crate::sync::CoreBarrier;

/// Run `body(core)` on every launched core and collect the results in
/// core order. A panic on any core is re-raised after all cores join.
pub fn launch<R, F>(plan: &TilingPlan, body: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync,
{
    let body = &body;
    debug!(block_dim = plan.block_dim(), key = plan.key as u64, "launching cores");

    thread::scope(|s| {
        let handles: Vec<_> = (0..plan.block_dim())
            .map(|core| s.spawn(move || body(core)))
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    })
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TilingError::LengthMismatch { expected, actual });
    }
    Ok(())
}

/// Each core streams its own range of `input` into the same range of
/// `output`. `make_kernel` builds one kernel per core, on that core.
pub fn launch_elementwise<T, K, F>(
    plan: &TilingPlan,
    input: &[T],
    output: &mut [K::Output],
    make_kernel: F,
    trace: Option<&StageTrace>,
) -> Result<()>
where
    T: Element,
    K: TileKernel<T>,
    F: Fn(&CoreTiling) -> K + Sync,
{
    check_len(plan.total_elements, input.len())?;
    check_len(plan.total_elements, output.len())?;

    // cores own disjoint, contiguous output ranges
    let mut chunks = Vec::with_capacity(plan.block_dim());
    let mut rest = output;
    for c in plan.used_cores() {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(c.core.element_count);
        chunks.push(head);
        rest = tail;
    }

    let make_kernel = &make_kernel;
    thread::scope(|s| {
        let handles: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(core, out)| {
                s.spawn(move || {
                    let exec = PipelineExecutor::new(plan, core).with_trace(trace);
                    let mut kernel = make_kernel(exec.tiling());
                    exec.run(input, Some(out), &mut kernel);
                })
            })
            .collect();

        for h in handles {
            if let Err(e) = h.join() {
                panic::resume_unwind(e);
            }
        }
    });
    Ok(())
}

/// Cross-core reduction of `input`; returns the leader's merged output.
pub fn launch_reduce<T: Element>(
    plan: &TilingPlan,
    input: &[T],
    op: CombineOp,
    axis: ReduceAxis,
    trace: Option<&StageTrace>,
) -> Result<Vec<T>> {
    check_len(plan.total_elements, input.len())?;

    let slot_count = axis.slot_count(plan.rows, plan.cols);
    let buffer = MergeBuffer::<T>::new(slot_count, op);
    let barrier = CoreBarrier::new(plan.block_dim());
    let protocol = MergeProtocol::new(plan, &buffer, &barrier, axis).with_trace(trace);

    let mut gathered = launch(plan, |core| protocol.run(core, input));
    gathered.swap_remove(LEADER_CORE).ok_or_else(|| {
        TilingError::MalformedPlan(format!("leader core {} gathered nothing", LEADER_CORE))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MapKernel;
    use crate::platform::PlatformInfo;
    use crate::shape::Shape;
    use crate::tensor::TensorDescriptor;
    use crate::tiler::{plan, OperatorConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn elementwise_plan(n: usize, cores: usize) -> TilingPlan {
        plan(&TensorDescriptor::from_raw(n, 4), &PlatformInfo::new(cores, 512), &OperatorConfig::default()).unwrap()
    }

    #[test]
    fn launch_starts_used_cores_only() {
        let plan = elementwise_plan(20, 8);
        let started = AtomicUsize::new(0);

        let cores = launch(&plan, |core| {
            started.fetch_add(1, Ordering::SeqCst);
            core
        });

        assert_eq!(cores, vec![0, 1, 2]);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn elementwise_writes_every_element_once() {
        let plan = elementwise_plan(1000, 8);
        let input: Vec<i32> = (0..1000).collect();
        let mut output = vec![0i32; 1000];

        launch_elementwise(&plan, &input, &mut output, |_| MapKernel::<_, i32>::new(|x: i32| x * 3), None).unwrap();

        assert!(output.iter().enumerate().all(|(i, &v)| v == 3 * i as i32));
    }

    #[test]
    fn kernels_are_built_per_core() {
        let plan = elementwise_plan(64, 4);
        let built = AtomicUsize::new(0);
        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 64];

        launch_elementwise(
            &plan,
            &input,
            &mut output,
            |tiling| {
                built.fetch_add(1, Ordering::SeqCst);
                let core = tiling.core.core as f32;
                MapKernel::<_, f32>::new(move |x: f32| x + core)
            },
            None,
        )
        .unwrap();

        assert_eq!(built.load(Ordering::SeqCst), plan.block_dim());
        assert_eq!(output[0], 1.0);
        assert_eq!(output[63], 1.0 + (plan.block_dim() - 1) as f32);
    }

    #[test]
    fn buffer_length_is_checked() {
        let plan = elementwise_plan(10, 2);
        let mut output = vec![0.0f32; 10];
        let err = launch_elementwise(&plan, &[1.0f32; 9], &mut output, |_| MapKernel::<_, f32>::new(|x: f32| x), None)
            .unwrap_err();

        assert_eq!(err, TilingError::LengthMismatch { expected: 10, actual: 9 });
    }

    #[test]
    fn reduce_over_two_cores() {
        // {5, 2, 9} on core 0 and {1, 7} on core 1 with a 3-element block
        let platform = PlatformInfo::new(2, 4096).with_block_bytes(12);
        let config = OperatorConfig::default().with_living_buffers(2).with_reduce_axis(ReduceAxis::All);
        let plan = plan(&TensorDescriptor::from_raw(5, 4), &platform, &config).unwrap();
        assert_eq!(plan.core(0).core.element_count, 3);
        assert_eq!(plan.core(1).core.element_count, 2);

        let out = launch_reduce(&plan, &[5.0f32, 2.0, 9.0, 1.0, 7.0], CombineOp::Min, ReduceAxis::All, None).unwrap();
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn reduce_rows_split_across_cores() {
        let desc = TensorDescriptor::new(Shape::new(vec![3, 10]), crate::dtype::DType::I32);
        let config = OperatorConfig::default().with_living_buffers(2).with_reduce_axis(ReduceAxis::Rows);
        let plan = plan(&desc, &PlatformInfo::new(4, 4096), &config).unwrap();
        let input: Vec<i32> = (0..30).collect();

        let out = launch_reduce(&plan, &input, CombineOp::Sum, ReduceAxis::Rows, None).unwrap();

        assert!(plan.block_dim() > 1);
        assert_eq!(out, vec![45, 145, 245]);
    }

    #[test]
    fn empty_reduction_yields_identity() {
        let config = OperatorConfig::default().with_reduce_axis(ReduceAxis::All);
        let plan = plan(&TensorDescriptor::from_raw(0, 4), &PlatformInfo::new(4, 4096), &config).unwrap();

        let out = launch_reduce::<f32>(&plan, &[], CombineOp::Min, ReduceAxis::All, None).unwrap();
        assert_eq!(out, vec![f32::INFINITY]);
    }
}
