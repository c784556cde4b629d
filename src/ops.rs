use crate::dispatch_any;
use crate::dtype::Element;
use crate::error::Result;
use crate::launch::{launch_elementwise, launch_reduce};
use crate::merge::{CombineOp, ReduceAxis};
use crate::pipeline::{MapKernel, TileKernel};
use crate::plan::CoreTiling;
use crate::platform::PlatformInfo;
use crate::tensor::{AnyTensor, Tensor};
use crate::tiler::{self, OperatorConfig};

/* ============================================================
   Elementwise
   ============================================================ */

/// Plan, launch and collect an elementwise kernel. Any reduction axis in
/// `config` is ignored.
pub fn elementwise<T, K, F>(
    input: &Tensor<T>,
    platform: &PlatformInfo,
    config: &OperatorConfig,
    make_kernel: F,
) -> Result<Tensor<K::Output>>
where
    T: Element,
    K: TileKernel<T>,
    F: Fn(&CoreTiling) -> K + Sync,
{
    let config = OperatorConfig {
        reduce_axis: None,
        ..*config
    };
    let plan = tiler::plan(&input.descriptor(), platform, &config)?;

    let mut out = vec![<K::Output as Default>::default(); input.len()];
    launch_elementwise(&plan, input.as_slice(), &mut out, make_kernel, None)?;
    Ok(Tensor::new(out, input.shape().clone()))
}

pub fn map<T, O, F>(input: &Tensor<T>, platform: &PlatformInfo, config: &OperatorConfig, f: F) -> Result<Tensor<O>>
where
    T: Element,
    O: Element,
    F: Fn(T) -> O + Sync,
{
    elementwise(input, platform, config, |_| MapKernel::<_, O>::new(&f))
}

/* ============================================================
   Reductions
   ============================================================ */

/// Reduce across every core and return the leader's result.
///
/// The output has shape `[1]`, `[cols]` or `[rows]` of the row-major
/// matrix view. There is no output stream, so `config.living_buffers`
/// only needs to cover the input slots and temporaries.
pub fn reduce<T: Element>(
    input: &Tensor<T>,
    platform: &PlatformInfo,
    config: &OperatorConfig,
    op: CombineOp,
    axis: ReduceAxis,
) -> Result<Tensor<T>> {
    let config = config.with_reduce_axis(axis);
    let plan = tiler::plan(&input.descriptor(), platform, &config)?;

    let out = launch_reduce(&plan, input.as_slice(), op, axis, None)?;
    let (rows, cols) = input.shape().as_matrix();
    Ok(Tensor::new(out, axis.output_shape(rows, cols)))
}

/// [`reduce`] for a tensor whose kind is picked at run time.
pub fn reduce_any(
    input: &AnyTensor,
    platform: &PlatformInfo,
    config: &OperatorConfig,
    op: CombineOp,
    axis: ReduceAxis,
) -> Result<AnyTensor> {
    dispatch_any!(input, t => wrap reduce(t, platform, config, op, axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::shape::Shape;
    use half::bf16;

    fn platform() -> PlatformInfo {
        PlatformInfo::new(8, 4096)
    }

    #[test]
    fn map_keeps_shape() {
        let input = Tensor::new((0..20).map(|i| i as f32).collect(), Shape::new(vec![4, 5]));
        let out = map(&input, &platform(), &OperatorConfig::default(), |x: f32| x * x).unwrap();

        assert_eq!(out.shape(), input.shape());
        assert_eq!(out.as_slice()[19], 361.0);
    }

    #[test]
    fn map_can_change_kind() {
        let input = Tensor::from_vec(vec![1i32, -2, 3]);
        let out: Tensor<f64> = map(&input, &platform(), &OperatorConfig::default(), |x: i32| x as f64 / 2.0).unwrap();
        assert_eq!(out.into_vec(), vec![0.5, -1.0, 1.5]);
    }

    #[test]
    fn min_of_scattered_partials() {
        let platform = PlatformInfo::new(2, 4096).with_block_bytes(12);
        let input = Tensor::from_vec(vec![5.0f32, 2.0, 9.0, 1.0, 7.0]);
        let out = reduce(&input, &platform, &OperatorConfig::default(), CombineOp::Min, ReduceAxis::All).unwrap();

        assert_eq!(out.into_vec(), vec![1.0]);
    }

    #[test]
    fn column_sums() {
        let input = Tensor::new((0..24).collect::<Vec<i32>>(), Shape::new(vec![4, 6]));
        let out = reduce(&input, &platform(), &OperatorConfig::default(), CombineOp::Sum, ReduceAxis::Columns).unwrap();

        assert_eq!(out.shape().dims, vec![6]);
        assert_eq!(out.into_vec(), vec![36, 40, 44, 48, 52, 56]);
    }

    #[test]
    fn empty_reduction_is_identity() {
        let input = Tensor::new(Vec::<u8>::new(), Shape::new(vec![0, 3]));
        let out = reduce(&input, &platform(), &OperatorConfig::default(), CombineOp::Max, ReduceAxis::Columns).unwrap();
        assert_eq!(out.into_vec(), vec![0, 0, 0]);
    }

    #[test]
    fn reduce_any_keeps_kind() {
        let input: AnyTensor = Tensor::from_vec(vec![bf16::from_f32(1.5), bf16::from_f32(-4.0)]).into();
        let out = reduce_any(&input, &platform(), &OperatorConfig::default(), CombineOp::Max, ReduceAxis::All).unwrap();

        assert_eq!(out.dtype(), DType::BF16);
        match out {
            AnyTensor::BF16(t) => assert_eq!(t.into_vec(), vec![bf16::from_f32(1.5)]),
            other => panic!("unexpected kind {:?}", other.dtype()),
        }
    }

    #[test]
    fn scratch_errors_surface_before_launch() {
        let input = Tensor::from_vec(vec![1.0f64; 16]);
        let err = map(&input, &PlatformInfo::new(2, 16), &OperatorConfig::default(), |x: f64| x).unwrap_err();
        assert!(matches!(err, crate::error::TilingError::InsufficientScratch { .. }));
    }
}
