use coretile::merge::{CombineOp, ReduceAxis};
use coretile::ops::{reduce, reduce_any};
use coretile::platform::{EnvPlatform, PlatformProvider};
use coretile::shape::Shape;
use coretile::tensor::{AnyTensor, Tensor};
use coretile::tiler::OperatorConfig;

use half::f16;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let platform = EnvPlatform::default().platform_info()?;
    let config = OperatorConfig::default().with_living_buffers(2);

    let mut rng = rand::rng();
    let (rows, cols) = (257, 129);
    let data: Vec<f32> = (0..rows * cols).map(|_| rng.random_range(-100.0..100.0)).collect();
    let input = Tensor::new(data.clone(), Shape::new(vec![rows, cols]));

    /* ----- global minimum ----- */
    let min = reduce(&input, &platform, &config, CombineOp::Min, ReduceAxis::All)?;
    let expected = data.iter().copied().fold(f32::INFINITY, f32::min);
    assert_eq!(min.as_slice(), &[expected]);
    info!(min = expected, "global min");

    /* ----- per-column maximum ----- */
    let col_max = reduce(&input, &platform, &config, CombineOp::Max, ReduceAxis::Columns)?;
    for c in 0..cols {
        let want = (0..rows).map(|r| data[r * cols + c]).fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(col_max.as_slice()[c], want);
    }
    info!(columns = col_max.len(), "column max");

    /* ----- per-row minimum on a run-time kind ----- */
    let halfs: AnyTensor = Tensor::new(
        data.iter().map(|&v| f16::from_f32(v)).collect(),
        Shape::new(vec![rows, cols]),
    )
    .into();
    let row_min = reduce_any(&halfs, &platform, &config, CombineOp::Min, ReduceAxis::Rows)?;
    info!(kind = %row_min.dtype(), shape = %row_min.shape(), "row min");

    Ok(())
}
