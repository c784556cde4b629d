use coretile::launch::launch_elementwise;
use coretile::pipeline::{Stage, StageTrace, Tile, TileKernel};
use coretile::platform::{EnvPlatform, PlatformProvider};
use coretile::tensor::Tensor;
use coretile::tiler::{plan, OperatorConfig};

use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ----------------------
/// y = a * x + b, one tile at a time
/// ----------------------
struct Axpb {
    a: f32,
    b: f32,
}

impl TileKernel<f32> for Axpb {
    type Output = f32;

    fn compute(&mut self, tile: &Tile, input: &[f32], output: &mut [f32]) {
        for (y, &x) in output[..tile.len].iter_mut().zip(&input[..tile.len]) {
            *y = self.a * x + self.b;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let mut rng = rand::rng();
    let n = 100_003;
    let x: Vec<f32> = (0..n).map(|_| rng.random_range(-1.0..1.0)).collect();
    let input = Tensor::from_vec(x.clone());

    // CORETILE_CORE_COUNT / CORETILE_SCRATCH_BYTES override the defaults
    let platform = EnvPlatform::default().platform_info()?;
    let plan = plan(&input.descriptor(), &platform, &OperatorConfig::default())?;

    let trace = StageTrace::new();
    let mut y = vec![0.0f32; n];
    launch_elementwise(
        &plan,
        input.as_slice(),
        &mut y,
        |_| Axpb { a: 2.0, b: 0.5 },
        Some(&trace),
    )?;

    let max_err = x
        .iter()
        .zip(&y)
        .map(|(x, y)| (2.0 * x + 0.5 - y).abs())
        .fold(0.0f32, f32::max);

    let events = trace.events();
    let count = |stage: Stage| events.iter().filter(|e| e.stage == stage).count();
    info!(
        cores = plan.block_dim(),
        copy_in = count(Stage::CopyIn),
        compute = count(Stage::Compute),
        copy_out = count(Stage::CopyOut),
        max_err,
        "elementwise pipeline done"
    );

    assert!(max_err == 0.0);
    Ok(())
}
