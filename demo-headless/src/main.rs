use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use hydra_core::{
    BackendPreference, EngineConfig, EngineContext, ErosionSettings, ErosionTarget, Surface,
    SurfaceTarget, Tiling,
};
use tracing_subscriber::EnvFilter;

/// Headless terrain erosion demo
#[derive(Parser, Debug)]
#[command(name = "hydra-demo")]
#[command(about = "Runs a chain of erosion solvers on a synthetic terrain", long_about = None)]
struct Args {
    /// Heightmap width in pixels (height is half of it for planets)
    #[arg(short, long, default_value_t = 256)]
    size: u32,

    /// Solvers to run in order, committing each result before the next
    #[arg(short = 'c', long, value_enum, value_delimiter = ',', default_value = "thermal,particle,pipe,snow,flow")]
    chain: Vec<Solver>,

    /// Boundary handling
    #[arg(short, long, value_enum, default_value_t = TilingArg::None)]
    tiling: TilingArg,

    /// Compute backend
    #[arg(short, long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Seed of the stochastic solvers
    #[arg(long, default_value_t = 1)]
    seed: u32,

    /// Settings JSON file; missing fields take their defaults
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print the effective settings as JSON and exit
    #[arg(long)]
    dump_settings: bool,

    /// Memory budget in MiB (unbounded when omitted)
    #[arg(long)]
    budget_mib: Option<u64>,

    /// Number of terrain octaves
    #[arg(long, default_value_t = 4)]
    octaves: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Solver {
    Thermal,
    Particle,
    Pipe,
    Snow,
    Flow,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TilingArg {
    None,
    X,
    Y,
    Xy,
    Planet,
}

impl From<TilingArg> for Tiling {
    fn from(arg: TilingArg) -> Self {
        match arg {
            TilingArg::None => Tiling::None,
            TilingArg::X => Tiling::X,
            TilingArg::Y => Tiling::Y,
            TilingArg::Xy => Tiling::Xy,
            TilingArg::Planet => Tiling::Planet,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Auto,
    Cpu,
    Gpu,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Cpu => BackendPreference::Cpu,
            BackendArg::Gpu => BackendPreference::Gpu,
        }
    }
}

/// Sum of sine octaves with decreasing amplitude, in `[0, 1]`
fn synthetic_height(x: f32, y: f32, octaves: u32) -> f32 {
    let mut h = 0.0;
    let mut amplitude = 0.5;
    let mut frequency = 1.5;
    let mut total = 0.0;
    for octave in 0..octaves {
        let phase = octave as f32 * 1.7;
        h += amplitude
            * (0.5 + 0.25 * ((x * frequency + phase).sin() + (y * frequency * 1.3 - phase).cos()));
        total += amplitude;
        amplitude *= 0.5;
        frequency *= 2.1;
    }
    let ridge = (1.0 - (x + y * 0.3).abs()).max(0.0);
    (h / total.max(f32::EPSILON)) * 0.7 + ridge * 0.3
}

struct Stats {
    min: f32,
    max: f32,
    mean: f64,
}

fn stats(engine: &mut EngineContext, target: &dyn ErosionTarget) -> Option<Stats> {
    let id = target.maps().result.or(target.maps().source)?;
    let field = &engine.cache_mut().get(id)?.field;
    let (min, max) = field.min_max();
    Some(Stats {
        min,
        max,
        mean: field.sum() / field.cell_count() as f64,
    })
}

fn run_solver(engine: &mut EngineContext, target: &mut SurfaceTarget, solver: Solver) -> hydra_core::Result<bool> {
    match solver {
        Solver::Thermal => engine.erode_thermal(target).map(|_| true),
        Solver::Particle => engine.erode_particle(target).map(|_| true),
        Solver::Pipe => engine.erode_pipe(target).map(|_| true),
        Solver::Snow => {
            engine.simulate_snow(target)?;
            Ok(target.maps().result.is_some())
        }
        Solver::Flow => engine.generate_flow(target).map(|_| false),
    }
}

fn load_settings(args: &Args) -> Result<ErosionSettings, String> {
    let mut settings = match &args.settings {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
            ErosionSettings::from_json(&json).map_err(|e| e.to_string())?
        }
        None => ErosionSettings::default(),
    };
    let tiling = Tiling::from(args.tiling);
    let height = if tiling.is_planet() {
        (args.size / 2).max(1)
    } else {
        args.size
    };
    settings.resolution = (args.size, height);
    settings.tiling = tiling;
    Ok(settings)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hydra_core=info")),
        )
        .init();

    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if args.dump_settings {
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Cannot serialize settings: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("=== Hydra Erosion Demo ===\n");

    let mut engine = EngineContext::new(EngineConfig {
        backend: args.backend.into(),
        seed: args.seed,
        memory_budget_bytes: args.budget_mib.map(|mib| mib * 1024 * 1024),
        ..EngineConfig::default()
    });
    println!("Backend: {}", engine.backend_name());

    let octaves = args.octaves;
    let grid = (args.size / 4).clamp(8, 512);
    let surface = Surface::from_grid(grid, grid, |x, y| synthetic_height(x, y, octaves));
    let mut target = SurfaceTarget::new("demo", surface).with_settings(settings);
    let (w, h) = target.size();
    println!("Terrain: {w}x{h}, tiling {:?}\n", target.settings().tiling);

    if let Err(e) = engine.prepare_base(&mut target) {
        eprintln!("Heightmap generation failed: {e}");
        return ExitCode::FAILURE;
    }

    println!("Solver   | Time(s) |     Min |     Max |    Mean");
    println!("---------|---------|---------|---------|--------");
    if let Some(s) = stats(&mut engine, &target) {
        println!("{:8} | {:7} | {:7.4} | {:7.4} | {:7.4}", "base", "-", s.min, s.max, s.mean);
    }

    for solver in &args.chain {
        let started = Instant::now();
        let produced_result = match run_solver(&mut engine, &mut target, *solver) {
            Ok(produced) => produced,
            Err(e) => {
                eprintln!("{solver:?} failed: {e}");
                return ExitCode::FAILURE;
            }
        };
        let elapsed = started.elapsed().as_secs_f64();
        if produced_result {
            if let Err(e) = engine.commit_result_as_source(&mut target, false) {
                eprintln!("Apply failed: {e}");
                return ExitCode::FAILURE;
            }
        }
        if let Some(s) = stats(&mut engine, &target) {
            println!(
                "{:8} | {:7.2} | {:7.4} | {:7.4} | {:7.4}",
                format!("{solver:?}").to_lowercase(),
                elapsed,
                s.min,
                s.max,
                s.mean
            );
        }
    }

    let report = engine.flush_messages();
    if !report.info.is_empty() {
        println!("\n{}", report.info_text());
    }
    if report.has_errors() {
        eprintln!("{}", report.error_text());
    }

    println!("\n=== Outputs ===");
    for name in engine.images().names() {
        println!("  {name}");
    }
    println!("Live fields: {}", engine.manager().live_fields());

    engine.teardown();
    ExitCode::SUCCESS
}
