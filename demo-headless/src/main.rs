use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Barrier;

use clap::{Parser, ValueEnum};
use les_forcing_core::{
    CaseKind, CaseSetup, ConstantFallSpeed, Field, ForcingEngine, ForcingError, Grid, LevelSums,
    MicrophysicsScheme, ModelState, ProfileKind, ProfileStore, PuddleLog, RuntimeParams,
    SourceSwitches, Subdomain, Tendencies, UserParams,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Autoconversion rate of cloud water above the threshold (1/s)
const AUTOCONVERSION_RATE: f64 = 1e-3;
/// Cloud water below which no rain forms (kg/kg)
const AUTOCONVERSION_THRESHOLD: f64 = 5e-4;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scheme {
    None,
    Bulk1m,
    Bulk2m,
}

impl From<Scheme> for MicrophysicsScheme {
    fn from(s: Scheme) -> Self {
        match s {
            Scheme::None => MicrophysicsScheme::None,
            Scheme::Bulk1m => MicrophysicsScheme::Bulk1m,
            Scheme::Bulk2m => MicrophysicsScheme::Bulk2m,
        }
    }
}

/// Forcing-only column run of an LES case
#[derive(Parser, Debug)]
#[command(name = "les-forcing-demo")]
#[command(about = "Drive the LES forcing engine over a case without dynamics", long_about = None)]
struct Args {
    /// Case to run (dycoms-rf01, dycoms-rf02)
    #[arg(short, long, default_value = "dycoms-rf02")]
    case: CaseKind,

    /// Cells in x
    #[arg(long, default_value_t = 32)]
    nx: usize,

    /// Cells in y (1 for a 2D slab)
    #[arg(long, default_value_t = 1)]
    ny: usize,

    /// Vertical levels
    #[arg(long, default_value_t = 31)]
    nz: usize,

    /// Number of timesteps
    #[arg(short, long, default_value_t = 120)]
    nt: u64,

    /// Timestep in seconds
    #[arg(long, default_value_t = 1.0)]
    dt: f64,

    /// Timesteps with rain formation off
    #[arg(short, long, default_value_t = 30)]
    spinup: u64,

    /// Worker threads, each owning a slab of the domain
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Microphysics flavour
    #[arg(short, long, value_enum, default_value_t = Scheme::Bulk1m)]
    microphysics: Scheme,

    /// Seed of the initial θ perturbation
    #[arg(long, default_value_t = 44)]
    seed: u64,

    /// Directory receiving the precipitation log
    #[arg(short, long, default_value = ".")]
    outdir: PathBuf,

    /// Report every this many timesteps
    #[arg(short, long, default_value_t = 10)]
    report_interval: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), ForcingError> {
    let case = args.case.build();
    let scheme = MicrophysicsScheme::from(args.microphysics);
    let grid = Grid::from_extent(case.domain_extent(), args.nx, args.ny, args.nz)?;
    let user = UserParams {
        nt: args.nt,
        dt: args.dt,
        spinup: args.spinup,
        rng_seed: args.seed,
        microphysics: scheme,
        switches: SourceSwitches::for_scheme(scheme),
        ..UserParams::default()
    };

    println!("=== LES Forcing Demo ===\n");
    println!("Case: {} ({})", case.name(), args.case);
    println!(
        "Grid: {}x{}x{}, dx = {:.1} m, dz = {:.1} m, {} worker(s)",
        grid.nx, grid.ny, grid.nz, grid.dx, grid.dz, args.workers
    );

    let mut store = ProfileStore::new(grid.nz);
    let env = case.set_profiles(&grid, &user, &mut store)?;
    println!(
        "Environment: LWP {:.1} g/m², stability {:.2e} 1/m\n",
        env.liquid_water_path * 1e3,
        env.stability
    );

    let params = RuntimeParams::new(
        &user,
        case.processes(),
        grid,
        case.force_parameters(),
        store.views(),
    )?;
    let subdomains = grid.decompose(args.workers)?;
    let barrier = Barrier::new(subdomains.len());
    let sums = LevelSums::new(subdomains.len());
    let log = PuddleLog::new();

    println!("Step  | rain | th(z=0) K | max rc g/kg | max rr g/kg | precipitated");
    println!("------|------|-----------|-------------|-------------|-------------");

    std::thread::scope(|scope| {
        for sub in &subdomains {
            let worker = Worker {
                case: case.as_ref(),
                grid: &grid,
                user: &user,
                store: &store,
                params,
                report_interval: args.report_interval.max(1),
            };
            let (barrier, sums, log) = (&barrier, &sums, &log);
            scope.spawn(move || {
                if let Err(e) = worker.run(sub, barrier, sums, log) {
                    // the other workers would wait at the barrier forever
                    error!(rank = sub.rank, "{e}");
                    std::process::exit(1);
                }
            });
        }
    });

    std::fs::create_dir_all(&args.outdir)?;
    log.flush_to_dir(&args.outdir)?;
    println!("\nTotal precipitated mass: {:.6e}", log.total());
    Ok(())
}

struct Worker<'a> {
    case: &'a dyn CaseSetup,
    grid: &'a Grid,
    user: &'a UserParams,
    store: &'a ProfileStore,
    params: RuntimeParams<'a>,
    report_interval: u64,
}

impl Worker<'_> {
    fn run(
        &self,
        sub: &Subdomain,
        barrier: &Barrier,
        sums: &LevelSums,
        log: &PuddleLog,
    ) -> Result<(), ForcingError> {
        let mut state = ModelState::new(sub, self.user.microphysics, self.grid.is_3d());
        self.case
            .initial_condition(self.grid, self.user, self.store.views(), &mut state)?;
        self.condense_environment(&mut state)?;

        let microphysics = self
            .user
            .microphysics
            .has_rain()
            .then(ConstantFallSpeed::default);
        let mut engine = ForcingEngine::new(
            self.params,
            &state,
            self.case.surface_fluxes(),
            microphysics,
            barrier,
            sums,
            log,
        )?;
        let mut rhs = Tendencies::new(&state);

        engine.before_loop();
        for timestep in 0..self.user.nt {
            engine.before_step(timestep, &state)?;
            for stage in 0..2 {
                engine.update_rhs(&state, &mut rhs, stage)?;
                self.apply(&mut state, &rhs)?;
            }
            if engine.rain_enabled() {
                self.autoconvert(&mut state)?;
            }
            engine.after_step(timestep);

            if sub.rank == 0 && timestep % self.report_interval == 0 {
                self.report(timestep, &state, engine.rain_enabled(), log)?;
            }
        }
        info!(rank = sub.rank, "Worker finished");
        Ok(())
    }

    /// Move the diagnosed environmental liquid from vapor into cloud water
    fn condense_environment(&self, state: &mut ModelState) -> Result<(), ForcingError> {
        if !state.contains(Field::Rc) {
            return Ok(());
        }
        let liquid = self.store.get(ProfileKind::RlE);
        let nz = self.grid.nz;
        for column in state.get_mut(Field::Rv)?.as_mut_slice().chunks_mut(nz) {
            for (rv, l) in column.iter_mut().zip(liquid) {
                *rv -= l;
            }
        }
        for column in state.get_mut(Field::Rc)?.as_mut_slice().chunks_mut(nz) {
            column.copy_from_slice(liquid);
        }
        Ok(())
    }

    /// Semi-implicit update over one sub-stage
    ///
    /// Each sub-stage carries half the step; `w` buoyancy arrives pre-halved
    /// and takes the full step.
    fn apply(&self, state: &mut ModelState, rhs: &Tendencies) -> Result<(), ForcingError> {
        let dt = self.params.dt;
        for field in state.fields() {
            let weight = if field == Field::W { dt } else { 0.5 * dt };
            let coefficients = rhs.get(field)?;
            let values = state.get_mut(field)?.as_mut_slice();
            for ((q, &alpha), &beta) in values
                .iter_mut()
                .zip(coefficients.alpha.as_slice())
                .zip(coefficients.beta.as_slice())
            {
                *q = (*q + weight * alpha) / (1.0 - weight * beta);
            }
        }
        Ok(())
    }

    /// Kessler-type conversion of cloud water into rain
    fn autoconvert(&self, state: &mut ModelState) -> Result<(), ForcingError> {
        if !(state.contains(Field::Rc) && state.contains(Field::Rr)) {
            return Ok(());
        }
        let dt = self.params.dt;
        let converted: Vec<f64> = state
            .get_mut(Field::Rc)?
            .as_mut_slice()
            .iter_mut()
            .map(|rc| {
                let dq = (AUTOCONVERSION_RATE * (*rc - AUTOCONVERSION_THRESHOLD) * dt)
                    .min(*rc)
                    .max(0.0);
                *rc -= dq;
                dq
            })
            .collect();
        for (rr, dq) in state.get_mut(Field::Rr)?.as_mut_slice().iter_mut().zip(converted) {
            *rr += dq;
        }
        Ok(())
    }

    fn report(
        &self,
        timestep: u64,
        state: &ModelState,
        rain: bool,
        log: &PuddleLog,
    ) -> Result<(), ForcingError> {
        let max_of = |field: Field| {
            state
                .try_get(field)
                .map_or(0.0, |q| q.as_slice().iter().copied().fold(0.0, f64::max))
        };
        let th_surface = state.get(Field::Th)?.horizontal_mean()[0];
        println!(
            "{:5} | {:4} | {:9.3} | {:11.4} | {:11.4} | {:.4e}",
            timestep,
            if rain { "on" } else { "off" },
            th_surface,
            max_of(Field::Rc) * 1e3,
            max_of(Field::Rr) * 1e3,
            log.total()
        );
        Ok(())
    }
}
