//! Shared setup for the integration tests
#![allow(dead_code)]

use les_forcing_core::{
    CaseSetup, Dycoms, Grid, MicrophysicsScheme, ProfileStore, ResearchFlight, SourceSwitches,
    UserParams,
};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness; `RUST_LOG` overrides the level
#[ctor::ctor]
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A DYCOMS case with populated profiles on an `nx × ny × nz` grid
pub struct CaseFixture {
    pub case: Dycoms,
    pub grid: Grid,
    pub user: UserParams,
    pub store: ProfileStore,
}

pub fn dycoms(
    flight: ResearchFlight,
    [nx, ny, nz]: [usize; 3],
    scheme: MicrophysicsScheme,
) -> CaseFixture {
    let case = Dycoms::new(flight);
    let grid = Grid::from_extent(case.domain_extent(), nx, ny, nz).unwrap();
    let user = UserParams {
        microphysics: scheme,
        switches: SourceSwitches::for_scheme(scheme),
        ..UserParams::default()
    };
    let mut store = ProfileStore::new(grid.nz);
    case.set_profiles(&grid, &user, &mut store).unwrap();
    CaseFixture {
        case,
        grid,
        user,
        store,
    }
}
