//! Time-stepping hooks: worker synchronisation, spinup gating, puddle logging

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Barrier, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::{negcheck, Result};
use crate::fields::{Field, FieldArray, ModelState};
use crate::precipitation::LiquidPuddle;

/// File name of the precipitation log
pub const PUDDLE_LOG_FILE: &str = "prec_vol.dat";

/// Cross-worker ordering point
///
/// Every worker must reach every wait. A worker that returns early with an
/// error leaves the others blocked at their next wait, so a multi-worker driver
/// has to abort the whole run on the first error.
pub trait SyncPoint: Send + Sync {
    /// Block until every worker has arrived
    fn wait(&self);
}

/// Synchronisation for a single worker
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSync;

impl SyncPoint for NoSync {
    fn wait(&self) {}
}

impl SyncPoint for Barrier {
    fn wait(&self) {
        Barrier::wait(self);
    }
}

/// Whether precipitation-forming processes are active
///
/// With a spinup of `n > 0` steps rain formation is switched off before the
/// loop and switched back on at the start of timestep `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinupState {
    spinup: u64,
    rain: bool,
}

impl SpinupState {
    /// Rain on, spinup of `spinup` timesteps pending
    #[must_use]
    pub fn new(spinup: u64) -> Self {
        Self { spinup, rain: true }
    }

    /// Whether rain formation is currently enabled
    pub fn rain_enabled(&self) -> bool {
        self.rain
    }

    fn before_loop(&mut self) {
        if self.spinup > 0 {
            self.rain = false;
            info!(spinup = self.spinup, "Rain formation off during spinup");
        }
    }

    fn before_step(&mut self, timestep: u64) {
        if self.spinup != 0 && self.spinup == timestep {
            self.rain = true;
            info!(timestep, "Spinup finished, rain formation on");
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    pending: f64,
    records: Vec<(u64, f64)>,
}

/// Append-only log of per-step surface precipitation
///
/// Shared by all workers: each deposits its puddle, rank 0 commits the step.
#[derive(Debug, Default)]
pub struct PuddleLog {
    inner: Mutex<LogInner>,
}

impl PuddleLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one worker's contribution to the running sum of this step
    pub fn deposit(&self, mass: f64) {
        self.lock().pending += mass;
    }

    /// Record the running sum for `timestep` and reset it
    pub fn commit(&self, timestep: u64) -> f64 {
        let mut inner = self.lock();
        let mass = std::mem::take(&mut inner.pending);
        inner.records.push((timestep, mass));
        mass
    }

    /// Committed `(timestep, mass)` records
    pub fn records(&self) -> Vec<(u64, f64)> {
        self.lock().records.clone()
    }

    /// Total committed mass
    pub fn total(&self) -> f64 {
        self.lock().records.iter().map(|(_, m)| m).sum()
    }

    /// Write `<timestep> <mass>` lines
    ///
    /// # Errors
    ///
    /// [`crate::ForcingError::Io`] on write failure.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for (timestep, mass) in self.records() {
            writeln!(writer, "{timestep} {mass}")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the log to [`PUDDLE_LOG_FILE`] inside `dir`
    ///
    /// # Errors
    ///
    /// [`crate::ForcingError::Io`] if the file cannot be created or written.
    pub fn flush_to_dir(&self, dir: &Path) -> Result<()> {
        let path = dir.join(PUDDLE_LOG_FILE);
        let file = File::create(&path)?;
        self.write_to(BufWriter::new(file))?;
        info!(path = %path.display(), records = self.lock().records.len(), "Puddle log written");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SumSlot {
    sum: Vec<f64>,
    columns: usize,
    reads: usize,
}

/// Per-level column sums shared by all workers
///
/// Consecutive reductions alternate between two slots. A slot is reused two
/// reductions later, after every worker has passed the wait of the reduction in
/// between and therefore finished reading it; the last reader clears it.
#[derive(Debug)]
pub struct LevelSums {
    workers: usize,
    slots: [Mutex<SumSlot>; 2],
}

impl LevelSums {
    /// Sums for `workers` workers
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            slots: Default::default(),
        }
    }

    /// Number of workers taking part in every reduction
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn slot(&self, call: u64) -> MutexGuard<'_, SumSlot> {
        self.slots[(call % 2) as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One worker's access to domain-wide horizontal means
#[derive(Clone, Copy)]
pub struct HorizontalMeans<'a> {
    shared: Option<(&'a LevelSums, &'a dyn SyncPoint)>,
    calls: u64,
}

impl HorizontalMeans<'static> {
    /// Means over the caller's own field only, for single-worker runs
    #[must_use]
    pub fn local() -> Self {
        Self {
            shared: None,
            calls: 0,
        }
    }
}

impl<'a> HorizontalMeans<'a> {
    /// Means reduced over every worker of `sums`, ordered by `sync`
    #[must_use]
    pub fn shared(sums: &'a LevelSums, sync: &'a dyn SyncPoint) -> Self {
        Self {
            shared: Some((sums, sync)),
            calls: 0,
        }
    }

    /// Per-level mean of `field` over the whole domain
    ///
    /// Collective: every worker must call it the same number of times.
    pub fn mean(&mut self, field: &FieldArray) -> Vec<f64> {
        let Some((sums, sync)) = self.shared else {
            return field.horizontal_mean();
        };
        let nz = field.nz();
        let call = self.calls;
        self.calls += 1;

        {
            let mut slot = sums.slot(call);
            if slot.sum.len() != nz {
                slot.sum = vec![0.0; nz];
            }
            for column in field.columns() {
                for (s, v) in slot.sum.iter_mut().zip(column) {
                    *s += v;
                }
            }
            slot.columns += field.n_columns();
        }
        sync.wait();

        let mut slot = sums.slot(call);
        let n = slot.columns.max(1) as f64;
        let mean = slot.sum.iter().map(|s| s / n).collect();
        slot.reads += 1;
        if slot.reads == sums.workers {
            *slot = SumSlot::default();
        }
        mean
    }
}

impl std::fmt::Debug for HorizontalMeans<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizontalMeans")
            .field("shared", &self.shared.map(|(sums, _)| sums.workers()))
            .field("calls", &self.calls)
            .finish()
    }
}

/// Per-worker hook logic run around every timestep
#[derive(Debug, Clone)]
pub struct TimeSteppingHooks {
    rank: usize,
    spinup: SpinupState,
}

impl TimeSteppingHooks {
    /// Hooks of worker `rank` with a spinup of `spinup` timesteps
    #[must_use]
    pub fn new(rank: usize, spinup: u64) -> Self {
        Self {
            rank,
            spinup: SpinupState::new(spinup),
        }
    }

    /// Worker rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Spinup gate
    pub fn spinup(&self) -> &SpinupState {
        &self.spinup
    }

    /// Before the first timestep
    pub fn before_loop(&mut self) {
        self.spinup.before_loop();
    }

    /// At the start of `timestep`: spinup transition and vapor sanity check
    ///
    /// # Errors
    ///
    /// [`crate::ForcingError::Negative`] if the vapor field holds a negative
    /// value.
    pub fn before_step(&mut self, timestep: u64, state: &ModelState) -> Result<()> {
        self.spinup.before_step(timestep);
        negcheck(state.get(Field::Rv)?.as_slice(), "rv", "before step")
    }

    /// After `timestep`: move the worker's puddle into the shared log
    ///
    /// Every worker deposits, all pass `sync`, rank 0 commits the record, and
    /// all pass `sync` again so no deposit of the next step can race the commit.
    pub fn after_step(
        &self,
        timestep: u64,
        puddle: &mut LiquidPuddle,
        log: &PuddleLog,
        sync: &dyn SyncPoint,
    ) {
        log.deposit(puddle.take());
        sync.wait();
        if self.rank == 0 {
            let mass = log.commit(timestep);
            debug!(timestep, mass, "precipitation logged");
        }
        sync.wait();
    }
}
