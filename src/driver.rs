//! The time loop of one rank.
//!
//! Every rank owns one [`SimulationDriver`]; together they advance the
//! global field in lockstep. The only points where ranks wait for each other
//! are the halo exchanges and, at output steps, the collectives that compute
//! global diagnostics and agree on whether to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::boundary;
use crate::error::{Error, Result};
use crate::field::{LocalField, Species};
use crate::halo::HaloExchange;
use crate::io::{Reader, StepData, Writer};
use crate::message::comm::Communicator;
use crate::message::mailbox::Mailbox;
use crate::settings::{Restart, Settings};
use crate::stats::{Diagnostics, MetricEvent, Timings};
use crate::stepper::ReactionDiffusionStepper;
use crate::topology::{ProcessGrid, Topology};

/// How often ranks synchronize when no output is written.
pub const SYNC_INTERVAL: u64 = 100;

/// Half the edge of the cube seeded off equilibrium at the domain center.
const SEED_HALF_WIDTH: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Fields are allocated but hold no initial condition.
    Uninitialized,
    /// Seeded (or restarted), ghosts exchanged, boundaries applied.
    Initialized,
    Running,
    /// The configured number of steps has been taken.
    Terminal,
}

/// What a completed (or interrupted) run reports back.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub iterations: u64,
    pub output_steps: u64,
    pub sum_u: f64,
    pub sum_v: f64,
    pub interrupted: bool,
    pub elapsed: Duration,
}

pub struct SimulationDriver<C> {
    settings: Settings,
    grid: ProcessGrid,
    mailbox: Mailbox<C>,
    halo: HaloExchange,
    stepper: ReactionDiffusionStepper,
    field: LocalField,
    writer: Box<dyn Writer>,
    reader: Option<Box<dyn Reader>>,
    stop: Option<Arc<AtomicBool>>,
    timings: Timings,
    iteration: u64,
    output_steps: u64,
    phase: Phase,
}

impl<C: Communicator> SimulationDriver<C> {
    /// Validate the settings, decompose the domain over the ranks of `comm`
    /// and allocate this rank's block. Fails on every rank alike if the
    /// settings are unusable, so no rank is left waiting for another.
    pub fn new(settings: Settings, comm: C, writer: Box<dyn Writer>) -> Result<Self> {
        settings.validate()?;

        let grid = ProcessGrid::new(Topology::from_communicator(&comm)?, &settings)?;
        let stepper = ReactionDiffusionStepper::new(&settings, grid.rank());
        let field = LocalField::new(grid.local_size());

        Ok(Self {
            settings,
            grid,
            mailbox: Mailbox::new(comm),
            halo: HaloExchange::new(),
            stepper,
            field,
            writer,
            reader: None,
            stop: None,
            timings: Timings::default(),
            iteration: 0,
            output_steps: 0,
            phase: Phase::Uninitialized,
        })
    }

    /// Attach the reader used to restart and to validate written steps.
    pub fn with_reader(mut self, reader: Box<dyn Reader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Attach a flag that, once raised on any rank, makes all ranks stop at
    /// the next synchronization point.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of completed steps.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn field(&self) -> &LocalField {
        &self.field
    }

    pub fn grid(&self) -> &ProcessGrid {
        &self.grid
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Put the initial condition in place: either the tutorial seed or the
    /// step named by the restart settings. Ghosts are valid afterwards.
    pub fn init(&mut self) -> Result<()> {
        self.expect_phase(&[Phase::Uninitialized], "init")?;

        match self.settings.restart.clone() {
            Some(restart) => self.load_checkpoint(&restart)?,
            None => self.seed(),
        }
        self.refresh_ghosts()?;
        self.phase = Phase::Initialized;
        Ok(())
    }

    /// Advance the field by one step. On return the ghosts are valid again,
    /// ready for the next step or for a write.
    pub fn iterate(&mut self) -> Result<()> {
        self.expect_phase(&[Phase::Initialized, Phase::Running], "iterate")?;

        let iteration = self.iteration;
        let ((), compute) = MetricEvent::time(MetricEvent::Compute, || {
            self.stepper.step(&mut self.field, iteration)
        });
        self.timings.record(compute);
        self.refresh_ghosts()?;

        self.iteration += 1;
        self.timings.tick();
        self.phase = if self.iteration >= self.settings.steps {
            Phase::Terminal
        } else {
            Phase::Running
        };
        Ok(())
    }

    /// Run from wherever the driver is to the configured number of steps,
    /// writing output and validating it along the way. If this rank fails,
    /// the group is aborted before the error is returned.
    pub fn run(&mut self) -> Result<RunSummary> {
        let result = self.run_to_completion();

        if let Err(e) = &result {
            if !matches!(e, Error::Aborted) {
                self.mailbox.comm().abort();
            }
        }
        result
    }

    /// Global sums of U and V over the interior of every rank. Collective.
    pub fn global_sums(&mut self) -> Result<(f64, f64)> {
        let local = vec![self.field.sum(Species::U), self.field.sum(Species::V)];

        match self.mailbox.all_reduce_sum(local)?.as_slice() {
            &[u, v] => Ok((u, v)),
            other => Err(Error::SizeMismatch {
                expected: 2,
                found: other.len(),
            }),
        }
    }

    fn run_to_completion(&mut self) -> Result<RunSummary> {
        let start = Instant::now();
        let root = self.grid.rank() == 0;

        if self.settings.read_freq > 0 && self.reader.is_none() {
            return Err(Error::config("read_freq is set, but no reader was given"));
        }
        if self.phase == Phase::Uninitialized {
            self.init()?;
        }
        if root {
            self.log_setup();
        }

        let write_freq = self.settings.write_freq;
        let read_freq = self.settings.read_freq;
        let cadence = if write_freq > 0 { write_freq } else { SYNC_INTERVAL };
        let mut interrupted = false;

        if write_freq > 0 {
            let layout = self.grid.layout();
            let attributes = self.settings.attributes();
            self.writer.open(&self.settings.output, &layout, &attributes)?;
        }

        while self.iteration < self.settings.steps {
            self.iterate()?;

            if self.iteration % cadence != 0 {
                continue;
            }
            if write_freq > 0 {
                self.write_output()?;
            }
            if read_freq > 0 && self.iteration % read_freq == 0 {
                self.validate_round_trip()?;
            }

            let (sum_u, sum_v) = self.global_sums()?;
            let diagnostics = Diagnostics {
                iteration: self.iteration,
                output_step: self.output_steps,
                sum_u,
                sum_v,
                timings: self.timings.take(),
            };
            if root {
                info!("{}", diagnostics);
            }

            if self.stop_requested()? {
                if root {
                    warn!("interrupted after step {}, stopping all ranks", self.iteration);
                }
                interrupted = true;
                break;
            }
        }

        if write_freq > 0 {
            self.writer.close()?;
        }
        if !interrupted {
            self.phase = Phase::Terminal;
        }

        let (sum_u, sum_v) = self.global_sums()?;
        let elapsed = start.elapsed();

        if self.mailbox.num_pending() > 0 {
            warn!(
                "rank {} finished with {} messages never taken",
                self.grid.rank(),
                self.mailbox.num_pending()
            );
        }

        if root {
            info!("total runtime {:.3} s for {} steps", elapsed.as_secs_f64(), self.iteration);
        }
        Ok(RunSummary {
            iterations: self.iteration,
            output_steps: self.output_steps,
            sum_u,
            sum_v,
            interrupted,
            elapsed,
        })
    }

    fn expect_phase(&self, allowed: &[Phase], operation: &str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::config(format!(
                "{} is not possible in phase {:?}",
                operation, self.phase
            )))
        }
    }

    /// U = 1, V = 0 everywhere, except for a cube of edge 12 centered in the
    /// global domain, where U = 0.25 and V = 0.33.
    fn seed(&mut self) {
        let l = self.settings.l;
        let center = (l / 2).saturating_sub(SEED_HALF_WIDTH)..(l / 2 + SEED_HALF_WIDTH).min(l);
        let [ox, oy, oz] = self.grid.offset();
        let interior = self.field.interior().clone();

        for (x, y, z) in interior.iter() {
            let global = [x as usize + ox, y as usize + oy, z as usize + oz];

            if global.iter().all(|g| center.contains(g)) {
                self.field.set(Species::U, (x, y, z), 0.25);
                self.field.set(Species::V, (x, y, z), 0.33);
            }
        }
    }

    fn load_checkpoint(&mut self, restart: &Restart) -> Result<()> {
        let step = self.read_step(&restart.input, restart.step)?;

        self.field.set_from_noghost(Species::U, &step.u)?;
        self.field.set_from_noghost(Species::V, &step.v)?;
        self.iteration = restart.step;

        if self.settings.write_freq > 0 {
            self.output_steps = restart.step / self.settings.write_freq;
        }
        if self.grid.rank() == 0 {
            info!("restarting from step {} of '{}'", restart.step, restart.input);
        }
        Ok(())
    }

    /// Fetch this rank's block of a written step and check that it is the
    /// step that was asked for.
    fn read_step(&mut self, name: &str, requested: u64) -> Result<StepData> {
        let layout = self.grid.layout();
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::config("reading a step requires a reader"))?;

        reader.open(name, &layout, requested)?;
        let step = reader.read();
        reader.close()?;
        let step = step?;

        if step.iteration != requested {
            return Err(Error::StepMismatch {
                requested,
                found: step.iteration,
            });
        }
        Ok(step)
    }

    fn write_output(&mut self) -> Result<()> {
        let u = self.field.u_noghost();
        let v = self.field.v_noghost();
        let iteration = self.iteration;

        let (result, event) = MetricEvent::time(MetricEvent::Write, || self.writer.write(iteration, &u, &v));
        result?;
        self.timings.record(event);
        self.output_steps += 1;
        Ok(())
    }

    /// Read back the step just written, require it to match the field
    /// bit for bit, and continue from what was read.
    fn validate_round_trip(&mut self) -> Result<()> {
        let requested = self.iteration;
        let output = self.settings.output.clone();

        let (step, event) = MetricEvent::time(MetricEvent::Read, || self.read_step(&output, requested));
        let step = step?;
        self.timings.record(event);

        for (species, read) in [(Species::U, &step.u), (Species::V, &step.v)] {
            let written = self.field.noghost_copy(species);

            if !same_bits(&written, read) {
                return Err(Error::RoundTrip {
                    iteration: requested,
                    msg: format!("{:?} read back differs from what was written", species),
                });
            }
        }
        self.field.set_from_noghost(Species::U, &step.u)?;
        self.field.set_from_noghost(Species::V, &step.v)?;
        self.refresh_ghosts()
    }

    fn refresh_ghosts(&mut self) -> Result<()> {
        let (result, event) = MetricEvent::time(MetricEvent::Exchange, || {
            self.halo.exchange(&mut self.mailbox, &self.grid, &mut self.field)
        });
        result?;
        self.timings.record(event);
        boundary::apply_no_flux(&mut self.field, &self.grid);
        Ok(())
    }

    /// Agree with the other ranks on whether any of them was asked to stop.
    fn stop_requested(&mut self) -> Result<bool> {
        let local = match &self.stop {
            Some(flag) if flag.load(Ordering::Relaxed) => 1.0,
            _ => 0.0,
        };
        let global = self.mailbox.all_reduce_max(vec![local])?;
        Ok(global.first().map_or(false, |&x| x > 0.0))
    }

    fn log_setup(&self) {
        let [npx, npy, npz] = self.grid.dims();
        let [sx, sy, sz] = self.grid.local_size();

        info!("========================================");
        self.settings.log_summary();
        info!("process layout:   {}x{}x{}", npx, npy, npz);
        info!("local grid size:  {}x{}x{}", sx, sy, sz);
        info!("========================================");
        self.settings.warn();
    }
}

fn same_bits(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}
