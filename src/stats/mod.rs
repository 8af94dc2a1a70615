use std::time::{Duration, Instant};

use serde::Serialize;

/// Something worth timing within one iteration.
#[derive(Clone, Copy, Debug)]
pub enum MetricEvent {
    Compute(Duration),
    Exchange(Duration),
    Write(Duration),
    Read(Duration),
}

impl MetricEvent {
    /// Time `f` and wrap the elapsed time with `event`.
    pub fn time<T>(event: fn(Duration) -> MetricEvent, f: impl FnOnce() -> T) -> (T, MetricEvent) {
        let start = Instant::now();
        let result = f();
        (result, event(start.elapsed()))
    }
}

/// Accumulated wall-clock time per activity, reset by whoever reports it.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Timings {
    pub compute: Duration,
    pub exchange: Duration,
    pub write: Duration,
    pub read: Duration,
    pub iterations: u64,
}

impl Timings {
    pub fn record(&mut self, event: MetricEvent) {
        match event {
            MetricEvent::Compute(d) => self.compute += d,
            MetricEvent::Exchange(d) => self.exchange += d,
            MetricEvent::Write(d) => self.write += d,
            MetricEvent::Read(d) => self.read += d,
        }
    }

    /// Mark the end of one iteration.
    pub fn tick(&mut self) {
        self.iterations += 1;
    }

    /// Return the accumulated timings and start over.
    pub fn take(&mut self) -> Timings {
        std::mem::take(self)
    }

    pub fn ms(d: Duration) -> f64 {
        d.as_secs_f64() * 1e3
    }
}

/// What rank 0 reports at each output step. The sums are global.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub iteration: u64,
    pub output_step: u64,
    pub sum_u: f64,
    pub sum_v: f64,
    pub timings: Timings,
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let t = &self.timings;
        write!(
            f,
            "[{:>8}] output step {:<5} compute {:>9.3} ms  exchange {:>9.3} ms  write {:>9.3} ms  sum(U)={:.9e} sum(V)={:.9e}",
            self.iteration,
            self.output_step,
            Timings::ms(t.compute),
            Timings::ms(t.exchange),
            Timings::ms(t.write),
            self.sum_u,
            self.sum_v,
        )
    }
}
