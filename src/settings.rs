use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What lies beyond the faces of the global domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// No wraparound: edge ranks have no neighbor there, and the ghost face
    /// is filled by the no-flux boundary pass instead.
    Open,
    /// The domain wraps around on every axis.
    Periodic,
}

impl Default for Boundary {
    fn default() -> Self {
        Boundary::Open
    }
}

/// Where to resume a run from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restart {
    pub input: String,
    pub step: u64,
}

/// Run parameters, loaded once and then shared read-only by every component.
/// Field names in the JSON file follow the Gray-Scott tutorial schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Global grid edge length
    #[serde(rename = "L")]
    pub l: usize,
    pub steps: u64,
    /// Write output every this many steps (0 disables output)
    #[serde(rename = "plotgap", alias = "write_freq")]
    pub write_freq: u64,
    /// Read back and validate every this many steps (0 disables)
    pub read_freq: u64,
    #[serde(rename = "F")]
    pub f: f64,
    pub k: f64,
    pub dt: f64,
    #[serde(rename = "Du")]
    pub du: f64,
    #[serde(rename = "Dv")]
    pub dv: f64,
    pub noise: f64,
    pub output: String,
    pub boundary: Boundary,
    /// Requested process grid; zero entries are chosen automatically
    pub process_dims: [usize; 3],
    pub seed: Option<u64>,
    pub restart: Option<Restart>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            l: 128,
            steps: 20000,
            write_freq: 200,
            read_freq: 0,
            f: 0.04,
            k: 0.06075,
            dt: 0.2,
            du: 0.05,
            dv: 0.1,
            noise: 0.0,
            output: "gs.out".to_string(),
            boundary: Boundary::Open,
            process_dims: [0; 3],
            seed: None,
            restart: None,
        }
    }
}

impl Settings {
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(reader)
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let settings: Settings = serde_json::from_reader(reader)?;
        Ok(settings)
    }

    /// Reject settings that can not produce a run. Every rank performs the
    /// same checks on the same data, so all of them fail together before any
    /// collective operation is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.l == 0 {
            return Err(Error::config("grid length L must be > 0"));
        }
        if !(self.dt > 0.0) {
            return Err(Error::config("time step dt must be > 0"));
        }
        if self.du < 0.0 || self.dv < 0.0 {
            return Err(Error::config("diffusion rates Du and Dv must be >= 0"));
        }
        if self.f < 0.0 || self.k < 0.0 {
            return Err(Error::config("feed rate F and kill rate k must be >= 0"));
        }
        if self.noise < 0.0 {
            return Err(Error::config("noise amplitude must be >= 0"));
        }
        if self.read_freq > 0 {
            if self.write_freq == 0 {
                return Err(Error::config("read_freq requires a non-zero write frequency (plotgap)"));
            }
            if self.read_freq % self.write_freq != 0 {
                return Err(Error::config(format!(
                    "read_freq ({}) must be a multiple of the write frequency ({})",
                    self.read_freq, self.write_freq
                )));
            }
        }
        if let Some(restart) = &self.restart {
            if restart.step > self.steps {
                return Err(Error::config(format!(
                    "restart step {} is beyond the final step {}",
                    restart.step, self.steps
                )));
            }
        }
        Ok(())
    }

    /// Warn about settings that are legal but probably not what was meant.
    pub fn warn(&self) {
        let max_stable_dt = 1.0 / (6.0 * self.du.max(self.dv));

        if self.dt > max_stable_dt {
            warn!(
                "time step {} exceeds the explicit stability limit {:.4}; expect the solution to blow up",
                self.dt, max_stable_dt
            );
        }
        if self.f > 0.1 || self.k > 0.1 {
            warn!("F and k values above 0.1 might not produce typical Turing patterns");
        }
    }

    /// Reaction constants recorded alongside the output.
    pub fn attributes(&self) -> crate::io::Attributes {
        crate::io::Attributes {
            f: self.f,
            k: self.k,
            dt: self.dt,
            du: self.du,
            dv: self.dv,
            noise: self.noise,
        }
    }

    pub fn log_summary(&self) {
        info!("grid:             {}x{}x{}", self.l, self.l, self.l);
        info!("steps:            {}", self.steps);
        info!("plotgap:          {}", self.write_freq);
        info!("read_freq:        {}", self.read_freq);
        info!("F:                {}", self.f);
        info!("k:                {}", self.k);
        info!("dt:               {}", self.dt);
        info!("Du:               {}", self.du);
        info!("Dv:               {}", self.dv);
        info!("noise:            {}", self.noise);
        info!("output:           {}", self.output);
        info!("boundary:         {:?}", self.boundary);
    }
}
