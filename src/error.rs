use thiserror::Error;

use crate::index_space::Axis;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure in this crate is fatal for the run. The variants are grouped
/// by who is to blame: the configuration, the transport, or an I/O
/// collaborator that failed to hand back what it was given.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid decomposition (np={procs}, dims={dims:?}): {msg}")]
    Decomposition {
        procs: usize,
        dims: [usize; 3],
        msg: String,
    },

    #[error("grid length {length} is not divisible by {procs} processes along {axis:?}")]
    GridNotDivisible {
        axis: Axis,
        length: usize,
        procs: usize,
    },

    #[error("communication failure: {0}")]
    Communication(String),

    #[error("message codec failure: {0}")]
    Codec(String),

    #[error("message size mismatch: expected {expected} values, received {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("run aborted by a peer rank")]
    Aborted,

    #[error("reader returned step {found}, but step {requested} was requested")]
    StepMismatch { requested: u64, found: u64 },

    #[error("round trip of step {iteration} failed: {msg}")]
    RoundTrip { iteration: u64, msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn communication(msg: impl Into<String>) -> Self {
        Error::Communication(msg.into())
    }

    pub fn codec(msg: impl ToString) -> Self {
        Error::Codec(msg.to_string())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Decomposition { .. }
                | Error::GridNotDivisible { .. }
                | Error::Json(_)
        )
    }

    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Error::Communication(_) | Error::Codec(_) | Error::SizeMismatch { .. } | Error::Aborted
        )
    }

    pub fn is_round_trip(&self) -> bool {
        matches!(self, Error::StepMismatch { .. } | Error::RoundTrip { .. })
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn errors_are_classified_by_origin() {
        let e = Error::GridNotDivisible {
            axis: Axis::X,
            length: 10,
            procs: 3,
        };
        assert!(e.is_configuration());
        assert!(!e.is_communication());

        assert!(Error::Aborted.is_communication());
        assert!(Error::StepMismatch { requested: 100, found: 99 }.is_round_trip());
        assert!(!Error::StepMismatch { requested: 100, found: 99 }.is_configuration());
    }

    #[test]
    fn step_mismatch_message_names_both_steps() {
        let e = Error::StepMismatch { requested: 100, found: 90 };
        let text = e.to_string();
        assert!(text.contains("100") && text.contains("90"));
    }
}
