//! Errors raised while driving a simulation.

use crate::aggregate::AggregationError;
use crate::patch::PatchPhase;
use crate::solver::SolverError;

/// Errors that can abort a run
#[derive(Debug)]
pub enum SimError {
    /// Invalid or missing configuration
    Config(String),
    /// The solver of a patch failed; fatal, no retry
    Solver { patch: usize, source: SolverError },
    /// A patch's population could not be reduced
    Aggregation { patch: usize, source: AggregationError },
    /// A patch was driven out of order
    Lifecycle {
        patch: usize,
        expected: PatchPhase,
        found: PatchPhase,
    },
    /// Writing output failed
    Io(std::io::Error),
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Solver { patch, source } => write!(f, "Patch {}: {}", patch, source),
            Self::Aggregation { patch, source } => {
                write!(f, "Patch {}: aggregation failed: {}", patch, source)
            }
            Self::Lifecycle {
                patch,
                expected,
                found,
            } => write!(
                f,
                "Patch {}: expected phase {:?}, found {:?}",
                patch, expected, found
            ),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Solver { source, .. } => Some(source),
            Self::Aggregation { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
