use thiserror::Error;

/// Errors surfaced by the discretization and solvers.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("non-finite residual encountered at iteration {iter}")]
    NonFiniteResidual { iter: usize },

    #[error("linear solver failed to converge: {0}")]
    LinearSolve(String),

    #[error("line search failed to find sufficient decrease within {max_iter} iterations")]
    LineSearchFailure { max_iter: usize },

    #[error("boundary condition {bc:?} requires a callback the flux does not implement")]
    MissingBcImplementation { bc: crate::geometry::BoundaryCondition },

    #[error("fatal anomalies recorded during assembly: {0}")]
    Anomalies(String),
}

/// Severity of a recorded anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub severity: Severity,
    pub message: String,
}

/// Error sink threaded through assembly by the caller.
///
/// Anomalies accumulate during a sweep and are drained at safe points
/// (end of assembly, end of a solver iteration) so diagnostics can complete
/// before any fatal condition terminates the run.
#[derive(Debug, Default)]
pub struct AnomalyLog {
    entries: Vec<Anomaly>,
}

impl AnomalyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.entries.push(Anomaly {
            severity: Severity::Warning,
            message,
        });
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{message}");
        self.entries.push(Anomaly {
            severity: Severity::Fatal,
            message,
        });
    }

    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(|a| a.severity == Severity::Fatal)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain all recorded anomalies, returning an error if any was fatal.
    pub fn drain(&mut self) -> Result<Vec<Anomaly>, SolverError> {
        let entries = std::mem::take(&mut self.entries);
        if entries.iter().any(|a| a.severity == Severity::Fatal) {
            let msg = entries
                .iter()
                .filter(|a| a.severity == Severity::Fatal)
                .map(|a| a.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            Err(SolverError::Anomalies(msg))
        } else {
            Ok(entries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_clears_entries() {
        let mut anomalies = AnomalyLog::new();
        anomalies.warn("minor issue");
        assert!(!anomalies.is_empty());
        let drained = anomalies.drain().unwrap();
        assert_eq!(drained.len(), 1);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_fatal_fails_drain() {
        let mut anomalies = AnomalyLog::new();
        anomalies.warn("minor issue");
        anomalies.fatal("boundary condition not implemented");
        assert!(anomalies.has_fatal());
        assert!(anomalies.drain().is_err());
    }
}
