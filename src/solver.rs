pub mod gauss_newton;
pub mod linear;
pub mod linesearch;

/// Convergence thresholds and iteration cap for the nonlinear solvers.
#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    pub tau_abs: f64,
    pub tau_rel: f64,
    pub kmax: usize,
    /// reference residual norm, set from the first assembly
    pub r0: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            tau_abs: 1e-8,
            tau_rel: 1e-8,
            kmax: 100,
            r0: 1.0,
        }
    }
}

impl ConvergenceCriteria {
    pub fn done(&self, rk: f64) -> bool {
        rk <= self.tau_abs + self.tau_rel * self.r0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_thresholds() {
        let criteria = ConvergenceCriteria {
            tau_abs: 1e-10,
            tau_rel: 1e-6,
            kmax: 50,
            r0: 100.0,
        };
        assert!(!criteria.done(1.0));
        assert!(criteria.done(1e-5));
        assert!(criteria.done(9e-5));
        assert!(!criteria.done(2e-4));
    }
}
