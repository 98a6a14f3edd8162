/// Line search strategies over the merit function m(alpha) = |R(z - alpha dz)|.
///
/// All searches return the accepted step and whether sufficient decrease was
/// found; on failure the caller falls back to alpha_min and continues.
#[derive(Debug, Clone)]
pub enum LineSearch {
    /// always take the full step
    None,
    /// backtracking with Wolfe sufficient-decrease and curvature checks
    Wolfe {
        kmax: usize,
        alpha_initial: f64,
        alpha_max: f64,
        alpha_min: f64,
        c1: f64,
        c2: f64,
    },
    /// Armijo backtracking with cubic interpolation of the step
    CubicBacktracking {
        kmax: usize,
        alpha_initial: f64,
        alpha_min: f64,
        c1: f64,
    },
    /// monotone shrink: halve until the merit decreases
    Corrigan {
        kmax: usize,
        alpha_initial: f64,
        alpha_min: f64,
    },
}

impl Default for LineSearch {
    fn default() -> Self {
        LineSearch::None
    }
}

impl LineSearch {
    /// Run the search on the merit function. Returns (alpha, found_decrease).
    pub fn search<F: FnMut(f64) -> f64>(&self, mut merit: F) -> (f64, bool) {
        match *self {
            LineSearch::None => (1.0, true),

            LineSearch::Corrigan {
                kmax,
                alpha_initial,
                alpha_min,
            } => {
                let m0 = merit(0.0);
                let mut alpha = alpha_initial;
                for _ in 0..kmax {
                    if merit(alpha) < m0 {
                        return (alpha, true);
                    }
                    alpha *= 0.5;
                    if alpha < alpha_min {
                        break;
                    }
                }
                (alpha_min, false)
            }

            LineSearch::CubicBacktracking {
                kmax,
                alpha_initial,
                alpha_min,
                c1,
            } => {
                let m0 = merit(0.0);
                // one-sided slope estimate at zero
                let h = 1e-6 * alpha_initial.max(1e-12);
                let g0 = (merit(h) - m0) / h;

                let mut alpha = alpha_initial;
                let mut alpha_prev = 0.0;
                let mut m_prev = m0;
                for _ in 0..kmax {
                    let m_alpha = merit(alpha);
                    if m_alpha <= m0 + c1 * alpha * g0 || m_alpha < m0 {
                        return (alpha, true);
                    }
                    // cubic model through (0, m0, g0), (alpha_prev, m_prev),
                    // (alpha, m_alpha); degenerate cases fall back to halving
                    let alpha_next = if alpha_prev > 0.0 {
                        cubic_minimizer(m0, g0, alpha_prev, m_prev, alpha, m_alpha)
                            .unwrap_or(0.5 * alpha)
                    } else {
                        // first backtrack: quadratic model
                        let denom = 2.0 * (m_alpha - m0 - g0 * alpha);
                        if denom.abs() > 1e-300 {
                            (-g0 * alpha * alpha / denom).clamp(0.1 * alpha, 0.5 * alpha)
                        } else {
                            0.5 * alpha
                        }
                    };
                    alpha_prev = alpha;
                    m_prev = m_alpha;
                    let upper = 0.9 * alpha;
                    if upper <= alpha_min {
                        break;
                    }
                    alpha = alpha_next.clamp(alpha_min, upper);
                }
                (alpha_min, false)
            }

            LineSearch::Wolfe {
                kmax,
                alpha_initial,
                alpha_max,
                alpha_min,
                c1,
                c2,
            } => {
                let m0 = merit(0.0);
                let h = 1e-6 * alpha_initial.max(1e-12);
                let g0 = (merit(h) - m0) / h;

                let mut lo = 0.0;
                let mut hi = alpha_max;
                let mut alpha = alpha_initial.min(alpha_max);
                let mut best = (alpha_min, false);
                for _ in 0..kmax {
                    let m_alpha = merit(alpha);
                    if m_alpha > m0 + c1 * alpha * g0 {
                        // too long
                        hi = alpha;
                    } else {
                        best = (alpha, true);
                        // curvature check with a forward slope estimate
                        let g_alpha = (merit(alpha + h) - m_alpha) / h;
                        if g_alpha.abs() <= c2 * g0.abs() {
                            return (alpha, true);
                        }
                        if g_alpha > 0.0 {
                            hi = alpha;
                        } else {
                            lo = alpha;
                        }
                    }
                    alpha = if hi < alpha_max {
                        0.5 * (lo + hi)
                    } else {
                        2.0 * alpha
                    };
                    alpha = alpha.clamp(alpha_min, alpha_max);
                }
                best
            }
        }
    }
}

/// Minimizer of the cubic interpolating (0, m0) with slope g0 and the two
/// trial pairs; None when the model has no interior minimum.
fn cubic_minimizer(
    m0: f64,
    g0: f64,
    a1: f64,
    m1: f64,
    a2: f64,
    m2: f64,
) -> Option<f64> {
    // fit m(a) = m0 + g0 a + b a^2 + c a^3
    let r1 = m1 - m0 - g0 * a1;
    let r2 = m2 - m0 - g0 * a2;
    let det = a1 * a1 * a2 * a2 * (a2 - a1);
    if det.abs() < 1e-300 {
        return None;
    }
    let b = (a2 * a2 * a2 * r1 - a1 * a1 * a1 * r2) / det;
    let c = (a1 * a1 * r2 - a2 * a2 * r1) / det;
    if c.abs() < 1e-300 {
        // quadratic
        if b > 0.0 {
            return Some(-g0 / (2.0 * b));
        }
        return None;
    }
    let disc = b * b - 3.0 * c * g0;
    if disc < 0.0 {
        return None;
    }
    let root = (-b + disc.sqrt()) / (3.0 * c);
    (root > 0.0).then_some(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_takes_full_step() {
        let (alpha, ok) = LineSearch::None.search(|_| 0.0);
        assert_eq!(alpha, 1.0);
        assert!(ok);
    }

    #[test]
    fn test_corrigan_halves_until_decrease() {
        // merit decreases only for small steps
        let search = LineSearch::Corrigan {
            kmax: 20,
            alpha_initial: 1.0,
            alpha_min: 1e-8,
        };
        let merit = |alpha: f64| (alpha - 0.1) * (alpha - 0.1);
        let (alpha, ok) = search.search(merit);
        assert!(ok);
        assert!(merit(alpha) < merit(0.0));
    }

    #[test]
    fn test_corrigan_fails_on_increasing_merit() {
        let search = LineSearch::Corrigan {
            kmax: 5,
            alpha_initial: 1.0,
            alpha_min: 1e-3,
        };
        // any positive step increases the merit
        let (alpha, ok) = search.search(|alpha| alpha);
        assert!(!ok);
        assert_eq!(alpha, 1e-3);
    }

    #[test]
    fn test_cubic_finds_quadratic_minimum() {
        let search = LineSearch::CubicBacktracking {
            kmax: 30,
            alpha_initial: 1.0,
            alpha_min: 1e-10,
            c1: 1e-4,
        };
        let merit = |alpha: f64| 1.0 + (alpha - 0.3) * (alpha - 0.3);
        let (alpha, ok) = search.search(merit);
        assert!(ok);
        assert!(merit(alpha) < merit(0.0));
    }

    #[test]
    fn test_wolfe_accepts_decreasing_step() {
        let search = LineSearch::Wolfe {
            kmax: 30,
            alpha_initial: 1.0,
            alpha_max: 4.0,
            alpha_min: 1e-10,
            c1: 1e-4,
            c2: 0.9,
        };
        let merit = |alpha: f64| (alpha - 1.0) * (alpha - 1.0);
        let (alpha, ok) = search.search(merit);
        assert!(ok);
        assert!(merit(alpha) < merit(0.0));
    }
}
