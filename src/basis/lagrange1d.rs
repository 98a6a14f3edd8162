use ndarray::{Array1, Array2};

/// Lagrange interpolation on Pn + 1 uniformly spaced nodes in [-1, 1].
///
/// Pn = 0 degenerates to the single node at 0 (finite volume recovers the
/// cell center). Barycentric weights are computed once at construction so
/// evaluation uses the second barycentric form.
#[derive(Debug, Clone)]
pub struct UniformLagrange1d {
    pub pn: usize,
    pub xi_nodes: Array1<f64>,
    /// barycentric weights w_j = 1 / prod_{k != j} (xi_j - xi_k)
    pub weights: Array1<f64>,
}

impl UniformLagrange1d {
    pub fn new(pn: usize) -> Self {
        let nbasis = pn + 1;
        let mut xi_nodes = Array1::zeros(nbasis);
        if pn == 0 {
            xi_nodes[0] = 0.0;
        } else {
            let dx = 2.0 / pn as f64;
            xi_nodes[0] = -1.0;
            for j in 1..nbasis {
                // incremental sum behaves better than j * dx
                xi_nodes[j] = xi_nodes[j - 1] + dx;
            }
        }

        let mut weights = Array1::ones(nbasis);
        for j in 0..nbasis {
            for k in 0..nbasis {
                if k != j {
                    weights[j] *= xi_nodes[j] - xi_nodes[k];
                }
            }
            weights[j] = 1.0 / weights[j];
        }

        Self {
            pn,
            xi_nodes,
            weights,
        }
    }

    pub fn nbasis(&self) -> usize {
        self.pn + 1
    }

    /// Index of the node closest to xi by the bisector test.
    ///
    /// Splitting the product around this node avoids 0/0 when xi sits on
    /// (or near) an interpolation node.
    fn pivot(&self, xi: f64) -> usize {
        let mut k = 0;
        while k < self.pn {
            if xi >= 0.5 * (self.xi_nodes[k] + self.xi_nodes[k + 1]) {
                k += 1;
            } else {
                break;
            }
        }
        k
    }

    /// Evaluate every interpolating polynomial at xi.
    pub fn eval_all(&self, xi: f64) -> Array1<f64> {
        let nbasis = self.nbasis();
        let mut nj = Array1::zeros(nbasis);

        if self.pn == 0 {
            nj[0] = 1.0;
        } else if self.pn == 1 {
            // closed forms avoid the tiny roundoff of the general path
            nj[0] = 0.5 * (1.0 - xi);
            nj[1] = 1.0 - nj[0];
        } else {
            let k = self.pivot(xi);

            // product of differences skipping the pivot node
            let mut lskip = 1.0;
            for j in 0..nbasis {
                if j != k {
                    lskip *= xi - self.xi_nodes[j];
                }
            }
            let lprod = lskip * (xi - self.xi_nodes[k]);

            for j in 0..nbasis {
                if j == k {
                    nj[j] = lskip * self.weights[j];
                } else {
                    nj[j] = lprod * self.weights[j] / (xi - self.xi_nodes[j]);
                }
            }
        }
        nj
    }

    /// Evaluate every polynomial and its first derivative at xi.
    pub fn deriv_all(&self, xi: f64) -> (Array1<f64>, Array1<f64>) {
        let nbasis = self.nbasis();
        let mut nj = Array1::zeros(nbasis);
        let mut dnj = Array1::zeros(nbasis);

        if self.pn == 0 {
            nj[0] = 1.0;
        } else if self.pn == 1 {
            nj[0] = 0.5 * (1.0 - xi);
            nj[1] = 1.0 - nj[0];
            dnj[0] = -0.5;
            dnj[1] = 0.5;
        } else {
            let k = self.pivot(xi);

            let mut lskip = 1.0;
            for j in 0..nbasis {
                if j != k {
                    lskip *= xi - self.xi_nodes[j];
                }
            }
            let lprod = lskip * (xi - self.xi_nodes[k]);

            // sum of inverse differences neglecting the pivot,
            // N_j in the same sweep
            let mut s = 0.0;
            for j in 0..nbasis {
                if j == k {
                    nj[j] = lskip * self.weights[j];
                } else {
                    let inv_diff = 1.0 / (xi - self.xi_nodes[j]);
                    s += inv_diff;
                    nj[j] = lprod * inv_diff * self.weights[j];
                }
            }

            // L'(xi) by the product-sum identity
            let lprime = lprod * s + lskip;

            for j in 0..nbasis {
                if j == k {
                    dnj[j] = s * nj[j];
                } else {
                    // quotient rule
                    dnj[j] = (lprime * self.weights[j] - nj[j]) / (xi - self.xi_nodes[j]);
                }
            }
        }
        (nj, dnj)
    }

    /// Evaluate values, first and second derivatives at xi.
    ///
    /// Second derivatives use the generic differentiation sum over node
    /// pairs; values and first derivatives reuse the barycentric path.
    pub fn d2_all(&self, xi: f64) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let (nj, dnj) = self.deriv_all(xi);
        let nbasis = self.nbasis();
        let mut d2nj = Array1::zeros(nbasis);

        if self.pn >= 2 {
            for j in 0..nbasis {
                // L_j''(xi) = sum_{k != j} sum_{l != j, l != k}
                //             prod_{m != j,k,l} (xi - xi_m) / prod_{m != j} (xi_j - xi_m)
                let mut outer = 0.0;
                for k in 0..nbasis {
                    if k == j {
                        continue;
                    }
                    for l in 0..nbasis {
                        if l == j || l == k {
                            continue;
                        }
                        let mut product = 1.0;
                        for m in 0..nbasis {
                            if m != j && m != k && m != l {
                                product *= xi - self.xi_nodes[m];
                            }
                        }
                        outer += product;
                    }
                }
                d2nj[j] = outer * self.weights[j];
            }
        }
        (nj, dnj, d2nj)
    }

    /// Tabulate values at many points, one row per point.
    pub fn tabulate(&self, points: &[f64]) -> Array2<f64> {
        let mut table = Array2::zeros((points.len(), self.nbasis()));
        for (ipt, &xi) in points.iter().enumerate() {
            table.row_mut(ipt).assign(&self.eval_all(xi));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_of_unity() {
        for pn in 0..=8 {
            let basis = UniformLagrange1d::new(pn);
            for &xi in &[-1.0, -0.73, -0.25, 0.0, 0.31, 0.25, 0.99, 1.0] {
                let nj = basis.eval_all(xi);
                let sum: f64 = nj.sum();
                assert!(
                    (sum - 1.0).abs() < 1e-12,
                    "pn={pn} xi={xi} sum={sum}"
                );
            }
        }
    }

    #[test]
    fn test_kronecker_property() {
        for pn in 1..=6 {
            let basis = UniformLagrange1d::new(pn);
            for j in 0..=pn {
                let nj = basis.eval_all(basis.xi_nodes[j]);
                for i in 0..=pn {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((nj[i] - expected).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_p3_at_quarter() {
        // sum to one and delta property at xi = 0.25 for a cubic
        let basis = UniformLagrange1d::new(3);
        let nj = basis.eval_all(0.25);
        assert!((nj.sum() - 1.0).abs() < 1e-12);

        // interpolate p(x) = x^3 exactly
        let mut interp = 0.0;
        for j in 0..4 {
            interp += basis.xi_nodes[j].powi(3) * nj[j];
        }
        assert!((interp - 0.25f64.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn test_p0_is_constant() {
        let basis = UniformLagrange1d::new(0);
        let (nj, dnj) = basis.deriv_all(0.7);
        assert_eq!(nj[0], 1.0);
        assert_eq!(dnj[0], 0.0);
    }

    #[test]
    fn test_p1_closed_forms() {
        let basis = UniformLagrange1d::new(1);
        let (nj, dnj) = basis.deriv_all(0.3);
        assert!((nj[0] - 0.35).abs() < 1e-14);
        assert!((nj[1] - 0.65).abs() < 1e-14);
        assert!((dnj[0] + 0.5).abs() < 1e-14);
        assert!((dnj[1] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn test_derivative_against_finite_difference() {
        let basis = UniformLagrange1d::new(4);
        let h = 1e-6;
        for &xi in &[-0.9, -0.3, 0.12, 0.68] {
            let (_, dnj) = basis.deriv_all(xi);
            let np = basis.eval_all(xi + h);
            let nm = basis.eval_all(xi - h);
            for j in 0..basis.nbasis() {
                let fd = (np[j] - nm[j]) / (2.0 * h);
                assert!(
                    (dnj[j] - fd).abs() < 1e-7,
                    "j={j} xi={xi} exact={} fd={fd}",
                    dnj[j]
                );
            }
        }
    }

    #[test]
    fn test_second_derivative_against_finite_difference() {
        let basis = UniformLagrange1d::new(5);
        let h = 1e-4;
        for &xi in &[-0.77, 0.05, 0.51] {
            let (_, _, d2nj) = basis.d2_all(xi);
            let np = basis.eval_all(xi + h);
            let n0 = basis.eval_all(xi);
            let nm = basis.eval_all(xi - h);
            for j in 0..basis.nbasis() {
                let fd = (np[j] - 2.0 * n0[j] + nm[j]) / (h * h);
                assert!(
                    (d2nj[j] - fd).abs() < 1e-4 * (1.0 + d2nj[j].abs()),
                    "j={j} xi={xi} exact={} fd={fd}",
                    d2nj[j]
                );
            }
        }
    }
}
