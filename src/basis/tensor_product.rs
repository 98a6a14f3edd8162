use ndarray::{Array1, Array2, Array3, ArrayView1};

use crate::basis::lagrange1d::UniformLagrange1d;

/// Q-type tensor product of a 1D nodal basis over an ndim hypercube.
///
/// Multi-indices are enumerated lexicographically with the last dimension
/// fastest; `strides[d] = nbasis_1d^(ndim - 1 - d)`.
#[derive(Debug, Clone)]
pub struct QTypeProduct {
    pub ndim: usize,
    pub basis1d: UniformLagrange1d,
    /// per-basis multi-index, row ibasis gives (i_0, ..., i_{ndim-1})
    pub ijk: Array2<usize>,
    pub strides: Vec<usize>,
}

impl QTypeProduct {
    pub fn new(ndim: usize, pn: usize) -> Self {
        let basis1d = UniformLagrange1d::new(pn);
        let nbasis_1d = basis1d.nbasis();
        let nvalues = nbasis_1d.pow(ndim as u32);

        let mut strides = vec![1usize; ndim];
        for d in (0..ndim.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * nbasis_1d;
        }

        let mut ijk = Array2::zeros((nvalues, ndim));
        for ibasis in 0..nvalues {
            let mut rem = ibasis;
            for d in 0..ndim {
                ijk[(ibasis, d)] = rem / strides[d];
                rem %= strides[d];
            }
        }

        Self {
            ndim,
            basis1d,
            ijk,
            strides,
        }
    }

    pub fn nbasis(&self) -> usize {
        self.basis1d.nbasis().pow(self.ndim as u32)
    }

    /// Flatten a multi-index to the 1d basis index.
    pub fn convert_ijk(&self, ijk: &[usize]) -> usize {
        ijk.iter()
            .zip(&self.strides)
            .map(|(&i, &s)| i * s)
            .sum()
    }

    /// Reference coordinates of the Lagrange node for basis index ibasis.
    pub fn node(&self, ibasis: usize) -> Array1<f64> {
        let mut pt = Array1::zeros(self.ndim);
        for d in 0..self.ndim {
            pt[d] = self.basis1d.xi_nodes[self.ijk[(ibasis, d)]];
        }
        pt
    }

    /// Shape function values at the reference point xi.
    pub fn fill_shp(&self, xi: ArrayView1<f64>, shp: &mut Array1<f64>) {
        let nvalues = self.nbasis();
        debug_assert_eq!(shp.len(), nvalues);

        if self.ndim == 0 {
            shp[0] = 1.0;
            return;
        }

        // per-axis 1d evaluations computed once
        let axis_evals: Vec<Array1<f64>> = (0..self.ndim)
            .map(|d| self.basis1d.eval_all(xi[d]))
            .collect();

        // fencepost: broadcast axis 0 into blocks of stride[0]
        let nbasis_1d = self.basis1d.nbasis();
        let nfill = self.strides[0];
        for i0 in 0..nbasis_1d {
            let v = axis_evals[0][i0];
            for ifill in 0..nfill {
                shp[i0 * nfill + ifill] = v;
            }
        }

        // multiply remaining axes in place
        for d in 1..self.ndim {
            let cyclesize = self.strides[d - 1];
            let nfill = self.strides[d];
            let nrepeat = nvalues / cyclesize;
            for irep in 0..nrepeat {
                for ib in 0..nbasis_1d {
                    let v = axis_evals[d][ib];
                    let start = irep * cyclesize + ib * nfill;
                    for ifill in 0..nfill {
                        shp[start + ifill] *= v;
                    }
                }
            }
        }
    }

    /// Gradients d B_i / d xi_j at the reference point, shape (nbasis, ndim).
    pub fn fill_deriv(&self, xi: ArrayView1<f64>, deriv: &mut Array2<f64>) {
        let nvalues = self.nbasis();
        debug_assert_eq!(deriv.dim(), (nvalues, self.ndim));

        if self.ndim == 0 {
            deriv.fill(0.0);
            return;
        }

        let mut axis_evals = Vec::with_capacity(self.ndim);
        let mut axis_derivs = Vec::with_capacity(self.ndim);
        for d in 0..self.ndim {
            let (nj, dnj) = self.basis1d.deriv_all(xi[d]);
            axis_evals.push(nj);
            axis_derivs.push(dnj);
        }

        let nbasis_1d = self.basis1d.nbasis();

        // fencepost axis 0: derivative column 0 seeded with e'_0,
        // the rest with e_0
        let nfill = self.strides[0];
        for i0 in 0..nbasis_1d {
            for ifill in 0..nfill {
                let row = i0 * nfill + ifill;
                deriv[(row, 0)] = axis_derivs[0][i0];
                for j in 1..self.ndim {
                    deriv[(row, j)] = axis_evals[0][i0];
                }
            }
        }

        for d in 1..self.ndim {
            let cyclesize = self.strides[d - 1];
            let nfill = self.strides[d];
            let nrepeat = nvalues / cyclesize;
            for irep in 0..nrepeat {
                for ib in 0..nbasis_1d {
                    let start = irep * cyclesize + ib * nfill;
                    for ifill in 0..nfill {
                        let row = start + ifill;
                        for j in 0..self.ndim {
                            if j == d {
                                deriv[(row, j)] *= axis_derivs[d][ib];
                            } else {
                                deriv[(row, j)] *= axis_evals[d][ib];
                            }
                        }
                    }
                }
            }
        }
    }

    /// Hessians d^2 B_i / d xi_j d xi_k, shape (nbasis, ndim, ndim),
    /// symmetric in the last two indices.
    pub fn fill_hess(&self, xi: ArrayView1<f64>, hess: &mut Array3<f64>) {
        let nvalues = self.nbasis();
        debug_assert_eq!(hess.dim(), (nvalues, self.ndim, self.ndim));

        if self.ndim == 0 {
            hess.fill(0.0);
            return;
        }

        let mut axis_evals = Vec::with_capacity(self.ndim);
        let mut axis_derivs = Vec::with_capacity(self.ndim);
        let mut axis_d2s = Vec::with_capacity(self.ndim);
        for d in 0..self.ndim {
            let (nj, dnj, d2nj) = self.basis1d.d2_all(xi[d]);
            axis_evals.push(nj);
            axis_derivs.push(dnj);
            axis_d2s.push(d2nj);
        }

        hess.fill(1.0);
        for ibasis in 0..nvalues {
            for i in 0..self.ndim {
                for j in i..self.ndim {
                    for d in 0..self.ndim {
                        let idx1d = self.ijk[(ibasis, d)];
                        let factor = if i == j {
                            if d == i {
                                axis_d2s[d][idx1d]
                            } else {
                                axis_evals[d][idx1d]
                            }
                        } else if d == i {
                            axis_derivs[d][idx1d]
                        } else if d == j {
                            axis_derivs[d][idx1d]
                        } else {
                            axis_evals[d][idx1d]
                        };
                        hess[(ibasis, i, j)] *= factor;
                    }
                }
            }
            // mirror the lower triangle
            for i in 0..self.ndim {
                for j in 0..i {
                    hess[(ibasis, i, j)] = hess[(ibasis, j, i)];
                }
            }
        }
    }
}
