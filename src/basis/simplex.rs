use ndarray::{Array1, Array2, Array3, ArrayView1};

/// Linear Lagrange basis on the unit simplex in ndim dimensions.
///
/// Reference vertices are the origin followed by the unit vectors, so the
/// barycentric forms are N_0 = 1 - sum(xi) and N_d = xi_{d-1}. Gradients are
/// constant and Hessians vanish; geometric simplex elements above order 1 are
/// not generated.
#[derive(Debug, Clone)]
pub struct SimplexP1 {
    pub ndim: usize,
}

impl SimplexP1 {
    pub fn new(ndim: usize) -> Self {
        Self { ndim }
    }

    pub fn nbasis(&self) -> usize {
        self.ndim + 1
    }

    /// Reference coordinates of the vertex backing basis index ibasis.
    pub fn node(&self, ibasis: usize) -> Array1<f64> {
        let mut pt = Array1::zeros(self.ndim);
        if ibasis > 0 {
            pt[ibasis - 1] = 1.0;
        }
        pt
    }

    pub fn fill_shp(&self, xi: ArrayView1<f64>, shp: &mut Array1<f64>) {
        shp[0] = 1.0 - xi.sum();
        for d in 0..self.ndim {
            shp[d + 1] = xi[d];
        }
    }

    pub fn fill_deriv(&self, _xi: ArrayView1<f64>, deriv: &mut Array2<f64>) {
        deriv.fill(0.0);
        for d in 0..self.ndim {
            deriv[(0, d)] = -1.0;
            deriv[(d + 1, d)] = 1.0;
        }
    }

    pub fn fill_hess(&self, _xi: ArrayView1<f64>, hess: &mut Array3<f64>) {
        hess.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_partition_of_unity() {
        let basis = SimplexP1::new(2);
        let xi = array![0.2, 0.3];
        let mut shp = Array1::zeros(3);
        basis.fill_shp(xi.view(), &mut shp);
        assert!((shp.sum() - 1.0).abs() < 1e-14);
        assert!((shp[0] - 0.5).abs() < 1e-14);
        assert!((shp[1] - 0.2).abs() < 1e-14);
        assert!((shp[2] - 0.3).abs() < 1e-14);
    }

    #[test]
    fn test_kronecker_at_vertices() {
        let basis = SimplexP1::new(3);
        let mut shp = Array1::zeros(4);
        for i in 0..4 {
            basis.fill_shp(basis.node(i).view(), &mut shp);
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((shp[j] - expected).abs() < 1e-14);
            }
        }
    }
}
