pub mod lagrange1d;
pub mod simplex;
pub mod tensor_product;

use ndarray::{Array1, Array2, Array3, ArrayView1};

use crate::basis::simplex::SimplexP1;
use crate::basis::tensor_product::QTypeProduct;
use crate::error::SolverError;
use crate::geometry::DomainType;

/// Nodal basis over a reference domain, tagged by domain type.
///
/// All instances for the same (domain, order, ndim) key are interchangeable;
/// the finite element space shares one per key through its evaluation cache.
#[derive(Debug, Clone)]
pub enum Basis {
    Hypercube(QTypeProduct),
    Simplex(SimplexP1),
}

impl Basis {
    pub fn new(domain: DomainType, ndim: usize, order: usize) -> Result<Self, SolverError> {
        match domain {
            DomainType::Hypercube => Ok(Basis::Hypercube(QTypeProduct::new(ndim, order))),
            DomainType::Simplex => {
                if order > 1 {
                    return Err(SolverError::Config(format!(
                        "simplex basis order {order} not supported (max 1)"
                    )));
                }
                Ok(Basis::Simplex(SimplexP1::new(ndim)))
            }
        }
    }

    pub fn domain_type(&self) -> DomainType {
        match self {
            Basis::Hypercube(_) => DomainType::Hypercube,
            Basis::Simplex(_) => DomainType::Simplex,
        }
    }

    pub fn ndim(&self) -> usize {
        match self {
            Basis::Hypercube(b) => b.ndim,
            Basis::Simplex(b) => b.ndim,
        }
    }

    pub fn nbasis(&self) -> usize {
        match self {
            Basis::Hypercube(b) => b.nbasis(),
            Basis::Simplex(b) => b.nbasis(),
        }
    }

    pub fn polynomial_order(&self) -> usize {
        match self {
            Basis::Hypercube(b) => b.basis1d.pn,
            Basis::Simplex(_) => 1,
        }
    }

    /// Reference coordinates of the Lagrange node for a basis index.
    pub fn node(&self, ibasis: usize) -> Array1<f64> {
        match self {
            Basis::Hypercube(b) => b.node(ibasis),
            Basis::Simplex(b) => b.node(ibasis),
        }
    }

    pub fn eval(&self, xi: ArrayView1<f64>) -> Array1<f64> {
        let mut shp = Array1::zeros(self.nbasis());
        match self {
            Basis::Hypercube(b) => b.fill_shp(xi, &mut shp),
            Basis::Simplex(b) => b.fill_shp(xi, &mut shp),
        }
        shp
    }

    pub fn eval_deriv(&self, xi: ArrayView1<f64>) -> Array2<f64> {
        let mut deriv = Array2::zeros((self.nbasis(), self.ndim()));
        match self {
            Basis::Hypercube(b) => b.fill_deriv(xi, &mut deriv),
            Basis::Simplex(b) => b.fill_deriv(xi, &mut deriv),
        }
        deriv
    }

    pub fn eval_hess(&self, xi: ArrayView1<f64>) -> Array3<f64> {
        let ndim = self.ndim();
        let mut hess = Array3::zeros((self.nbasis(), ndim, ndim));
        match self {
            Basis::Hypercube(b) => b.fill_hess(xi, &mut hess),
            Basis::Simplex(b) => b.fill_hess(xi, &mut hess),
        }
        hess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dispatch_matches_domain() {
        let quad = Basis::new(DomainType::Hypercube, 2, 2).unwrap();
        assert_eq!(quad.nbasis(), 9);
        assert_eq!(quad.polynomial_order(), 2);

        let tri = Basis::new(DomainType::Simplex, 2, 1).unwrap();
        assert_eq!(tri.nbasis(), 3);
        assert!(Basis::new(DomainType::Simplex, 2, 2).is_err());
    }

    #[test]
    fn test_eval_partition_of_unity() {
        let basis = Basis::new(DomainType::Hypercube, 2, 3).unwrap();
        let shp = basis.eval(array![0.2, -0.6].view());
        assert!((shp.sum() - 1.0).abs() < 1e-12);
    }
}
