use ndarray::{Array1, Array2};

use crate::error::SolverError;
use crate::geometry::DomainType;

/// A quadrature rule on a reference domain: abscissae (one row per point)
/// and weights.
#[derive(Debug, Clone)]
pub struct QuadratureRule {
    pub ndim: usize,
    pub points: Array2<f64>,
    pub weights: Array1<f64>,
}

impl QuadratureRule {
    pub fn npoints(&self) -> usize {
        self.weights.len()
    }

    /// Gauss-Legendre points and weights on [-1, 1].
    ///
    /// Roots of the Legendre polynomial by Newton iteration from the
    /// Chebyshev initial guess; accurate to machine precision for the
    /// point counts used here.
    pub fn gauss_legendre_1d(npoints: usize) -> (Array1<f64>, Array1<f64>) {
        assert!(npoints >= 1);
        let n = npoints;
        let mut points = Array1::zeros(n);
        let mut weights = Array1::zeros(n);

        for i in 0..n.div_ceil(2) {
            let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
            let mut dp = 0.0;
            for _ in 0..100 {
                // evaluate P_n and P_n' by the three-term recurrence
                let mut p0 = 1.0;
                let mut p1 = x;
                for k in 2..=n {
                    let kf = k as f64;
                    let p2 = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
                    p0 = p1;
                    p1 = p2;
                }
                let p = p1;
                dp = n as f64 * (x * p1 - p0) / (x * x - 1.0);
                let dx = p / dp;
                x -= dx;
                if dx.abs() < 1e-15 {
                    break;
                }
            }
            let w = 2.0 / ((1.0 - x * x) * dp * dp);
            // symmetric pair
            points[i] = -x;
            points[n - 1 - i] = x;
            weights[i] = w;
            weights[n - 1 - i] = w;
        }
        if n % 2 == 1 {
            points[n / 2] = 0.0;
        }
        (points, weights)
    }

    /// Tensor-product Gauss-Legendre rule on [-1, 1]^ndim.
    ///
    /// ndim = 0 gives the single point of weight one used by point traces.
    pub fn hypercube_gauss(ndim: usize, npoints_1d: usize) -> Self {
        if ndim == 0 {
            return Self {
                ndim,
                points: Array2::zeros((1, 0)),
                weights: Array1::ones(1),
            };
        }

        let (pts1d, wts1d) = Self::gauss_legendre_1d(npoints_1d);
        let npoints = npoints_1d.pow(ndim as u32);
        let mut points = Array2::zeros((npoints, ndim));
        let mut weights = Array1::ones(npoints);

        for ig in 0..npoints {
            let mut rem = ig;
            for d in (0..ndim).rev() {
                let i1d = rem % npoints_1d;
                rem /= npoints_1d;
                points[(ig, d)] = pts1d[i1d];
                weights[ig] *= wts1d[i1d];
            }
        }
        Self {
            ndim,
            points,
            weights,
        }
    }

    /// Low order rules on the unit simplex (weights sum to the reference
    /// volume). Degree 1 is the centroid rule, degree 2 the interior
    /// three-point rule; both are exact for the P1 simplex elements
    /// generated here.
    pub fn simplex_rule(ndim: usize, degree: usize) -> Result<Self, SolverError> {
        match (ndim, degree) {
            (2, 0) | (2, 1) => {
                let points =
                    Array2::from_shape_vec((1, 2), vec![1.0 / 3.0, 1.0 / 3.0]).unwrap();
                let weights = Array1::from_elem(1, 0.5);
                Ok(Self {
                    ndim,
                    points,
                    weights,
                })
            }
            (2, _) => {
                let points = Array2::from_shape_vec(
                    (3, 2),
                    vec![
                        1.0 / 6.0,
                        1.0 / 6.0,
                        2.0 / 3.0,
                        1.0 / 6.0,
                        1.0 / 6.0,
                        2.0 / 3.0,
                    ],
                )
                .unwrap();
                let weights = Array1::from_elem(3, 0.5 / 3.0);
                Ok(Self {
                    ndim,
                    points,
                    weights,
                })
            }
            (3, _) => {
                // vertex-averaged interior rule, degree 2
                let a = 0.585_410_196_624_968_5;
                let b = 0.138_196_601_125_010_5;
                let points = Array2::from_shape_vec(
                    (4, 3),
                    vec![b, b, b, a, b, b, b, a, b, b, b, a],
                )
                .unwrap();
                let weights = Array1::from_elem(4, 1.0 / 24.0);
                Ok(Self {
                    ndim,
                    points,
                    weights,
                })
            }
            (1, _) => {
                // unit interval
                let (pts, wts) = Self::gauss_legendre_1d(degree / 2 + 1);
                let npts = pts.len();
                let mut points = Array2::zeros((npts, 1));
                let mut weights = Array1::zeros(npts);
                for i in 0..npts {
                    points[(i, 0)] = 0.5 * (pts[i] + 1.0);
                    weights[i] = 0.5 * wts[i];
                }
                Ok(Self {
                    ndim: 1,
                    points,
                    weights,
                })
            }
            _ => Err(SolverError::Config(format!(
                "no simplex quadrature for ndim={ndim}"
            ))),
        }
    }

    /// Rule for a reference domain, sized for a basis/geometry order pair.
    pub fn for_domain(
        domain: DomainType,
        ndim: usize,
        basis_order: usize,
        geometry_order: usize,
    ) -> Result<Self, SolverError> {
        match domain {
            DomainType::Hypercube => {
                let npoints_1d = basis_order + geometry_order.max(1) + 1;
                Ok(Self::hypercube_gauss(ndim, npoints_1d))
            }
            DomainType::Simplex => Self::simplex_rule(ndim, 2 * basis_order + 1),
        }
    }
}
