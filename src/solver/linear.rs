use faer::{linalg::solvers::DenseSolveCore, prelude::Solve, Col};
use faer_ext::IntoFaer;
use ndarray::{Array1, Array2, ArrayView1};

use crate::error::SolverError;
use crate::linalg::SparseMat;

/// Backend for the Gauss-Newton normal-equation subproblem
/// (J^T J + diag(lambda)) dz = g.
#[derive(Debug, Clone)]
pub enum LinearSolver {
    /// explicitly form the subproblem matrix and LU factorize
    Direct,
    /// matrix-free conjugate gradients on x -> J^T (J x) + lambda x
    ConjugateGradient { max_iter: usize, rtol: f64 },
}

impl Default for LinearSolver {
    fn default() -> Self {
        LinearSolver::Direct
    }
}

/// Outcome of the subproblem solve; on Krylov stagnation the best iterate is
/// still returned and `converged` is false.
pub struct SubproblemSolution {
    pub dz: Array1<f64>,
    pub converged: bool,
}

impl LinearSolver {
    pub fn solve(
        &self,
        jac: &SparseMat,
        lambda: ArrayView1<f64>,
        rhs: ArrayView1<f64>,
    ) -> Result<SubproblemSolution, SolverError> {
        match *self {
            LinearSolver::Direct => {
                let dense = jac.to_dense();
                let mut a: Array2<f64> = dense.t().dot(&dense);
                for i in 0..a.nrows() {
                    a[(i, i)] += lambda[i];
                }
                let a_faer = a.view().into_faer();
                let b = Col::<f64>::from_iter(rhs.iter().copied());
                let lu = a_faer.partial_piv_lu();
                let x = lu.solve(&b);
                let dz = Array1::from_iter(x.iter().copied());
                if dz.iter().any(|v| !v.is_finite()) {
                    return Err(SolverError::LinearSolve(
                        "LU solve produced non-finite values".into(),
                    ));
                }
                Ok(SubproblemSolution {
                    dz,
                    converged: true,
                })
            }

            LinearSolver::ConjugateGradient { max_iter, rtol } => {
                // the operator is symmetric positive definite by construction
                let apply = |x: ArrayView1<f64>| -> Array1<f64> {
                    let jx = jac.matvec(x);
                    let mut y = jac.matvec_transpose(jx.view());
                    for i in 0..y.len() {
                        y[i] += lambda[i] * x[i];
                    }
                    y
                };

                let n = rhs.len();
                let mut x = Array1::zeros(n);
                let mut r = rhs.to_owned();
                let mut p = r.clone();
                let mut rsq: f64 = r.dot(&r);
                let rhs_norm = rsq.sqrt().max(1e-300);

                let mut converged = false;
                for _ in 0..max_iter {
                    if rsq.sqrt() <= rtol * rhs_norm {
                        converged = true;
                        break;
                    }
                    let ap = apply(p.view());
                    let pap = p.dot(&ap);
                    if pap <= 0.0 || !pap.is_finite() {
                        break;
                    }
                    let alpha = rsq / pap;
                    x.scaled_add(alpha, &p);
                    r.scaled_add(-alpha, &ap);
                    let rsq_new = r.dot(&r);
                    let beta = rsq_new / rsq;
                    rsq = rsq_new;
                    p = &r + &(beta * &p);
                }
                if rsq.sqrt() <= rtol * rhs_norm {
                    converged = true;
                }
                Ok(SubproblemSolution { dz: x, converged })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_system() -> (SparseMat, Array1<f64>, Array1<f64>) {
        // J is 3x2, lambda small ridge
        let triplets = vec![
            (0, 0, 2.0),
            (0, 1, -1.0),
            (1, 0, 1.0),
            (1, 1, 3.0),
            (2, 1, 0.5),
        ];
        let jac = SparseMat::from_triplets(3, 2, &triplets);
        let lambda = array![1e-10, 1e-10];
        let rhs = array![1.0, 2.0];
        (jac, lambda, rhs)
    }

    #[test]
    fn test_direct_and_cg_agree() {
        let (jac, lambda, rhs) = small_system();
        let direct = LinearSolver::Direct
            .solve(&jac, lambda.view(), rhs.view())
            .unwrap();
        let cg = LinearSolver::ConjugateGradient {
            max_iter: 100,
            rtol: 1e-14,
        }
        .solve(&jac, lambda.view(), rhs.view())
        .unwrap();
        assert!(direct.converged);
        assert!(cg.converged);
        for i in 0..2 {
            assert!((direct.dz[i] - cg.dz[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_direct_solves_normal_equations() {
        let (jac, lambda, rhs) = small_system();
        let sol = LinearSolver::Direct
            .solve(&jac, lambda.view(), rhs.view())
            .unwrap();
        // residual of (J^T J + lambda) x = rhs
        let dense = jac.to_dense();
        let a = dense.t().dot(&dense);
        let ax = a.dot(&sol.dz);
        for i in 0..2 {
            assert!((ax[i] + lambda[i] * sol.dz[i] - rhs[i]).abs() < 1e-10);
        }
    }
}
