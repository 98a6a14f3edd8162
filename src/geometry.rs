pub mod face;
pub mod transforms;

use ndarray::{Array1, Array2, ArrayView2};

/// Reference domain shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainType {
    /// [-1, 1]^ndim
    Hypercube,
    /// the unit simplex
    Simplex,
}

/// Boundary condition tags attached to faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryCondition {
    Interior,
    Periodic,
    /// boundary between mesh partitions owned by different processes
    ParallelCom,
    Neumann,
    Dirichlet,
    Extrapolation,
    /// characteristic boundary condition
    Riemann,
    NoSlipIsothermal,
    SlipWall,
    WallGeneral,
    Inlet,
    Outlet,
    /// bottom of a time slab
    SpacetimePast,
    /// top of a time slab (equivalent to extrapolation)
    SpacetimeFuture,
}

impl BoundaryCondition {
    /// Parse a configuration name, case insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "dirichlet" => Some(Self::Dirichlet),
            "neumann" => Some(Self::Neumann),
            "extrapolation" => Some(Self::Extrapolation),
            "periodic" => Some(Self::Periodic),
            "spacetime-past" => Some(Self::SpacetimePast),
            "spacetime-future" => Some(Self::SpacetimeFuture),
            "slip wall" => Some(Self::SlipWall),
            "isothermal" | "no-slip isothermal" => Some(Self::NoSlipIsothermal),
            "wall" | "general wall" => Some(Self::WallGeneral),
            "riemann" | "characteristic" => Some(Self::Riemann),
            "inlet" => Some(Self::Inlet),
            "outlet" => Some(Self::Outlet),
            _ => None,
        }
    }
}

/// face_info / FACE_INFO_MOD gives the face number,
/// face_info % FACE_INFO_MOD gives the orientation.
pub const FACE_INFO_MOD: usize = 512;

pub fn pack_face_info(face_nr: usize, orientation: usize) -> usize {
    debug_assert!(orientation < FACE_INFO_MOD);
    face_nr * FACE_INFO_MOD + orientation
}

pub fn unpack_face_info(face_info: usize) -> (usize, usize) {
    (face_info / FACE_INFO_MOD, face_info % FACE_INFO_MOD)
}

/// Encode the bcflag of an interprocess face: unique per (rank, imleft).
pub fn encode_mpi_bcflag(rank: usize, imleft: bool, nranks: usize) -> usize {
    if imleft {
        rank
    } else {
        rank + nranks
    }
}

/// Decode an interprocess bcflag back to (rank, imleft).
pub fn decode_mpi_bcflag(bcflag: usize, nranks: usize) -> (usize, bool) {
    if bcflag < nranks {
        (bcflag, true)
    } else {
        (bcflag - nranks, false)
    }
}

/// Determinant of a small square matrix by LU with partial pivoting.
pub fn mat_det(a: ArrayView2<f64>) -> f64 {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    if n == 0 {
        return 1.0;
    }
    if n == 1 {
        return a[(0, 0)];
    }
    if n == 2 {
        return a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(1, 0)];
    }

    let mut lu = a.to_owned();
    let mut det = 1.0;
    for k in 0..n {
        // pivot
        let mut piv = k;
        for i in (k + 1)..n {
            if lu[(i, k)].abs() > lu[(piv, k)].abs() {
                piv = i;
            }
        }
        if piv != k {
            for j in 0..n {
                let tmp = lu[(k, j)];
                lu[(k, j)] = lu[(piv, j)];
                lu[(piv, j)] = tmp;
            }
            det = -det;
        }
        let pivot = lu[(k, k)];
        if pivot == 0.0 {
            return 0.0;
        }
        det *= pivot;
        for i in (k + 1)..n {
            let factor = lu[(i, k)] / pivot;
            for j in (k + 1)..n {
                lu[(i, j)] -= factor * lu[(k, j)];
            }
        }
    }
    det
}

/// Inverse of a small square matrix by Gauss-Jordan with partial pivoting.
/// Returns None for (numerically) singular input.
pub fn mat_inv(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    let mut work = a.to_owned();
    let mut inv = Array2::eye(n);

    for k in 0..n {
        let mut piv = k;
        for i in (k + 1)..n {
            if work[(i, k)].abs() > work[(piv, k)].abs() {
                piv = i;
            }
        }
        if work[(piv, k)].abs() < 1e-300 {
            return None;
        }
        if piv != k {
            for j in 0..n {
                work.swap((k, j), (piv, j));
                inv.swap((k, j), (piv, j));
            }
        }
        let pivot = work[(k, k)];
        for j in 0..n {
            work[(k, j)] /= pivot;
            inv[(k, j)] /= pivot;
        }
        for i in 0..n {
            if i != k {
                let factor = work[(i, k)];
                for j in 0..n {
                    work[(i, j)] -= factor * work[(k, j)];
                    inv[(i, j)] -= factor * inv[(k, j)];
                }
            }
        }
    }
    Some(inv)
}

/// Normal orthogonal to the columns of the ndim x (ndim - 1) tangent frame.
///
/// Cofactor expansion; the sign convention makes det([n | jac]) positive, so
/// with the face conventions used by the mesh the result points outward from
/// the left element.
pub fn calc_ortho(jac: ArrayView2<f64>) -> Array1<f64> {
    let ndim = jac.nrows();
    debug_assert_eq!(jac.ncols() + 1, ndim);
    let mut normal = Array1::zeros(ndim);

    if ndim == 1 {
        normal[0] = 1.0;
        return normal;
    }

    // minor obtained by deleting row i
    let mut minor = Array2::zeros((ndim - 1, ndim - 1));
    for i in 0..ndim {
        let mut irow = 0;
        for r in 0..ndim {
            if r == i {
                continue;
            }
            for c in 0..(ndim - 1) {
                minor[(irow, c)] = jac[(r, c)];
            }
            irow += 1;
        }
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        normal[i] = sign * mat_det(minor.view());
    }
    normal
}

pub fn normalize(v: &Array1<f64>) -> Array1<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    v / norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_face_info_roundtrip() {
        let info = pack_face_info(3, 5);
        assert_eq!(info, 3 * 512 + 5);
        assert_eq!(unpack_face_info(info), (3, 5));
    }

    #[test]
    fn test_mpi_bcflag_roundtrip() {
        let nranks = 4;
        for rank in 0..nranks {
            for imleft in [true, false] {
                let flag = encode_mpi_bcflag(rank, imleft, nranks);
                assert_eq!(decode_mpi_bcflag(flag, nranks), (rank, imleft));
            }
        }
    }

    #[test]
    fn test_det_and_inv() {
        let a = array![[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]];
        let det = mat_det(a.view());
        assert!((det - 8.0).abs() < 1e-12);

        let inv = mat_inv(a.view()).unwrap();
        let prod = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_calc_ortho_2d() {
        // tangent (0, 1) -> normal (1, 0)
        let jac = array![[0.0], [1.0]];
        let n = calc_ortho(jac.view());
        assert!((n[0] - 1.0).abs() < 1e-14);
        assert!(n[1].abs() < 1e-14);
    }

    #[test]
    fn test_calc_ortho_3d_is_cross_product() {
        let jac = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let n = calc_ortho(jac.view());
        assert!((n[2] - 1.0).abs() < 1e-14);
        assert!(n[0].abs() < 1e-14 && n[1].abs() < 1e-14);
    }

    #[test]
    fn test_bc_names() {
        assert_eq!(
            BoundaryCondition::from_name("Dirichlet"),
            Some(BoundaryCondition::Dirichlet)
        );
        assert_eq!(
            BoundaryCondition::from_name("spacetime-past"),
            Some(BoundaryCondition::SpacetimePast)
        );
        assert_eq!(BoundaryCondition::from_name("bogus"), None);
    }
}
