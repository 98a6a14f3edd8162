use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3};

use crate::fe::dof_map::DgDofMap;

/// How degrees of freedom interleave with vector components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DofOrder {
    /// dof is the left index: the component index varies fastest, so each
    /// element block is one contiguous chunk
    #[default]
    DofLeft,
    /// dof is the right index: dof varies fastest within large per-component
    /// chunks
    DofRight,
}

/// Layout of a global DG solution/residual vector indexed by
/// (element, local dof, component).
#[derive(Debug, Clone)]
pub struct FeLayout {
    pub dg_map: DgDofMap,
    pub ncomp: usize,
    pub order: DofOrder,
}

impl FeLayout {
    pub fn new(dg_map: DgDofMap, ncomp: usize, order: DofOrder) -> Self {
        Self {
            dg_map,
            ncomp,
            order,
        }
    }

    pub fn size(&self) -> usize {
        self.dg_map.size() * self.ncomp
    }

    pub fn index(&self, iel: usize, idof: usize, iv: usize) -> usize {
        let gdof = self.dg_map.global(iel, idof);
        match self.order {
            DofOrder::DofLeft => gdof * self.ncomp + iv,
            DofOrder::DofRight => iv * self.dg_map.size() + gdof,
        }
    }

    pub fn ndof_el(&self, iel: usize) -> usize {
        self.dg_map.ndof_el(iel)
    }
}

/// Layout of an element-compact block indexed by (local dof, component).
#[derive(Debug, Clone, Copy)]
pub struct ElLayout {
    pub ndof: usize,
    pub ncomp: usize,
    pub order: DofOrder,
}

impl ElLayout {
    pub fn size(&self) -> usize {
        self.ndof * self.ncomp
    }

    pub fn index(&self, idof: usize, iv: usize) -> usize {
        match self.order {
            DofOrder::DofLeft => idof * self.ncomp + iv,
            DofOrder::DofRight => iv * self.ndof + idof,
        }
    }
}

/// Copy one element's block out of the global vector into a dense
/// (ndof, ncomp) array.
pub fn extract_elspan(iel: usize, layout: &FeLayout, global: &[f64]) -> Array2<f64> {
    let ndof = layout.ndof_el(iel);
    let mut local = Array2::zeros((ndof, layout.ncomp));
    for idof in 0..ndof {
        for iv in 0..layout.ncomp {
            local[(idof, iv)] = global[layout.index(iel, idof, iv)];
        }
    }
    local
}

/// global <- beta * global + alpha * local over one element's block.
pub fn scatter_elspan(
    iel: usize,
    alpha: f64,
    local: ArrayView2<f64>,
    beta: f64,
    layout: &FeLayout,
    global: &mut [f64],
) {
    let ndof = layout.ndof_el(iel);
    debug_assert_eq!(local.nrows(), ndof);
    for idof in 0..ndof {
        for iv in 0..layout.ncomp {
            let g = &mut global[layout.index(iel, idof, iv)];
            *g = beta * *g + alpha * local[(idof, iv)];
        }
    }
}

/// u[ieq] = sum_idof coeffs[idof, ieq] * basis_vals[idof]
pub fn contract_values(coeffs: ArrayView2<f64>, basis_vals: ArrayView1<f64>) -> ndarray::Array1<f64> {
    coeffs.t().dot(&basis_vals)
}

/// grad_u[ieq, idim] = sum_idof coeffs[idof, ieq] * basis_grads[idof, idim]
pub fn contract_grads(coeffs: ArrayView2<f64>, basis_grads: ArrayView2<f64>) -> Array2<f64> {
    coeffs.t().dot(&basis_grads)
}

/// hess_u[ieq, i, j] = sum_idof coeffs[idof, ieq] * basis_hess[idof, i, j]
pub fn contract_hess(
    coeffs: ArrayView2<f64>,
    basis_hess: ArrayView3<f64>,
) -> ndarray::Array3<f64> {
    let (ndof, ncomp) = coeffs.dim();
    let (_, ndim, _) = basis_hess.dim();
    let mut hess = ndarray::Array3::zeros((ncomp, ndim, ndim));
    for idof in 0..ndof {
        for ieq in 0..ncomp {
            let c = coeffs[(idof, ieq)];
            if c == 0.0 {
                continue;
            }
            for i in 0..ndim {
                for j in 0..ndim {
                    hess[(ieq, i, j)] += c * basis_hess[(idof, i, j)];
                }
            }
        }
    }
    hess
}
