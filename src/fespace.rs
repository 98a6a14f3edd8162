use hashbrown::HashMap;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2};

use crate::basis::Basis;
use crate::error::SolverError;
use crate::fe::dof_map::{CgDofMap, DgDofMap};
use crate::geometry::{mat_inv, BoundaryCondition, DomainType};
use crate::linalg::Crs;
use crate::mesh::Mesh;
use crate::quadrature::QuadratureRule;

/// Basis families available to the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasisType {
    Lagrange,
}

/// Quadrature families available to the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuadratureType {
    GaussLegendre,
}

/// Key identifying one shared reference-element record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeTypeKey {
    pub domain: DomainType,
    pub basis_order: usize,
    pub geometry_order: usize,
    pub qtype: QuadratureType,
    pub btype: BasisType,
}

/// Key identifying one shared reference-trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceTypeKey {
    pub btype: BasisType,
    pub qtype: QuadratureType,
    pub domain_l: DomainType,
    pub domain_r: DomainType,
    pub basis_order_l: usize,
    pub basis_order_r: usize,
    pub geometry_order: usize,
    pub face_info_l: usize,
    pub face_info_r: usize,
}

/// Basis evaluation at one reference point: values, reference gradients and
/// reference Hessians.
#[derive(Debug, Clone)]
pub struct BasisEval {
    pub values: ndarray::Array1<f64>,
    pub ref_grads: Array2<f64>,
    pub ref_hess: Array3<f64>,
}

impl BasisEval {
    pub fn at_point(basis: &Basis, xi: ArrayView1<f64>) -> Self {
        Self {
            values: basis.eval(xi),
            ref_grads: basis.eval_deriv(xi),
            ref_hess: basis.eval_hess(xi),
        }
    }
}

/// Shared per-key record: basis, quadrature rule, and precomputed
/// evaluations at every quadrature point.
#[derive(Debug, Clone)]
pub struct RefElement {
    pub basis: Basis,
    pub quadrule: QuadratureRule,
    pub evals: Vec<BasisEval>,
}

/// Shared per-key record for a trace: the trace basis on the face reference
/// domain, face quadrature, and both elements' bases evaluated at the face
/// quadrature points pushed through the face-to-element embeddings.
#[derive(Debug, Clone)]
pub struct RefTrace {
    pub trace_basis: Basis,
    pub quadrule: QuadratureRule,
    pub evals_l: Vec<BasisEval>,
    pub evals_r: Vec<BasisEval>,
}

/// A finite element: its geometry lives in the mesh at elidx, its reference
/// data in the space's cache at iref.
#[derive(Debug, Clone, Copy)]
pub struct FiniteElement {
    pub elidx: usize,
    pub iref: usize,
}

/// A trace space: a face with the element on each side and an index into the
/// reference-trace cache. For boundary traces el_r == el_l.
#[derive(Debug, Clone, Copy)]
pub struct TraceSpace {
    pub facidx: usize,
    pub el_l: usize,
    pub el_r: usize,
    pub iref: usize,
}

/// A collection of finite elements and trace spaces over a mesh, with the
/// degree-of-freedom maps and connectivity matrices the discretization and
/// solvers consume.
///
/// The reference caches are write-once at construction and read-only during
/// assembly; elements and traces reference them by index.
#[derive(Debug)]
pub struct FESpace {
    pub mesh: Mesh,
    pub elements: Vec<FiniteElement>,
    pub traces: Vec<TraceSpace>,
    pub interior_trace_start: usize,
    pub interior_trace_end: usize,
    pub bdy_trace_start: usize,
    pub bdy_trace_end: usize,
    pub dg_map: DgDofMap,
    pub cg_map: CgDofMap,
    /// traces connected to each node
    pub fac_surr_nodes: Crs<usize>,
    /// elements connected to each node
    pub el_surr_nodes: Crs<usize>,
    /// traces connected to each element
    pub fac_surr_el: Crs<usize>,
    ref_elements: Vec<RefElement>,
    ref_traces: Vec<RefTrace>,
}

impl FESpace {
    /// Build an L2 space with uniform basis order and quadrature over the
    /// mesh.
    pub fn new(
        mut mesh: Mesh,
        btype: BasisType,
        qtype: QuadratureType,
        basis_order: usize,
    ) -> Result<Self, SolverError> {
        if mesh.elsup.nrow() == 0 {
            mesh.build_elsup();
        }

        let mut ref_elements: Vec<RefElement> = Vec::new();
        let mut ref_el_map: HashMap<FeTypeKey, usize> = HashMap::new();
        let mut elements = Vec::with_capacity(mesh.n_elem());

        for ielem in 0..mesh.n_elem() {
            let trans = mesh.transformation(ielem);
            let key = FeTypeKey {
                domain: trans.domain,
                basis_order,
                geometry_order: trans.order,
                qtype,
                btype,
            };
            let iref = match ref_el_map.get(&key) {
                Some(&i) => i,
                None => {
                    let basis = Basis::new(trans.domain, mesh.ndim, basis_order)?;
                    let quadrule = QuadratureRule::for_domain(
                        trans.domain,
                        mesh.ndim,
                        basis_order,
                        trans.order,
                    )?;
                    let evals = (0..quadrule.npoints())
                        .map(|ig| BasisEval::at_point(&basis, quadrule.points.row(ig)))
                        .collect();
                    ref_elements.push(RefElement {
                        basis,
                        quadrule,
                        evals,
                    });
                    let i = ref_elements.len() - 1;
                    ref_el_map.insert(key, i);
                    i
                }
            };
            elements.push(FiniteElement {
                elidx: ielem,
                iref,
            });
        }

        // trace spaces
        let mut ref_traces: Vec<RefTrace> = Vec::new();
        let mut ref_trace_map: HashMap<TraceTypeKey, usize> = HashMap::new();
        let mut traces = Vec::with_capacity(mesh.faces.len());

        for (ifac, face) in mesh.faces.iter().enumerate() {
            // periodic faces pair two real elements just like interior ones
            let paired = matches!(
                face.bctype,
                BoundaryCondition::Interior | BoundaryCondition::Periodic
            );
            let el_l = face.elem_l;
            let el_r = if paired { face.elem_r } else { face.elem_l };

            let basis_l = &ref_elements[elements[el_l].iref].basis;
            let basis_r = &ref_elements[elements[el_r].iref].basis;
            let trans_l = mesh.transformation(el_l);
            let trans_r = mesh.transformation(el_r);
            let geometry_order = trans_l.order.max(trans_r.order);

            let key = TraceTypeKey {
                btype,
                qtype,
                domain_l: trans_l.domain,
                domain_r: trans_r.domain,
                basis_order_l: basis_l.polynomial_order(),
                basis_order_r: basis_r.polynomial_order(),
                geometry_order,
                face_info_l: face.face_info_l,
                face_info_r: face.face_info_r,
            };
            let iref = match ref_trace_map.get(&key) {
                Some(&i) => i,
                None => {
                    let trace_order = basis_l
                        .polynomial_order()
                        .max(basis_r.polynomial_order());
                    let trace_basis =
                        Basis::new(DomainType::Hypercube, mesh.ndim - 1, trace_order)?;
                    let quadrule = QuadratureRule::for_domain(
                        DomainType::Hypercube,
                        mesh.ndim - 1,
                        trace_order,
                        geometry_order,
                    )?;

                    let mut evals_l = Vec::with_capacity(quadrule.npoints());
                    let mut evals_r = Vec::with_capacity(quadrule.npoints());
                    for ig in 0..quadrule.npoints() {
                        let s = quadrule.points.row(ig);
                        let xi_l = face.transform_xi_l(trans_l, s);
                        evals_l.push(BasisEval::at_point(basis_l, xi_l.view()));
                        if paired {
                            let xi_r = face.transform_xi_r(trans_r, s);
                            evals_r.push(BasisEval::at_point(basis_r, xi_r.view()));
                        } else {
                            // ghost side aliases the interior element
                            evals_r.push(BasisEval::at_point(basis_l, xi_l.view()));
                        }
                    }
                    ref_traces.push(RefTrace {
                        trace_basis,
                        quadrule,
                        evals_l,
                        evals_r,
                    });
                    let i = ref_traces.len() - 1;
                    ref_trace_map.insert(key, i);
                    i
                }
            };

            traces.push(TraceSpace {
                facidx: ifac,
                el_l,
                el_r,
                iref,
            });
        }

        // dof maps
        let ndofs: Vec<usize> = elements
            .iter()
            .map(|fe| ref_elements[fe.iref].basis.nbasis())
            .collect();
        let dg_map = DgDofMap::new(&ndofs);
        let conn: Vec<Vec<usize>> = mesh.elements.iter().map(|el| el.nodes.clone()).collect();
        let cg_map = CgDofMap::new(conn, mesh.n_nodes());

        // connectivity matrices
        let mut fac_surr_nodes_ragged: Vec<Vec<usize>> = vec![Vec::new(); mesh.n_nodes()];
        for (itrace, trace) in traces.iter().enumerate() {
            for &inode in &mesh.faces[trace.facidx].nodes {
                fac_surr_nodes_ragged[inode].push(itrace);
            }
        }
        let fac_surr_nodes = Crs::from_ragged(&fac_surr_nodes_ragged);

        let el_surr_nodes = mesh.elsup.clone();

        let mut fac_surr_el_ragged: Vec<Vec<usize>> = vec![Vec::new(); elements.len()];
        for (itrace, trace) in traces.iter().enumerate() {
            fac_surr_el_ragged[trace.el_l].push(itrace);
            if trace.el_r != trace.el_l {
                fac_surr_el_ragged[trace.el_r].push(itrace);
            }
        }
        let fac_surr_el = Crs::from_ragged(&fac_surr_el_ragged);

        Ok(Self {
            interior_trace_start: mesh.interior_face_start,
            interior_trace_end: mesh.interior_face_end,
            bdy_trace_start: mesh.bdy_face_start,
            bdy_trace_end: mesh.bdy_face_end,
            mesh,
            elements,
            traces,
            dg_map,
            cg_map,
            fac_surr_nodes,
            el_surr_nodes,
            fac_surr_el,
            ref_elements,
            ref_traces,
        })
    }

    /// Number of dg degrees of freedom (multiply by the component count for
    /// vector storage sizes).
    pub fn ndof_dg(&self) -> usize {
        self.dg_map.size()
    }

    pub fn el_ref(&self, ielem: usize) -> &RefElement {
        &self.ref_elements[self.elements[ielem].iref]
    }

    pub fn el_nbasis(&self, ielem: usize) -> usize {
        self.el_ref(ielem).basis.nbasis()
    }

    pub fn trace_ref(&self, itrace: usize) -> &RefTrace {
        &self.ref_traces[self.traces[itrace].iref]
    }

    pub fn interior_traces(&self) -> &[TraceSpace] {
        &self.traces[self.interior_trace_start..self.interior_trace_end]
    }

    pub fn boundary_traces(&self) -> &[TraceSpace] {
        &self.traces[self.bdy_trace_start..self.bdy_trace_end]
    }

    /// Basis gradients with respect to physical coordinates:
    /// rows of the reference gradient table times J^{-1}.
    pub fn phys_grad_basis(
        &self,
        ref_grads: ArrayView2<f64>,
        jac: ArrayView2<f64>,
    ) -> Result<Array2<f64>, SolverError> {
        let jinv = mat_inv(jac)
            .ok_or_else(|| SolverError::Geometry("singular element jacobian".into()))?;
        Ok(ref_grads.dot(&jinv))
    }

    /// Basis Hessians with respect to physical coordinates.
    ///
    /// H_x = J^{-T} (H_xi - sum_k (grad_x B)_k H^geo_k) J^{-1}
    /// with H^geo the Hessian of the geometric transform.
    pub fn phys_hess_basis(
        &self,
        ref_hess: ndarray::ArrayView3<f64>,
        phys_grads: ArrayView2<f64>,
        geo_hess: ndarray::ArrayView3<f64>,
        jac: ArrayView2<f64>,
    ) -> Result<Array3<f64>, SolverError> {
        let ndim = jac.nrows();
        let nbasis = ref_hess.dim().0;
        let jinv = mat_inv(jac)
            .ok_or_else(|| SolverError::Geometry("singular element jacobian".into()))?;

        let mut hess = Array3::zeros((nbasis, ndim, ndim));
        let mut corrected = Array2::zeros((ndim, ndim));
        for n in 0..nbasis {
            for i in 0..ndim {
                for j in 0..ndim {
                    let mut v = ref_hess[(n, i, j)];
                    for k in 0..ndim {
                        v -= phys_grads[(n, k)] * geo_hess[(k, i, j)];
                    }
                    corrected[(i, j)] = v;
                }
            }
            // J^{-T} C J^{-1}
            let tmp = jinv.t().dot(&corrected).dot(&jinv);
            for i in 0..ndim {
                for j in 0..ndim {
                    hess[(n, i, j)] = tmp[(i, j)];
                }
            }
        }
        Ok(hess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mat_det;
    use crate::mesh::{burgers_linear_mesh, uniform_quad_mesh};
    use ndarray::array;

    fn quad_space(order: usize) -> FESpace {
        let mesh = uniform_quad_mesh(
            4,
            4,
            [-1.0, -1.0],
            [1.0, 1.0],
            [BoundaryCondition::Dirichlet; 4],
            [0; 4],
        )
        .unwrap();
        FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, order).unwrap()
    }

    #[test]
    fn test_space_counts_and_sharing() {
        let space = quad_space(1);
        assert_eq!(space.elements.len(), 16);
        assert_eq!(space.traces.len(), 40);
        assert_eq!(space.interior_trace_end, 24);
        // all elements share a single reference record
        assert_eq!(space.ref_elements.len(), 1);
        // dg dofs: 16 elements x 4 basis functions
        assert_eq!(space.ndof_dg(), 64);
        assert_eq!(space.cg_map.size(), 25);
    }

    #[test]
    fn test_dg_offsets_increase() {
        let space = quad_space(2);
        assert_eq!(space.ndof_dg(), 16 * 9);
        let mut prev = None;
        for iel in 0..space.elements.len() {
            let first = space.dg_map.global(iel, 0);
            if let Some(p) = prev {
                assert!(first > p);
            }
            prev = Some(first);
        }
    }

    #[test]
    fn test_connectivities() {
        let space = quad_space(1);
        // center node (12) touches 4 elements and 4 traces
        assert_eq!(space.el_surr_nodes.row(12).len(), 4);
        assert_eq!(space.fac_surr_nodes.row(12).len(), 4);
        // every element touches exactly 4 traces
        for iel in 0..16 {
            assert_eq!(space.fac_surr_el.row(iel).len(), 4);
        }
    }

    #[test]
    fn test_trace_side_evaluations_agree() {
        // the trace of a continuous function must be single valued:
        // interpolate a linear function on both sides and compare at qps
        let space = quad_space(1);
        let f = |x: f64, y: f64| 2.0 * x - 0.5 * y + 0.25;

        for trace in space.interior_traces() {
            let rt = space.trace_ref(space_trace_index(&space, trace));
            let el_l = trace.el_l;
            let el_r = trace.el_r;
            let coeff = |iel: usize| -> Vec<f64> {
                let basis = &space.el_ref(iel).basis;
                let trans = space.mesh.transformation(iel);
                let coord = space.mesh.el_coord(iel);
                (0..basis.nbasis())
                    .map(|i| {
                        let x = trans.transform(coord.view(), basis.node(i).view());
                        f(x[0], x[1])
                    })
                    .collect()
            };
            let cl = coeff(el_l);
            let cr = coeff(el_r);
            for ig in 0..rt.quadrule.npoints() {
                let ul: f64 = cl
                    .iter()
                    .zip(rt.evals_l[ig].values.iter())
                    .map(|(c, b)| c * b)
                    .sum();
                let ur: f64 = cr
                    .iter()
                    .zip(rt.evals_r[ig].values.iter())
                    .map(|(c, b)| c * b)
                    .sum();
                assert!(
                    (ul - ur).abs() < 1e-12,
                    "trace mismatch: {ul} vs {ur}"
                );
            }
        }
    }

    // look up the index of a trace within the space (test helper)
    fn space_trace_index(space: &FESpace, trace: &TraceSpace) -> usize {
        space
            .traces
            .iter()
            .position(|t| t.facidx == trace.facidx)
            .unwrap()
    }

    #[test]
    fn test_phys_grad_on_stretched_element() {
        let mesh = uniform_quad_mesh(
            1,
            1,
            [0.0, 0.0],
            [2.0, 4.0],
            [BoundaryCondition::Dirichlet; 4],
            [0; 4],
        )
        .unwrap();
        let space =
            FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap();

        let refel = space.el_ref(0);
        let trans = space.mesh.transformation(0);
        let coord = space.mesh.el_coord(0);
        let xi = array![0.3, -0.2];
        let jac = trans.jacobian(coord.view(), xi.view());
        assert!((mat_det(jac.view()) - 2.0).abs() < 1e-13);

        let ref_grads = refel.basis.eval_deriv(xi.view());
        let phys = space.phys_grad_basis(ref_grads.view(), jac.view()).unwrap();

        // interpolate u = x: nodal values are the x coordinates
        let mut gx = 0.0;
        let mut gy = 0.0;
        for i in 0..4 {
            gx += coord[(i, 0)] * phys[(i, 0)];
            gy += coord[(i, 0)] * phys[(i, 1)];
        }
        assert!((gx - 1.0).abs() < 1e-13);
        assert!(gy.abs() < 1e-13);
    }

    #[test]
    fn test_burgers_mesh_space() {
        let mesh = burgers_linear_mesh(true).unwrap();
        let space =
            FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap();
        assert_eq!(space.interior_traces().len(), 7);
        assert_eq!(space.boundary_traces().len(), 10);
    }
}
