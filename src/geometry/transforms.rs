use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};

use crate::basis::Basis;
use crate::error::SolverError;
use crate::geometry::DomainType;

/// Function table for the reference-to-physical map of one
/// (domain, order, ndim) key.
///
/// One instance is shared by every element with the same key; elements hold
/// an index into the mesh's transformation table. Node ordering matches the
/// reference Lagrange node ordering, so nodal basis coefficients map
/// one-to-one to global node values.
#[derive(Debug, Clone)]
pub struct ElementTransformation {
    pub domain: DomainType,
    pub order: usize,
    pub ndim: usize,
    pub nnode: usize,
    pub nfaces: usize,
    geo_basis: Basis,
}

impl ElementTransformation {
    pub fn new(domain: DomainType, order: usize, ndim: usize) -> Result<Self, SolverError> {
        if domain == DomainType::Simplex && ndim != 2 {
            return Err(SolverError::Config(format!(
                "simplex elements only generated for ndim = 2 (got {ndim})"
            )));
        }
        let geo_basis = Basis::new(domain, ndim, order)?;
        let nnode = geo_basis.nbasis();
        let nfaces = match domain {
            DomainType::Hypercube => 2 * ndim,
            DomainType::Simplex => ndim + 1,
        };
        Ok(Self {
            domain,
            order,
            ndim,
            nnode,
            nfaces,
            geo_basis,
        })
    }

    // =============================
    // = Coordinate Transformation =
    // =============================

    /// Map a reference point to the physical domain.
    /// el_coord is (nnode, ndim), one row per node in reference order.
    pub fn transform(&self, el_coord: ArrayView2<f64>, xi: ArrayView1<f64>) -> Array1<f64> {
        let shp = self.geo_basis.eval(xi);
        let mut x = Array1::zeros(self.ndim);
        for n in 0..self.nnode {
            for d in 0..self.ndim {
                x[d] += el_coord[(n, d)] * shp[n];
            }
        }
        x
    }

    /// Jacobian J_ij = dx_i / dxi_j at the reference point.
    pub fn jacobian(&self, el_coord: ArrayView2<f64>, xi: ArrayView1<f64>) -> Array2<f64> {
        let deriv = self.geo_basis.eval_deriv(xi);
        let mut jac = Array2::zeros((self.ndim, self.ndim));
        for n in 0..self.nnode {
            for i in 0..self.ndim {
                for j in 0..self.ndim {
                    jac[(i, j)] += el_coord[(n, i)] * deriv[(n, j)];
                }
            }
        }
        jac
    }

    /// Hessian H_kij = d^2 x_k / dxi_i dxi_j at the reference point.
    pub fn hessian(&self, el_coord: ArrayView2<f64>, xi: ArrayView1<f64>) -> Array3<f64> {
        let hess_basis = self.geo_basis.eval_hess(xi);
        let mut hess = Array3::zeros((self.ndim, self.ndim, self.ndim));
        for n in 0..self.nnode {
            for k in 0..self.ndim {
                for i in 0..self.ndim {
                    for j in 0..self.ndim {
                        hess[(k, i, j)] += el_coord[(n, k)] * hess_basis[(n, i, j)];
                    }
                }
            }
        }
        hess
    }

    /// Centroid of the reference domain.
    pub fn centroid_ref(&self) -> Array1<f64> {
        match self.domain {
            DomainType::Hypercube => Array1::zeros(self.ndim),
            DomainType::Simplex => Array1::from_elem(self.ndim, 1.0 / 3.0),
        }
    }

    /// Centroid in the physical domain.
    pub fn centroid(&self, el_coord: ArrayView2<f64>) -> Array1<f64> {
        self.transform(el_coord, self.centroid_ref().view())
    }

    /// Reference coordinates of the Lagrange node backing local node inode.
    pub fn reference_node(&self, inode: usize) -> Array1<f64> {
        self.geo_basis.node(inode)
    }

    // ====================================
    // = Face Transformation Connectivity =
    // ====================================

    /// (axis, positive side) for a hypercube face number.
    /// Faces 0..ndim are the xi_axis = -1 sides, ndim..2*ndim the +1 sides.
    fn hypercube_face_axis(&self, face_nr: usize) -> (usize, bool) {
        if face_nr < self.ndim {
            (face_nr, false)
        } else {
            (face_nr - self.ndim, true)
        }
    }

    /// Direction of the first face axis; chosen so the tangent frame induces
    /// an outward normal under the normal-first sign convention.
    fn hypercube_first_axis_dir(axis: usize, positive: bool) -> f64 {
        let base = if axis % 2 == 0 { 1.0 } else { -1.0 };
        if positive {
            base
        } else {
            -base
        }
    }

    /// The element axes spanning a hypercube face, in increasing order.
    fn hypercube_face_axes(&self, axis: usize) -> Vec<usize> {
        (0..self.ndim).filter(|&d| d != axis).collect()
    }

    /// Simplex (triangle) edge endpoints in counterclockwise order.
    fn simplex_edge_verts(face_nr: usize) -> (usize, usize) {
        (face_nr, (face_nr + 1) % 3)
    }

    pub fn face_domain_type(&self, _face_nr: usize) -> DomainType {
        // faces of both supported domains are (ndim-1)-hypercubes
        DomainType::Hypercube
    }

    pub fn n_face_vert(&self, _face_nr: usize) -> usize {
        match self.domain {
            DomainType::Hypercube => 1usize << (self.ndim - 1),
            DomainType::Simplex => 2,
        }
    }

    pub fn n_face_nodes(&self, _face_nr: usize) -> usize {
        match self.domain {
            DomainType::Hypercube => (self.order + 1).pow(self.ndim as u32 - 1),
            DomainType::Simplex => 2,
        }
    }

    /// Global vertex indices of the element (extreme points only).
    pub fn element_verts(&self, el_nodes: &[usize]) -> Vec<usize> {
        match self.domain {
            DomainType::Hypercube => {
                let m = self.order + 1;
                let nvert = 1usize << self.ndim;
                let mut verts = Vec::with_capacity(nvert);
                for iv in 0..nvert {
                    let mut local = 0;
                    for d in 0..self.ndim {
                        let bit = (iv >> (self.ndim - 1 - d)) & 1;
                        let i1d = if bit == 1 { self.order } else { 0 };
                        local = local * m + i1d;
                    }
                    verts.push(el_nodes[local]);
                }
                verts
            }
            DomainType::Simplex => el_nodes.to_vec(),
        }
    }

    /// Global node indices on the face, in the face's reference order.
    ///
    /// The ordering matches the (ndim-1)-dimensional tensor-product node
    /// ordering of the face basis, so a face built from these nodes
    /// transforms consistently with the element restriction.
    pub fn face_nodes(&self, face_nr: usize, el_nodes: &[usize]) -> Vec<usize> {
        match self.domain {
            DomainType::Hypercube => {
                let m = self.order + 1;
                let (axis, positive) = self.hypercube_face_axis(face_nr);
                let face_axes = self.hypercube_face_axes(axis);
                let dir = Self::hypercube_first_axis_dir(axis, positive);
                let d_face = self.ndim - 1;
                let nfnodes = m.pow(d_face as u32);

                let mut nodes = Vec::with_capacity(nfnodes);
                for jf in 0..nfnodes {
                    // decompose the face index, last face axis fastest
                    let mut rem = jf;
                    let mut el_index = vec![0usize; self.ndim];
                    el_index[axis] = if positive { self.order } else { 0 };
                    for (k, &b) in face_axes.iter().enumerate().rev() {
                        let mut j = rem % m;
                        rem /= m;
                        if k == 0 && dir < 0.0 {
                            j = self.order - j;
                        }
                        el_index[b] = j;
                    }
                    let mut local = 0;
                    for d in 0..self.ndim {
                        local = local * m + el_index[d];
                    }
                    nodes.push(el_nodes[local]);
                }
                nodes
            }
            DomainType::Simplex => {
                let (a, b) = Self::simplex_edge_verts(face_nr);
                vec![el_nodes[a], el_nodes[b]]
            }
        }
    }

    /// Global vertex indices of the face, in the face's reference order.
    pub fn face_verts(&self, face_nr: usize, el_nodes: &[usize]) -> Vec<usize> {
        match self.domain {
            DomainType::Hypercube => {
                let nodes = self.face_nodes(face_nr, el_nodes);
                let m = self.order + 1;
                let d_face = self.ndim - 1;
                let nvert = 1usize << d_face;
                let mut verts = Vec::with_capacity(nvert);
                for iv in 0..nvert {
                    let mut fidx = 0;
                    for k in 0..d_face {
                        let bit = (iv >> (d_face - 1 - k)) & 1;
                        let j = if bit == 1 { self.order } else { 0 };
                        fidx = fidx * m + j;
                    }
                    verts.push(nodes[fidx]);
                }
                verts
            }
            DomainType::Simplex => self.face_nodes(face_nr, el_nodes),
        }
    }

    /// Inverse lookup: the face number whose vertex set matches, or None.
    pub fn face_nr_from_verts(&self, verts: &[usize], el_nodes: &[usize]) -> Option<usize> {
        let mut target: Vec<usize> = verts.to_vec();
        target.sort_unstable();
        for face_nr in 0..self.nfaces {
            let mut fv = self.face_verts(face_nr, el_nodes);
            fv.sort_unstable();
            if fv == target {
                return Some(face_nr);
            }
        }
        None
    }

    /// Embed a face reference point into the element reference domain.
    /// s has ndim - 1 entries in the face reference frame of this element's
    /// face face_nr.
    pub fn face_ref_to_element_ref(&self, face_nr: usize, s: ArrayView1<f64>) -> Array1<f64> {
        match self.domain {
            DomainType::Hypercube => {
                let (axis, positive) = self.hypercube_face_axis(face_nr);
                let face_axes = self.hypercube_face_axes(axis);
                let dir = Self::hypercube_first_axis_dir(axis, positive);
                let mut xi = Array1::zeros(self.ndim);
                xi[axis] = if positive { 1.0 } else { -1.0 };
                for (k, &b) in face_axes.iter().enumerate() {
                    xi[b] = if k == 0 { dir * s[0] } else { s[k] };
                }
                xi
            }
            DomainType::Simplex => {
                let (a, b) = Self::simplex_edge_verts(face_nr);
                let va = self.geo_basis.node(a);
                let vb = self.geo_basis.node(b);
                let t = 0.5 * (s[0] + 1.0);
                &va + &((&vb - &va) * t)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{calc_ortho, mat_det};
    use ndarray::array;

    fn unit_quad() -> Array2<f64> {
        // order 1 quad on [0,1]^2, node order (x slow, y fast):
        // BL, TL, BR, TR
        array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]
    }

    #[test]
    fn test_quad_transform_and_jacobian() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let coord = unit_quad();

        let x = trans.transform(coord.view(), array![0.0, 0.0].view());
        assert!((x[0] - 0.5).abs() < 1e-14);
        assert!((x[1] - 0.5).abs() < 1e-14);

        let jac = trans.jacobian(coord.view(), array![0.3, -0.2].view());
        assert!((jac[(0, 0)] - 0.5).abs() < 1e-14);
        assert!((jac[(1, 1)] - 0.5).abs() < 1e-14);
        assert!(jac[(0, 1)].abs() < 1e-14);
        assert!((mat_det(jac.view()) - 0.25).abs() < 1e-14);
    }

    #[test]
    fn test_jacobian_against_finite_difference_3d() {
        // perturbed trilinear hex
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 3).unwrap();
        let mut coord = Array2::zeros((8, 3));
        for n in 0..8 {
            let refn = trans.reference_node(n);
            for d in 0..3 {
                // deterministic perturbation up to 0.2
                let p = 0.2 * ((n * 3 + d) as f64 * 0.7).sin();
                coord[(n, d)] = refn[d] + p;
            }
        }

        let h = 1e-6;
        // 50 deterministic interior sample points
        for ipt in 0..50 {
            let t = ipt as f64;
            let xi = Array1::from_vec(vec![
                0.9 * (t * 0.7).sin(),
                0.9 * (t * 1.3 + 0.4).sin(),
                0.9 * (t * 2.1 + 1.1).sin(),
            ]);
            let jac = trans.jacobian(coord.view(), xi.view());
            for j in 0..3 {
                let mut xp = xi.clone();
                let mut xm = xi.clone();
                xp[j] += h;
                xm[j] -= h;
                let fp = trans.transform(coord.view(), xp.view());
                let fm = trans.transform(coord.view(), xm.view());
                for i in 0..3 {
                    let fd = (fp[i] - fm[i]) / (2.0 * h);
                    assert!((jac[(i, j)] - fd).abs() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn test_hessian_symmetry_and_fd() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 2, 2).unwrap();
        let mut coord = Array2::zeros((9, 2));
        for n in 0..9 {
            let refn = trans.reference_node(n);
            coord[(n, 0)] = refn[0] + 0.1 * (n as f64 * 0.9).cos();
            coord[(n, 1)] = refn[1] + 0.1 * (n as f64 * 1.3).sin();
        }
        let xi = array![0.2, -0.5];
        let hess = trans.hessian(coord.view(), xi.view());
        for k in 0..2 {
            for i in 0..2 {
                for j in 0..2 {
                    assert!((hess[(k, i, j)] - hess[(k, j, i)]).abs() < 1e-13);
                }
            }
        }

        // d/dxi_i of the jacobian column j
        let h = 1e-5;
        for i in 0..2 {
            let mut xp = xi.clone();
            let mut xm = xi.clone();
            xp[i] += h;
            xm[i] -= h;
            let jp = trans.jacobian(coord.view(), xp.view());
            let jm = trans.jacobian(coord.view(), xm.view());
            for k in 0..2 {
                for j in 0..2 {
                    let fd = (jp[(k, j)] - jm[(k, j)]) / (2.0 * h);
                    assert!((hess[(k, i, j)] - fd).abs() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn test_quad_face_nodes_orientation() {
        // matches the uniform mesh convention: right face bottom-to-top,
        // top face right-to-left, left face top-to-bottom, bottom left-to-right
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let el_nodes = [0usize, 5, 1, 6]; // BL, TL, BR, TR

        // axis 0 + side (right): face_nr = 2
        assert_eq!(trans.face_nodes(2, &el_nodes), vec![1, 6]);
        // axis 1 + side (top): face_nr = 3
        assert_eq!(trans.face_nodes(3, &el_nodes), vec![6, 5]);
        // axis 0 - side (left): face_nr = 0
        assert_eq!(trans.face_nodes(0, &el_nodes), vec![5, 0]);
        // axis 1 - side (bottom): face_nr = 1
        assert_eq!(trans.face_nodes(1, &el_nodes), vec![0, 1]);
    }

    #[test]
    fn test_face_normals_outward_quad() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let coord = unit_quad();
        let el_nodes = [0usize, 1, 2, 3];
        let centroid = trans.centroid(coord.view());

        for face_nr in 0..4 {
            let fnodes = trans.face_nodes(face_nr, &el_nodes);
            // face tangent from the two endpoint coordinates
            let p0 = coord.row(fnodes[0]);
            let p1 = coord.row(fnodes[1]);
            let tangent = array![[0.5 * (p1[0] - p0[0])], [0.5 * (p1[1] - p0[1])]];
            let n = calc_ortho(tangent.view());
            let mid = array![0.5 * (p0[0] + p1[0]), 0.5 * (p0[1] + p1[1])];
            let outward = (mid[0] - centroid[0]) * n[0] + (mid[1] - centroid[1]) * n[1];
            assert!(outward > 0.0, "face {face_nr} normal points inward");
        }
    }

    #[test]
    fn test_face_nr_lookup() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let el_nodes = [10usize, 11, 12, 13];
        for face_nr in 0..4 {
            let verts = trans.face_verts(face_nr, &el_nodes);
            assert_eq!(trans.face_nr_from_verts(&verts, &el_nodes), Some(face_nr));
        }
        assert_eq!(trans.face_nr_from_verts(&[10, 13], &el_nodes), None);
    }

    #[test]
    fn test_triangle_edges_ccw() {
        let trans = ElementTransformation::new(DomainType::Simplex, 1, 2).unwrap();
        let el_nodes = [7usize, 8, 9];
        assert_eq!(trans.face_nodes(0, &el_nodes), vec![7, 8]);
        assert_eq!(trans.face_nodes(1, &el_nodes), vec![8, 9]);
        assert_eq!(trans.face_nodes(2, &el_nodes), vec![9, 7]);
    }

    #[test]
    fn test_face_embedding_lands_on_face() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 3).unwrap();
        for face_nr in 0..6 {
            let s = array![0.3, -0.7];
            let xi = trans.face_ref_to_element_ref(face_nr, s.view());
            let (axis, positive) = if face_nr < 3 {
                (face_nr, false)
            } else {
                (face_nr - 3, true)
            };
            let expected = if positive { 1.0 } else { -1.0 };
            assert!((xi[axis] - expected).abs() < 1e-14);
        }
    }
}
