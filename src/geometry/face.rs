use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::basis::Basis;
use crate::error::SolverError;
use crate::geometry::transforms::ElementTransformation;
use crate::geometry::{
    calc_ortho, mat_det, pack_face_info, unpack_face_info, BoundaryCondition, DomainType,
};

/// An interface between two geometric elements.
///
/// For a boundary face the real element is the left element and the right
/// element aliases it (`elem_r == elem_l`, `face_info_r == 0`). The stored
/// node list is in the left element's face reference order, so the tangent
/// frame induces a normal pointing outward from the left element.
#[derive(Debug, Clone)]
pub struct Face {
    pub elem_l: usize,
    pub elem_r: usize,
    pub face_info_l: usize,
    pub face_info_r: usize,
    pub domain_l: DomainType,
    pub domain_r: DomainType,
    pub geometry_order: usize,
    pub ndim: usize,
    /// face node indices in face reference order
    pub nodes: Vec<usize>,
    pub bctype: BoundaryCondition,
    pub bcflag: usize,
    face_basis: Basis,
}

impl Face {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        elem_l: usize,
        elem_r: usize,
        face_info_l: usize,
        face_info_r: usize,
        domain_l: DomainType,
        domain_r: DomainType,
        geometry_order: usize,
        ndim: usize,
        nodes: Vec<usize>,
        bctype: BoundaryCondition,
        bcflag: usize,
    ) -> Result<Self, SolverError> {
        let face_basis = Basis::new(DomainType::Hypercube, ndim - 1, geometry_order)?;
        Ok(Self {
            elem_l,
            elem_r,
            face_info_l,
            face_info_r,
            domain_l,
            domain_r,
            geometry_order,
            ndim,
            nodes,
            bctype,
            bcflag,
            face_basis,
        })
    }

    pub fn face_nr_l(&self) -> usize {
        unpack_face_info(self.face_info_l).0
    }

    pub fn face_nr_r(&self) -> usize {
        unpack_face_info(self.face_info_r).0
    }

    pub fn orientation_r(&self) -> usize {
        unpack_face_info(self.face_info_r).1
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Map a face reference point to the physical domain.
    pub fn transform(&self, coord: ArrayView2<f64>, s: ArrayView1<f64>) -> Array1<f64> {
        let shp = self.face_basis.eval(s);
        let mut x = Array1::zeros(self.ndim);
        for (n, &inode) in self.nodes.iter().enumerate() {
            for d in 0..self.ndim {
                x[d] += coord[(inode, d)] * shp[n];
            }
        }
        x
    }

    /// The ndim x (ndim - 1) tangent frame dx/ds at the face point.
    pub fn jacobian(&self, coord: ArrayView2<f64>, s: ArrayView1<f64>) -> Array2<f64> {
        let deriv = self.face_basis.eval_deriv(s);
        let mut jac = Array2::zeros((self.ndim, self.ndim - 1));
        for (n, &inode) in self.nodes.iter().enumerate() {
            for i in 0..self.ndim {
                for j in 0..(self.ndim - 1) {
                    jac[(i, j)] += coord[(inode, i)] * deriv[(n, j)];
                }
            }
        }
        jac
    }

    /// Riemannian metric tensor g = J^T J of the surface map.
    pub fn riemannian_metric(&self, jac: ArrayView2<f64>) -> Array2<f64> {
        let d = self.ndim - 1;
        let mut g = Array2::zeros((d, d));
        for k in 0..d {
            for l in 0..d {
                for i in 0..self.ndim {
                    g[(k, l)] += jac[(i, k)] * jac[(i, l)];
                }
            }
        }
        g
    }

    /// sqrt(det(J^T J)); the surface measure scale at the face point.
    pub fn root_riemann_metric(&self, jac: ArrayView2<f64>) -> f64 {
        if self.ndim == 1 {
            return 1.0;
        }
        mat_det(self.riemannian_metric(jac).view()).sqrt()
    }

    /// Non-normalized normal vector pointing outward from the left element.
    pub fn normal(&self, coord: ArrayView2<f64>, s: ArrayView1<f64>) -> Array1<f64> {
        if self.ndim == 1 {
            // point face: sign from which side of the left element we are on
            let mut n = Array1::zeros(1);
            n[0] = if self.face_nr_l() == 1 { 1.0 } else { -1.0 };
            return n;
        }
        calc_ortho(self.jacobian(coord, s).view())
    }

    /// Face reference point to the left element's reference domain.
    pub fn transform_xi_l(
        &self,
        trans_l: &ElementTransformation,
        s: ArrayView1<f64>,
    ) -> Array1<f64> {
        trans_l.face_ref_to_element_ref(self.face_nr_l(), s)
    }

    /// Face reference point to the right element's reference domain,
    /// correcting for the relative orientation.
    pub fn transform_xi_r(
        &self,
        trans_r: &ElementTransformation,
        s: ArrayView1<f64>,
    ) -> Array1<f64> {
        let u = apply_orientation(self.orientation_r(), s, self.ndim - 1);
        trans_r.face_ref_to_element_ref(self.face_nr_r(), u.view())
    }
}

/// Decode a permutation of n items from its Lehmer index.
fn permutation_from_index(mut index: usize, n: usize) -> Vec<usize> {
    let mut factorial = vec![1usize; n + 1];
    for i in 1..=n {
        factorial[i] = factorial[i - 1] * i;
    }
    let mut pool: Vec<usize> = (0..n).collect();
    let mut perm = Vec::with_capacity(n);
    for i in (0..n).rev() {
        let f = factorial[i];
        let k = index / f;
        index %= f;
        perm.push(pool.remove(k));
    }
    perm
}

/// Apply an orientation of the (ndim-1)-cube symmetry group:
/// u_i = sign_i * s_{perm[i]} with
/// orientation = perm_index * 2^df + sign_bits.
pub fn apply_orientation(orientation: usize, s: ArrayView1<f64>, df: usize) -> Array1<f64> {
    if df == 0 {
        return Array1::zeros(0);
    }
    let sign_bits = orientation & ((1 << df) - 1);
    let perm = permutation_from_index(orientation >> df, df);
    let mut u = Array1::zeros(df);
    for i in 0..df {
        let sign = if (sign_bits >> i) & 1 == 1 { -1.0 } else { 1.0 };
        u[i] = sign * s[perm[i]];
    }
    u
}

/// Face-lexicographic index of a vertex multi-index over {0,1}^df,
/// last axis fastest.
fn vert_lex_index(bits: &[usize]) -> usize {
    bits.iter().fold(0, |acc, &b| acc * 2 + b)
}

/// Corner entries of a face node list (face-lexicographic order with
/// order + 1 nodes per axis), in face vertex order.
pub fn face_corner_nodes(nodes: &[usize], order: usize, df: usize) -> Vec<usize> {
    let m = order + 1;
    let nvert = 1usize << df;
    (0..nvert)
        .map(|iv| {
            let mut idx = 0;
            for i in 0..df {
                let bit = (iv >> (df - 1 - i)) & 1;
                idx = idx * m + if bit == 1 { order } else { 0 };
            }
            nodes[idx]
        })
        .collect()
}

/// Find the orientation of the right face: the symmetry O with
/// verts_l[lex(v)] == verts_r[lex(O(v))] for every face vertex position v.
pub fn compute_orientation(verts_l: &[usize], verts_r: &[usize], df: usize) -> Option<usize> {
    if df == 0 {
        return if verts_l == verts_r { Some(0) } else { None };
    }
    let nvert = 1usize << df;
    let nfact: usize = (1..=df).product();

    for perm_idx in 0..nfact {
        let perm = permutation_from_index(perm_idx, df);
        'signs: for sign_bits in 0..(1usize << df) {
            for iv in 0..nvert {
                // vertex position v as bits, last axis fastest
                let mut v = vec![0usize; df];
                for i in 0..df {
                    v[i] = (iv >> (df - 1 - i)) & 1;
                }
                // u_i = sign_i * v_{perm[i]} with coordinates in {-1, +1}
                let mut u = vec![0usize; df];
                for i in 0..df {
                    let flip = (sign_bits >> i) & 1 == 1;
                    u[i] = if flip { 1 - v[perm[i]] } else { v[perm[i]] };
                }
                if verts_l[vert_lex_index(&v)] != verts_r[vert_lex_index(&u)] {
                    continue 'signs;
                }
            }
            return Some((perm_idx << df) | sign_bits);
        }
    }
    None
}

/// Try to build the interior face shared by two elements; None when they do
/// not share a complete face.
#[allow(clippy::too_many_arguments)]
pub fn make_face(
    ielem: usize,
    jelem: usize,
    trans_l: &ElementTransformation,
    nodes_l: &[usize],
    trans_r: &ElementTransformation,
    nodes_r: &[usize],
) -> Result<Option<Face>, SolverError> {
    let ndim = trans_l.ndim;
    for face_nr_l in 0..trans_l.nfaces {
        let verts_l = trans_l.face_verts(face_nr_l, nodes_l);
        let mut sorted_l = verts_l.clone();
        sorted_l.sort_unstable();

        for face_nr_r in 0..trans_r.nfaces {
            let verts_r = trans_r.face_verts(face_nr_r, nodes_r);
            let mut sorted_r = verts_r.clone();
            sorted_r.sort_unstable();
            if sorted_l != sorted_r {
                continue;
            }

            let Some(orientation) = compute_orientation(&verts_l, &verts_r, ndim - 1) else {
                return Err(SolverError::Geometry(format!(
                    "elements {ielem} and {jelem} share vertices of a face \
                     but no orientation matches"
                )));
            };
            let face = Face::new(
                ielem,
                jelem,
                pack_face_info(face_nr_l, 0),
                pack_face_info(face_nr_r, orientation),
                trans_l.domain,
                trans_r.domain,
                trans_l.order.max(trans_r.order),
                ndim,
                trans_l.face_nodes(face_nr_l, nodes_l),
                BoundaryCondition::Interior,
                0,
            )?;
            return Ok(Some(face));
        }
    }
    Ok(None)
}

/// Build a boundary face of an element from the vertex set given in a
/// boundary condition list.
pub fn make_boundary_face(
    ielem: usize,
    trans: &ElementTransformation,
    el_nodes: &[usize],
    face_verts: &[usize],
    bctype: BoundaryCondition,
    bcflag: usize,
) -> Result<Option<Face>, SolverError> {
    let Some(face_nr) = trans.face_nr_from_verts(face_verts, el_nodes) else {
        return Ok(None);
    };
    let face = Face::new(
        ielem,
        ielem,
        pack_face_info(face_nr, 0),
        0,
        trans.domain,
        trans.domain,
        trans.order,
        trans.ndim,
        trans.face_nodes(face_nr, el_nodes),
        bctype,
        bcflag,
    )?;
    Ok(Some(face))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_orientation_identity_and_flip_1d() {
        // segment faces have two orientations
        assert_eq!(compute_orientation(&[3, 7], &[3, 7], 1), Some(0));
        assert_eq!(compute_orientation(&[3, 7], &[7, 3], 1), Some(1));
        assert_eq!(compute_orientation(&[3, 7], &[3, 8], 1), None);
    }

    #[test]
    fn test_apply_orientation_flip() {
        let s = array![0.25];
        let u = apply_orientation(1, s.view(), 1);
        assert!((u[0] + 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_orientation_2d_faces() {
        // identity
        let verts = [0usize, 1, 2, 3];
        assert_eq!(compute_orientation(&verts, &verts, 2), Some(0));

        // swap the two face axes: v = (a, b) matches u = (b, a)
        // lex order: (0,0) (0,1) (1,0) (1,1) -> [0, 2, 1, 3]
        let swapped = [0usize, 2, 1, 3];
        let orientation = compute_orientation(&verts, &swapped, 2).unwrap();
        let s = array![0.5, -0.25];
        let u = apply_orientation(orientation, s.view(), 2);
        assert!((u[0] + 0.25).abs() < 1e-15);
        assert!((u[1] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_make_face_two_quads() {
        // two unit quads side by side sharing the segment {1, 4}
        // node grid: 0 (0,0), 1 (1,0), 2 (2,0), 3 (0,1), 4 (1,1), 5 (2,1)
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let nodes_l = [0usize, 3, 1, 4]; // BL TL BR TR
        let nodes_r = [1usize, 4, 2, 5];

        let face = make_face(0, 1, &trans, &nodes_l, &trans, &nodes_r)
            .unwrap()
            .expect("quads share a face");
        assert_eq!(face.elem_l, 0);
        assert_eq!(face.elem_r, 1);
        // right face of the left element, bottom-to-top
        assert_eq!(face.nodes, vec![1, 4]);
        assert_eq!(face.face_nr_l(), 2);
        // left face of the right element runs top-to-bottom: reversed
        assert_eq!(face.face_nr_r(), 0);
        assert_eq!(face.orientation_r(), 1);
    }

    #[test]
    fn test_face_transforms_agree_across_elements() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let nodes_l = [0usize, 3, 1, 4];
        let nodes_r = [1usize, 4, 2, 5];
        let coord = array![
            [0.0, 0.0],
            [1.0, 0.0],
            [2.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, 1.0]
        ];
        let face = make_face(0, 1, &trans, &nodes_l, &trans, &nodes_r)
            .unwrap()
            .unwrap();

        let coords_l: Array2<f64> = ndarray::stack(
            ndarray::Axis(0),
            &nodes_l.iter().map(|&n| coord.row(n)).collect::<Vec<_>>(),
        )
        .unwrap();
        let coords_r: Array2<f64> = ndarray::stack(
            ndarray::Axis(0),
            &nodes_r.iter().map(|&n| coord.row(n)).collect::<Vec<_>>(),
        )
        .unwrap();

        for &sval in &[-1.0, -0.3, 0.4, 1.0] {
            let s = array![sval];
            let x_face = face.transform(coord.view(), s.view());
            let xi_l = face.transform_xi_l(&trans, s.view());
            let xi_r = face.transform_xi_r(&trans, s.view());
            let x_l = trans.transform(coords_l.view(), xi_l.view());
            let x_r = trans.transform(coords_r.view(), xi_r.view());
            for d in 0..2 {
                assert!((x_face[d] - x_l[d]).abs() < 1e-13);
                assert!((x_face[d] - x_r[d]).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn test_normal_outward_between_quads() {
        let trans = ElementTransformation::new(DomainType::Hypercube, 1, 2).unwrap();
        let nodes_l = [0usize, 3, 1, 4];
        let nodes_r = [1usize, 4, 2, 5];
        let coord = array![
            [0.0, 0.0],
            [1.0, 0.0],
            [2.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, 1.0]
        ];
        let face = make_face(0, 1, &trans, &nodes_l, &trans, &nodes_r)
            .unwrap()
            .unwrap();
        let n = face.normal(coord.view(), array![0.0].view());
        // must point from the left element (x < 1) to the right (x > 1)
        assert!(n[0] > 0.0);
        assert!(n[1].abs() < 1e-14);
    }
}
