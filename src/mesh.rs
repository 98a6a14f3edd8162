use ndarray::{Array1, Array2, ArrayView2};

use crate::error::SolverError;
use crate::geometry::face::{make_boundary_face, make_face, Face};
use crate::geometry::transforms::ElementTransformation;
use crate::geometry::{BoundaryCondition, DomainType};
use crate::linalg::Crs;

/// A geometric element: domain tag, geometry order, and its global nodes in
/// reference Lagrange order.
#[derive(Debug, Clone)]
pub struct GeoElement {
    pub domain: DomainType,
    pub order: usize,
    pub nodes: Vec<usize>,
    /// index into the mesh transformation table
    pub itrans: usize,
}

/// Mesh: nodes, elements, and faces sorted as
/// [interior | boundary | parallel].
#[derive(Debug, Clone)]
pub struct Mesh {
    pub ndim: usize,
    /// node coordinates, one row per node
    pub nodes: Array2<f64>,
    pub elements: Vec<GeoElement>,
    /// shared transformation records, one per (domain, order) key
    pub transformations: Vec<ElementTransformation>,
    pub faces: Vec<Face>,
    pub interior_face_start: usize,
    pub interior_face_end: usize,
    pub bdy_face_start: usize,
    pub bdy_face_end: usize,
    pub parallel_face_start: usize,
    pub parallel_face_end: usize,
    /// elements surrounding each node
    pub elsup: Crs<usize>,
}

impl Mesh {
    pub fn new(ndim: usize, nodes: Array2<f64>) -> Self {
        assert_eq!(nodes.ncols(), ndim);
        Self {
            ndim,
            nodes,
            elements: Vec::new(),
            transformations: Vec::new(),
            faces: Vec::new(),
            interior_face_start: 0,
            interior_face_end: 0,
            bdy_face_start: 0,
            bdy_face_end: 0,
            parallel_face_start: 0,
            parallel_face_end: 0,
            elsup: Crs::default(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.nrows()
    }

    pub fn n_elem(&self) -> usize {
        self.elements.len()
    }

    /// Add an element, sharing the transformation record for its
    /// (domain, order) key.
    pub fn add_element(
        &mut self,
        domain: DomainType,
        order: usize,
        nodes: Vec<usize>,
    ) -> Result<usize, SolverError> {
        let itrans = match self
            .transformations
            .iter()
            .position(|t| t.domain == domain && t.order == order)
        {
            Some(i) => i,
            None => {
                self.transformations
                    .push(ElementTransformation::new(domain, order, self.ndim)?);
                self.transformations.len() - 1
            }
        };
        let expected = self.transformations[itrans].nnode;
        if nodes.len() != expected {
            return Err(SolverError::Geometry(format!(
                "element has {} nodes, expected {expected}",
                nodes.len()
            )));
        }
        self.elements.push(GeoElement {
            domain,
            order,
            nodes,
            itrans,
        });
        Ok(self.elements.len() - 1)
    }

    pub fn transformation(&self, ielem: usize) -> &ElementTransformation {
        &self.transformations[self.elements[ielem].itrans]
    }

    /// Gather the coordinates of an element's nodes, one row per node.
    pub fn el_coord(&self, ielem: usize) -> Array2<f64> {
        let el = &self.elements[ielem];
        let mut coord = Array2::zeros((el.nodes.len(), self.ndim));
        for (i, &inode) in el.nodes.iter().enumerate() {
            coord.row_mut(i).assign(&self.nodes.row(inode));
        }
        coord
    }

    /// Physical centroid of an element.
    pub fn el_centroid(&self, ielem: usize) -> Array1<f64> {
        self.transformation(ielem).centroid(self.el_coord(ielem).view())
    }

    /// Elements surrounding each node, sorted and deduplicated.
    pub fn build_elsup(&mut self) {
        let mut ragged: Vec<Vec<usize>> = vec![Vec::new(); self.n_nodes()];
        for (ielem, el) in self.elements.iter().enumerate() {
            for &inode in &el.nodes {
                ragged[inode].push(ielem);
            }
        }
        for row in &mut ragged {
            row.sort_unstable();
            row.dedup();
        }
        self.elsup = Crs::from_ragged(&ragged);
    }

    /// Find and create all interior faces.
    ///
    /// Two elements share a face iff one face of each has the same vertex
    /// set; candidates come from the elements-surrounding-points map.
    pub fn find_interior_faces(&mut self) -> Result<(), SolverError> {
        self.build_elsup();

        for ielem in 0..self.n_elem() {
            let max_faces = self.transformation(ielem).nfaces;
            let mut connected: Vec<usize> = Vec::with_capacity(max_faces);

            let el_nodes = self.elements[ielem].nodes.clone();
            'node_loop: for &inode in &el_nodes {
                for &jelem in self.elsup.row(inode) {
                    if jelem <= ielem || connected.contains(&jelem) {
                        continue;
                    }
                    let face_opt = make_face(
                        ielem,
                        jelem,
                        self.transformation(ielem),
                        &self.elements[ielem].nodes,
                        self.transformation(jelem),
                        &self.elements[jelem].nodes,
                    )?;
                    if let Some(face) = face_opt {
                        self.faces.push(face);
                        connected.push(jelem);
                        if connected.len() == max_faces {
                            break 'node_loop;
                        }
                    }
                }
            }
        }
        self.interior_face_start = 0;
        self.interior_face_end = self.faces.len();
        self.bdy_face_start = self.faces.len();
        self.bdy_face_end = self.faces.len();
        Ok(())
    }

    /// Add a boundary face given its vertex set and boundary condition.
    /// The owning element is located through the elements-surrounding-points
    /// map; fails for an unrecognized vertex set.
    pub fn add_boundary_face(
        &mut self,
        verts: &[usize],
        bctype: BoundaryCondition,
        bcflag: usize,
    ) -> Result<(), SolverError> {
        for &inode in verts {
            for &ielem in self.elsup.row(inode) {
                let face_opt = make_boundary_face(
                    ielem,
                    self.transformation(ielem),
                    &self.elements[ielem].nodes,
                    verts,
                    bctype,
                    bcflag,
                )?;
                if let Some(face) = face_opt {
                    self.faces.push(face);
                    self.bdy_face_end = self.faces.len();
                    return Ok(());
                }
            }
        }
        Err(SolverError::Geometry(format!(
            "no element owns boundary face with vertices {verts:?}"
        )))
    }

    /// Freeze the face ordering; faces must already be sorted as
    /// [interior | boundary | parallel].
    pub fn finalize_faces(&mut self) -> Result<(), SolverError> {
        #[derive(PartialEq, PartialOrd)]
        enum Cat {
            Interior,
            Boundary,
            Parallel,
        }
        let cat = |f: &Face| match f.bctype {
            BoundaryCondition::Interior => Cat::Interior,
            BoundaryCondition::ParallelCom => Cat::Parallel,
            _ => Cat::Boundary,
        };
        for w in self.faces.windows(2) {
            if cat(&w[0]) > cat(&w[1]) {
                return Err(SolverError::Geometry(
                    "faces are not sorted as [interior | boundary | parallel]".into(),
                ));
            }
        }
        let n_int = self
            .faces
            .iter()
            .filter(|f| f.bctype == BoundaryCondition::Interior)
            .count();
        let n_par = self
            .faces
            .iter()
            .filter(|f| f.bctype == BoundaryCondition::ParallelCom)
            .count();
        self.interior_face_start = 0;
        self.interior_face_end = n_int;
        self.bdy_face_start = n_int;
        self.bdy_face_end = self.faces.len() - n_par;
        self.parallel_face_start = self.bdy_face_end;
        self.parallel_face_end = self.faces.len();
        Ok(())
    }

    /// True for every node that lies on a non-interior face.
    pub fn flag_boundary_nodes(&self) -> Vec<bool> {
        let mut is_boundary = vec![false; self.n_nodes()];
        for face in &self.faces {
            if face.bctype != BoundaryCondition::Interior {
                for &inode in &face.nodes {
                    is_boundary[inode] = true;
                }
            }
        }
        is_boundary
    }

    /// Check that every face normal points from the left element outward
    /// (and into the right element for interior faces), testing at the face
    /// centroid. Returns the offending face indices.
    pub fn validate_normals(&self) -> Vec<usize> {
        let mut invalid = Vec::new();
        let s_mid = Array1::zeros(self.ndim.saturating_sub(1));
        for (ifac, face) in self.faces.iter().enumerate() {
            let x_fac = face.transform(self.nodes.view(), s_mid.view());
            let normal = face.normal(self.nodes.view(), s_mid.view());

            let centroid_l = self.el_centroid(face.elem_l);
            let dot_l: f64 = (0..self.ndim)
                .map(|d| normal[d] * (centroid_l[d] - x_fac[d]))
                .sum();
            if dot_l >= 0.0 {
                invalid.push(ifac);
                continue;
            }
            if face.bctype == BoundaryCondition::Interior {
                let centroid_r = self.el_centroid(face.elem_r);
                let dot_r: f64 = (0..self.ndim)
                    .map(|d| normal[d] * (centroid_r[d] - x_fac[d]))
                    .sum();
                if dot_r <= 0.0 {
                    invalid.push(ifac);
                }
            }
        }
        invalid
    }

    /// Perturb every non-fixed node through the given map.
    pub fn perturb_nodes<F>(&mut self, mut perturb: F, fixed: &[bool])
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        for inode in 0..self.n_nodes() {
            if fixed[inode] {
                continue;
            }
            let old: Vec<f64> = self.nodes.row(inode).to_vec();
            let mut new = old.clone();
            perturb(&old, &mut new);
            for d in 0..self.ndim {
                self.nodes[(inode, d)] = new[d];
            }
        }
    }

    /// Axis-aligned bounding box of the node set: (xmin, xmax).
    pub fn bounding_box(&self) -> (Array1<f64>, Array1<f64>) {
        let mut xmin = Array1::from_elem(self.ndim, f64::INFINITY);
        let mut xmax = Array1::from_elem(self.ndim, f64::NEG_INFINITY);
        for inode in 0..self.n_nodes() {
            for d in 0..self.ndim {
                xmin[d] = xmin[d].min(self.nodes[(inode, d)]);
                xmax[d] = xmax[d].max(self.nodes[(inode, d)]);
            }
        }
        (xmin, xmax)
    }

    /// Minimum |det J| over the reference points of an element sampled by
    /// the given quadrature abscissae.
    pub fn min_abs_det_jacobian(&self, ielem: usize, abscissae: ArrayView2<f64>) -> f64 {
        let trans = self.transformation(ielem);
        let coord = self.el_coord(ielem);
        let mut detj = f64::INFINITY;
        for ig in 0..abscissae.nrows() {
            let jac = trans.jacobian(coord.view(), abscissae.row(ig));
            detj = detj.min(crate::geometry::mat_det(jac.view()).abs());
        }
        detj
    }
}

/// Uniform quadrilateral mesh of [xmin, xmax] with nx * ny cells.
///
/// Node ordering is row major (x fastest), elements row major by cell.
/// Interior faces come first (x-normal faces row by row, then y-normal
/// faces), then boundary faces (left/right per row, then bottom/top per
/// column). bcs and bcflags are (left, bottom, right, top).
pub fn uniform_quad_mesh(
    nx: usize,
    ny: usize,
    xmin: [f64; 2],
    xmax: [f64; 2],
    bcs: [BoundaryCondition; 4],
    bcflags: [usize; 4],
) -> Result<Mesh, SolverError> {
    let nnx = nx + 1;
    let nny = ny + 1;
    let dx = (xmax[0] - xmin[0]) / nx as f64;
    let dy = (xmax[1] - xmin[1]) / ny as f64;

    let mut nodes = Array2::zeros((nnx * nny, 2));
    for iy in 0..nny {
        for ix in 0..nnx {
            nodes[(iy * nnx + ix, 0)] = xmin[0] + ix as f64 * dx;
            nodes[(iy * nnx + ix, 1)] = xmin[1] + iy as f64 * dy;
        }
    }

    let mut mesh = Mesh::new(2, nodes);
    let node_at = |ix: usize, iy: usize| iy * nnx + ix;
    for iy in 0..ny {
        for ix in 0..nx {
            // local order: BL, TL, BR, TR
            mesh.add_element(
                DomainType::Hypercube,
                1,
                vec![
                    node_at(ix, iy),
                    node_at(ix, iy + 1),
                    node_at(ix + 1, iy),
                    node_at(ix + 1, iy + 1),
                ],
            )?;
        }
    }
    mesh.build_elsup();
    let cell = |ix: usize, iy: usize| iy * nx + ix;

    // interior faces with x-normals, then y-normals
    for iy in 0..ny {
        for ix in 1..nx {
            let face = make_face(
                cell(ix - 1, iy),
                cell(ix, iy),
                mesh.transformation(cell(ix - 1, iy)),
                &mesh.elements[cell(ix - 1, iy)].nodes,
                mesh.transformation(cell(ix, iy)),
                &mesh.elements[cell(ix, iy)].nodes,
            )?
            .expect("adjacent cells share a face");
            mesh.faces.push(face);
        }
    }
    for iy in 1..ny {
        for ix in 0..nx {
            let face = make_face(
                cell(ix, iy - 1),
                cell(ix, iy),
                mesh.transformation(cell(ix, iy - 1)),
                &mesh.elements[cell(ix, iy - 1)].nodes,
                mesh.transformation(cell(ix, iy)),
                &mesh.elements[cell(ix, iy)].nodes,
            )?
            .expect("adjacent cells share a face");
            mesh.faces.push(face);
        }
    }

    // boundary faces: left/right per row, then bottom/top per column
    for iy in 0..ny {
        mesh.add_boundary_face(
            &[node_at(0, iy), node_at(0, iy + 1)],
            bcs[0],
            bcflags[0],
        )?;
        mesh.add_boundary_face(
            &[node_at(nx, iy), node_at(nx, iy + 1)],
            bcs[2],
            bcflags[2],
        )?;
    }
    for ix in 0..nx {
        mesh.add_boundary_face(&[node_at(ix, 0), node_at(ix + 1, 0)], bcs[1], bcflags[1])?;
        mesh.add_boundary_face(
            &[node_at(ix, ny), node_at(ix + 1, ny)],
            bcs[3],
            bcflags[3],
        )?;
    }

    mesh.finalize_faces()?;
    Ok(mesh)
}

/// The 12-node, 6-element quad mesh used by the Burgers space-time problem:
/// Dirichlet on the bottom and both sides, spacetime-future on top.
/// The `initial` variant is the undeformed unit-strip mesh.
pub fn burgers_linear_mesh(initial: bool) -> Result<Mesh, SolverError> {
    let coords: Vec<[f64; 2]> = if initial {
        vec![
            [0.00, 0.00],
            [0.25, 0.00],
            [0.75, 0.00],
            [1.00, 0.00],
            [0.00, 0.25],
            [0.25, 0.25],
            [0.75, 0.25],
            [1.00, 0.25],
            [0.00, 0.50],
            [0.25, 0.50],
            [0.75, 0.50],
            [1.00, 0.50],
        ]
    } else {
        vec![
            [0.00, 0.00],
            [0.25, 0.00],
            [0.75, 0.00],
            [1.00, 0.00],
            [0.00, 0.125],
            [0.50, 0.125],
            [0.50, 0.125],
            [1.00, 0.125],
            [0.00, 0.50],
            [0.25, 0.50],
            [0.50, 0.50],
            [1.00, 0.50],
        ]
    };
    let mut nodes = Array2::zeros((coords.len(), 2));
    for (i, c) in coords.iter().enumerate() {
        nodes[(i, 0)] = c[0];
        nodes[(i, 1)] = c[1];
    }

    let mut mesh = Mesh::new(2, nodes);
    for conn in [
        [0usize, 4, 1, 5],
        [1, 5, 2, 6],
        [2, 6, 3, 7],
        [4, 8, 5, 9],
        [5, 9, 6, 10],
        [6, 10, 7, 11],
    ] {
        mesh.add_element(DomainType::Hypercube, 1, conn.to_vec())?;
    }
    mesh.find_interior_faces()?;

    use BoundaryCondition::{Dirichlet, SpacetimeFuture};
    for verts in [[0usize, 1], [1, 2], [2, 3], [0, 4], [4, 8], [3, 7], [7, 11]] {
        mesh.add_boundary_face(&verts, Dirichlet, 0)?;
    }
    for verts in [[8usize, 9], [9, 10], [10, 11]] {
        mesh.add_boundary_face(&verts, SpacetimeFuture, 0)?;
    }
    mesh.finalize_faces()?;
    Ok(mesh)
}
