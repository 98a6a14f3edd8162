use hashbrown::HashMap;

use crate::error::SolverError;
use crate::fe::layout::FeLayout;
use crate::fespace::{BasisEval, FESpace};
use crate::geometry::face::{apply_orientation, compute_orientation, face_corner_nodes};
use crate::geometry::BoundaryCondition;
use crate::mesh::Mesh;

/// Match nodes on the current slab's spacetime-past boundary to nodes on the
/// past slab's spacetime-future boundary.
///
/// The time dimension is always the last; nodes are paired when all other
/// coordinates agree to 1e-8.
pub fn compute_st_node_connectivity(
    mesh_past: &Mesh,
    mesh_current: &Mesh,
) -> HashMap<usize, usize> {
    assert!(mesh_past.ndim > 1, "assumes at least a 2d spacetime mesh");
    let ndim = mesh_past.ndim;

    let mut past_connected = vec![false; mesh_past.n_nodes()];
    for ifac in mesh_past.bdy_face_start..mesh_past.bdy_face_end {
        let face = &mesh_past.faces[ifac];
        if face.bctype == BoundaryCondition::SpacetimeFuture {
            for &inode in &face.nodes {
                past_connected[inode] = true;
            }
        }
    }

    let mut current_connected = vec![false; mesh_current.n_nodes()];
    for ifac in mesh_current.bdy_face_start..mesh_current.bdy_face_end {
        let face = &mesh_current.faces[ifac];
        if face.bctype == BoundaryCondition::SpacetimePast {
            for &inode in &face.nodes {
                current_connected[inode] = true;
            }
        }
    }

    let past_nodes: Vec<usize> = (0..mesh_past.n_nodes())
        .filter(|&i| past_connected[i])
        .collect();

    let mut curr_to_past = HashMap::new();
    for inode_curr in 0..mesh_current.n_nodes() {
        if !current_connected[inode_curr] {
            continue;
        }
        for &inode_past in &past_nodes {
            let mut all_same = true;
            for idim in 0..(ndim - 1) {
                if (mesh_current.nodes[(inode_curr, idim)]
                    - mesh_past.nodes[(inode_past, idim)])
                    .abs()
                    > 1e-8
                {
                    all_same = false;
                    break;
                }
            }
            if all_same {
                curr_to_past.insert(inode_curr, inode_past);
                break;
            }
        }
    }
    curr_to_past
}

/// Connection between the current time slab and the one before it, used by
/// the spacetime-past boundary branch.
///
/// For each spacetime-past trace of the current space this precomputes the
/// matching past trace and the past element's basis evaluated at the current
/// trace's quadrature points (orientation corrected).
pub struct SpacetimeConnection {
    pub fespace_past: FESpace,
    pub u_past: Vec<f64>,
    pub layout_past: FeLayout,
    /// current trace index -> (past trace index, past basis evals per qp)
    pub connections: HashMap<usize, (usize, Vec<BasisEval>)>,
}

impl SpacetimeConnection {
    pub fn new(
        fespace_past: FESpace,
        u_past: Vec<f64>,
        layout_past: FeLayout,
        fespace_current: &FESpace,
    ) -> Result<Self, SolverError> {
        let node_map =
            compute_st_node_connectivity(&fespace_past.mesh, &fespace_current.mesh);

        let mut connections = HashMap::new();
        for itrace in fespace_current.bdy_trace_start..fespace_current.bdy_trace_end {
            let trace = &fespace_current.traces[itrace];
            let face = &fespace_current.mesh.faces[trace.facidx];
            if face.bctype != BoundaryCondition::SpacetimePast {
                continue;
            }

            // current face nodes mapped into the past mesh
            let mapped: Option<Vec<usize>> = face
                .nodes
                .iter()
                .map(|inode| node_map.get(inode).copied())
                .collect();
            let Some(mapped) = mapped else {
                return Err(SolverError::Geometry(format!(
                    "spacetime-past trace {itrace} has nodes without a past image"
                )));
            };
            let mut mapped_sorted = mapped.clone();
            mapped_sorted.sort_unstable();

            // find the past spacetime-future trace with the same node set
            let mut found = None;
            for jtrace in fespace_past.bdy_trace_start..fespace_past.bdy_trace_end {
                let past_trace = &fespace_past.traces[jtrace];
                let past_face = &fespace_past.mesh.faces[past_trace.facidx];
                if past_face.bctype != BoundaryCondition::SpacetimeFuture {
                    continue;
                }
                let mut past_nodes = past_face.nodes.clone();
                past_nodes.sort_unstable();
                if past_nodes == mapped_sorted {
                    found = Some(jtrace);
                    break;
                }
            }
            let Some(jtrace) = found else {
                return Err(SolverError::Geometry(format!(
                    "no past trace matches spacetime-past trace {itrace}"
                )));
            };

            // orientation between the two face parametrizations, matched on
            // the corner nodes
            let past_trace = &fespace_past.traces[jtrace];
            let past_face = &fespace_past.mesh.faces[past_trace.facidx];
            let df = fespace_current.mesh.ndim - 1;
            let verts_curr = face_corner_nodes(&mapped, face.geometry_order, df);
            let verts_past =
                face_corner_nodes(&past_face.nodes, past_face.geometry_order, df);
            let Some(orientation) = compute_orientation(&verts_curr, &verts_past, df)
            else {
                return Err(SolverError::Geometry(format!(
                    "spacetime traces {itrace} and {jtrace} have incompatible \
                     orientations"
                )));
            };

            // past element basis at the current trace quadrature points
            let past_el = past_trace.el_l;
            let past_basis = &fespace_past.el_ref(past_el).basis;
            let past_trans = fespace_past.mesh.transformation(past_el);
            let quadrule = &fespace_current.trace_ref(itrace).quadrule;
            let mut evals = Vec::with_capacity(quadrule.npoints());
            for ig in 0..quadrule.npoints() {
                let s = quadrule.points.row(ig);
                let u = apply_orientation(orientation, s, df);
                let xi_past = past_face.transform_xi_l(past_trans, u.view());
                evals.push(BasisEval::at_point(past_basis, xi_past.view()));
            }

            connections.insert(itrace, (jtrace, evals));
        }

        Ok(Self {
            fespace_past,
            u_past,
            layout_past,
            connections,
        })
    }

    /// The past element feeding a current spacetime-past trace.
    pub fn past_element(&self, itrace: usize) -> Option<usize> {
        self.connections
            .get(&itrace)
            .map(|(jtrace, _)| self.fespace_past.traces[*jtrace].el_l)
    }
}
