use ndarray::Array1;

use crate::fespace::FESpace;
use crate::geometry::BoundaryCondition;

/// Parametric constraint on a mesh node treated as a geometry unknown.
///
/// Each constraint is a map from m free parameters (m <= ndim) to the node's
/// ndim coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConstraint {
    /// all ndim coordinates are free
    Free,
    /// the node does not move (m = 0)
    Fixed,
    /// one coordinate is pinned to a value, the others slide
    /// (hyper-rectangle edges and walls)
    FixedComponent { icomp: usize, value: f64 },
}

impl NodeConstraint {
    pub fn nparam(&self, ndim: usize) -> usize {
        match self {
            NodeConstraint::Free => ndim,
            NodeConstraint::Fixed => 0,
            NodeConstraint::FixedComponent { .. } => ndim - 1,
        }
    }

    /// Reduce coordinates to the free parameters.
    pub fn to_params(&self, x: &[f64], params: &mut [f64]) {
        match self {
            NodeConstraint::Free => params.copy_from_slice(x),
            NodeConstraint::Fixed => {}
            NodeConstraint::FixedComponent { icomp, .. } => {
                let mut ip = 0;
                for (d, &xd) in x.iter().enumerate() {
                    if d != *icomp {
                        params[ip] = xd;
                        ip += 1;
                    }
                }
            }
        }
    }

    /// Expand the free parameters back to coordinates.
    pub fn from_params(&self, params: &[f64], x: &mut [f64]) {
        match self {
            NodeConstraint::Free => x.copy_from_slice(params),
            NodeConstraint::Fixed => {}
            NodeConstraint::FixedComponent { icomp, value } => {
                let mut ip = 0;
                for (d, xd) in x.iter_mut().enumerate() {
                    if d == *icomp {
                        *xd = *value;
                    } else {
                        *xd = params[ip];
                        ip += 1;
                    }
                }
            }
        }
    }
}

/// Node selection from a set of traces, excluding boundary nodes entirely.
///
/// inv_selected_nodes maps a global node index to its position in
/// selected_nodes, with n_selected as the "not selected" sentinel.
#[derive(Debug, Clone)]
pub struct NodesetDofMap {
    pub selected_traces: Vec<usize>,
    pub selected_nodes: Vec<usize>,
    pub inv_selected_nodes: Vec<usize>,
}

impl NodesetDofMap {
    pub fn new(selected_traces: Vec<usize>, fespace: &FESpace) -> Self {
        let is_boundary = fespace.mesh.flag_boundary_nodes();
        let mut selected_nodes: Vec<usize> = selected_traces
            .iter()
            .flat_map(|&itrace| {
                let facidx = fespace.traces[itrace].facidx;
                fespace.mesh.faces[facidx].nodes.iter().copied()
            })
            .filter(|&inode| !is_boundary[inode])
            .collect();
        selected_nodes.sort_unstable();
        selected_nodes.dedup();

        let inv_selected_nodes =
            invert_selection(&selected_nodes, fespace.mesh.n_nodes());
        Self {
            selected_traces,
            selected_nodes,
            inv_selected_nodes,
        }
    }
}

/// Geometry unknown map: the nodes of the selected traces with a parametric
/// constraint per node. Nodes on Dirichlet boundary faces are registered as
/// Fixed; other boundary parameterizations are set through `set_constraint`.
#[derive(Debug, Clone)]
pub struct GeoDofMap {
    pub ndim: usize,
    pub selected_traces: Vec<usize>,
    pub selected_nodes: Vec<usize>,
    pub inv_selected_nodes: Vec<usize>,
    pub constraints: Vec<NodeConstraint>,
}

impl GeoDofMap {
    pub fn new(selected_traces: Vec<usize>, fespace: &FESpace) -> Self {
        let mut selected_nodes: Vec<usize> = selected_traces
            .iter()
            .flat_map(|&itrace| {
                let facidx = fespace.traces[itrace].facidx;
                fespace.mesh.faces[facidx].nodes.iter().copied()
            })
            .collect();
        selected_nodes.sort_unstable();
        selected_nodes.dedup();

        let inv_selected_nodes =
            invert_selection(&selected_nodes, fespace.mesh.n_nodes());

        // dirichlet boundary nodes may not move
        let mut constraints = vec![NodeConstraint::Free; selected_nodes.len()];
        for face in &fespace.mesh.faces {
            if face.bctype == BoundaryCondition::Dirichlet {
                for &inode in &face.nodes {
                    let isel = inv_selected_nodes[inode];
                    if isel < selected_nodes.len() {
                        constraints[isel] = NodeConstraint::Fixed;
                    }
                }
            }
        }

        Self {
            ndim: fespace.mesh.ndim,
            selected_traces,
            selected_nodes,
            inv_selected_nodes,
            constraints,
        }
    }

    pub fn n_selected(&self) -> usize {
        self.selected_nodes.len()
    }

    /// Override the parametric constraint of a selected node.
    pub fn set_constraint(&mut self, inode: usize, constraint: NodeConstraint) {
        let isel = self.inv_selected_nodes[inode];
        if isel < self.selected_nodes.len() {
            self.constraints[isel] = constraint;
        }
    }

    pub fn nparam(&self, isel: usize) -> usize {
        self.constraints[isel].nparam(self.ndim)
    }

    /// Total length of the reduced geometry unknown vector.
    pub fn size(&self) -> usize {
        (0..self.n_selected()).map(|i| self.nparam(i)).sum()
    }
}

fn invert_selection(selected: &[usize], n_nodes: usize) -> Vec<usize> {
    let sentinel = selected.len();
    let mut inv = vec![sentinel; n_nodes];
    for (isel, &inode) in selected.iter().enumerate() {
        inv[inode] = isel;
    }
    inv
}

/// Layout of the reduced geometry vector: prefix sums of the per-node
/// parameter counts.
#[derive(Debug, Clone)]
pub struct GeoLayout {
    pub offsets: Vec<usize>,
}

impl GeoLayout {
    pub fn new(geo_map: &GeoDofMap) -> Self {
        let mut offsets = Vec::with_capacity(geo_map.n_selected() + 1);
        offsets.push(0);
        for isel in 0..geo_map.n_selected() {
            offsets.push(offsets.last().unwrap() + geo_map.nparam(isel));
        }
        Self { offsets }
    }

    pub fn size(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    pub fn nv(&self, isel: usize) -> usize {
        self.offsets[isel + 1] - self.offsets[isel]
    }

    pub fn index(&self, isel: usize, iv: usize) -> usize {
        debug_assert!(iv < self.nv(isel));
        self.offsets[isel] + iv
    }
}

/// Gather the reduced geometry vector from the current mesh coordinates.
pub fn extract_geospan(fespace: &FESpace, geo_map: &GeoDofMap, layout: &GeoLayout) -> Array1<f64> {
    let mut data = Array1::zeros(layout.size());
    let mut scratch = vec![0.0; geo_map.ndim];
    for (isel, &inode) in geo_map.selected_nodes.iter().enumerate() {
        let x: Vec<f64> = fespace.mesh.nodes.row(inode).to_vec();
        let m = geo_map.nparam(isel);
        geo_map.constraints[isel].to_params(&x, &mut scratch[..m]);
        for iv in 0..m {
            data[layout.index(isel, iv)] = scratch[iv];
        }
    }
    data
}

/// Push the reduced geometry vector back into the mesh through each node's
/// parametrization.
pub fn update_mesh_coords(
    data: &Array1<f64>,
    geo_map: &GeoDofMap,
    layout: &GeoLayout,
    fespace: &mut FESpace,
) {
    let ndim = geo_map.ndim;
    for (isel, &inode) in geo_map.selected_nodes.iter().enumerate() {
        let m = geo_map.nparam(isel);
        if m == 0 {
            continue;
        }
        let params: Vec<f64> =
            (0..m).map(|iv| data[layout.index(isel, iv)]).collect();
        let mut x: Vec<f64> = fespace.mesh.nodes.row(inode).to_vec();
        geo_map.constraints[isel].from_params(&params, &mut x);
        for d in 0..ndim {
            fespace.mesh.nodes[(inode, d)] = x[d];
        }
    }
}

/// Select the interior traces whose interface-conservation residual norm
/// meets the threshold. `ic_norms` is indexed like the trace list.
pub fn select_traces_by_ic(
    fespace: &FESpace,
    ic_norms: &[f64],
    threshold: f64,
) -> Vec<usize> {
    (fespace.interior_trace_start..fespace.interior_trace_end)
        .filter(|&itrace| ic_norms[itrace] >= threshold)
        .collect()
}

/// Layout of the interface-conservation residual: one block of
/// nbasis_trace * ncomp entries per selected trace.
#[derive(Debug, Clone)]
pub struct IcLayout {
    pub offsets: Vec<usize>,
    pub ncomp: usize,
}

impl IcLayout {
    pub fn new(fespace: &FESpace, geo_map: &GeoDofMap, ncomp: usize) -> Self {
        let mut offsets = Vec::with_capacity(geo_map.selected_traces.len() + 1);
        offsets.push(0);
        for &itrace in &geo_map.selected_traces {
            let nb = fespace.trace_ref(itrace).trace_basis.nbasis();
            offsets.push(offsets.last().unwrap() + nb * ncomp);
        }
        Self { offsets, ncomp }
    }

    pub fn size(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    pub fn index(&self, isel_trace: usize, itest: usize, iv: usize) -> usize {
        self.offsets[isel_trace] + itest * self.ncomp + iv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fespace::{BasisType, QuadratureType};
    use crate::mesh::uniform_quad_mesh;

    fn quad_space() -> FESpace {
        let mesh = uniform_quad_mesh(
            4,
            4,
            [-1.0, -1.0],
            [1.0, 1.0],
            [BoundaryCondition::Dirichlet; 4],
            [0; 4],
        )
        .unwrap();
        FESpace::new(mesh, BasisType::Lagrange, QuadratureType::GaussLegendre, 1).unwrap()
    }

    #[test]
    fn test_nodeset_traces_4_8_21() {
        let space = quad_space();
        let nodeset = NodesetDofMap::new(vec![4, 8, 21], &space);

        assert_eq!(nodeset.selected_traces, vec![4, 8, 21]);
        for node in [7, 12, 13, 18, 16, 17] {
            assert!(
                nodeset.selected_nodes.contains(&node),
                "node {node} missing"
            );
        }
        assert_eq!(nodeset.selected_nodes.len(), 6);

        // sentinel on everything else
        let sentinel = nodeset.selected_nodes.len();
        for inode in 0..25 {
            let sel = [7, 12, 13, 16, 17, 18].contains(&inode);
            if sel {
                assert!(nodeset.inv_selected_nodes[inode] < sentinel);
            } else {
                assert_eq!(nodeset.inv_selected_nodes[inode], sentinel);
            }
        }
    }

    #[test]
    fn test_nodeset_excludes_boundary_nodes() {
        let space = quad_space();
        // traces 5, 15, 17, 9, 0 touch boundary nodes which must be dropped
        let nodeset = NodesetDofMap::new(vec![5, 15, 17, 9, 0], &space);
        assert_eq!(nodeset.selected_nodes.len(), 6);
        for node in [6, 8, 11, 12, 13, 16] {
            assert!(nodeset.selected_nodes.contains(&node));
        }
    }

    #[test]
    fn test_geo_map_keeps_constrained_boundary_nodes() {
        let space = quad_space();
        let geo_map = GeoDofMap::new(vec![5, 15, 17, 9, 0], &space);
        assert_eq!(geo_map.n_selected(), 9);
        for node in [1, 6, 8, 9, 11, 12, 13, 16, 21] {
            assert!(geo_map.selected_nodes.contains(&node));
        }
        // boundary nodes of the dirichlet faces are pinned
        for node in [1, 9, 21] {
            let isel = geo_map.inv_selected_nodes[node];
            assert_eq!(geo_map.constraints[isel], NodeConstraint::Fixed);
            assert_eq!(geo_map.nparam(isel), 0);
        }
        // interior nodes carry both coordinates
        let isel12 = geo_map.inv_selected_nodes[12];
        assert_eq!(geo_map.nparam(isel12), 2);
        assert_eq!(geo_map.size(), 6 * 2);
    }

    #[test]
    fn test_geo_span_roundtrip() {
        let mut space = quad_space();
        let geo_map = GeoDofMap::new(vec![5, 15, 17, 9, 0], &space);
        let layout = GeoLayout::new(&geo_map);
        let mut data = extract_geospan(&space, &geo_map, &layout);

        let isel12 = geo_map.inv_selected_nodes[12];
        assert_eq!(data[layout.index(isel12, 0)], 0.0);
        assert_eq!(data[layout.index(isel12, 1)], 0.0);

        data[layout.index(isel12, 1)] = 0.05;
        update_mesh_coords(&data, &geo_map, &layout, &mut space);
        assert!((space.mesh.nodes[(12, 1)] - 0.05).abs() < 1e-15);
        // pinned nodes stayed put
        assert_eq!(space.mesh.nodes[(1, 1)], -1.0);
    }

    #[test]
    fn test_fixed_component_constraint() {
        let constraint = NodeConstraint::FixedComponent {
            icomp: 0,
            value: -1.0,
        };
        assert_eq!(constraint.nparam(2), 1);
        let mut params = [0.0];
        constraint.to_params(&[-1.0, 0.7], &mut params);
        assert_eq!(params, [0.7]);
        let mut x = [0.0, 0.0];
        constraint.from_params(&[0.9], &mut x);
        assert_eq!(x, [-1.0, 0.9]);
    }

    #[test]
    fn test_ic_selection_threshold() {
        let space = quad_space();
        let mut norms = vec![0.0; space.traces.len()];
        norms[3] = 0.5;
        norms[7] = 0.05;
        norms[30] = 2.0; // boundary trace: never selected
        let selected = select_traces_by_ic(&space, &norms, 0.1);
        assert_eq!(selected, vec![3]);
    }

    #[test]
    fn test_ic_layout_blocks() {
        let space = quad_space();
        let geo_map = GeoDofMap::new(vec![4, 8], &space);
        let layout = IcLayout::new(&space, &geo_map, 2);
        // p1 trace basis on a segment: 2 test functions x 2 components
        assert_eq!(layout.size(), 2 * 2 * 2);
        assert_eq!(layout.index(1, 0, 0), 4);
        assert_eq!(layout.index(1, 1, 1), 7);
    }
}
