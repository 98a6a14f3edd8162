/// Maps (element, local dof) pairs to global dofs for a DG space:
/// per-element contiguous blocks laid out by a prefix sum.
#[derive(Debug, Clone, Default)]
pub struct DgDofMap {
    /// offsets[iel] is the first global dof of element iel;
    /// offsets[nelem] the total count
    pub offsets: Vec<usize>,
}

impl DgDofMap {
    pub fn new(ndof_per_el: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(ndof_per_el.len() + 1);
        offsets.push(0);
        for &n in ndof_per_el {
            offsets.push(offsets.last().unwrap() + n);
        }
        Self { offsets }
    }

    pub fn nelem(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn ndof_el(&self, iel: usize) -> usize {
        self.offsets[iel + 1] - self.offsets[iel]
    }

    pub fn global(&self, iel: usize, idof: usize) -> usize {
        debug_assert!(idof < self.ndof_el(iel));
        self.offsets[iel] + idof
    }

    /// Total number of degrees of freedom.
    pub fn size(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    pub fn size_with_ncomp(&self, ncomp: usize) -> usize {
        self.size() * ncomp
    }

    pub fn max_el_size(&self, ncomp: usize) -> usize {
        (0..self.nelem())
            .map(|iel| self.ndof_el(iel) * ncomp)
            .max()
            .unwrap_or(0)
    }
}

/// Isoparametric CG map: the mesh nodes are the degrees of freedom,
/// global(iel, idof) = element.nodes[idof].
#[derive(Debug, Clone, Default)]
pub struct CgDofMap {
    pub conn: Vec<Vec<usize>>,
    pub n_nodes: usize,
}

impl CgDofMap {
    pub fn new(conn: Vec<Vec<usize>>, n_nodes: usize) -> Self {
        Self { conn, n_nodes }
    }

    pub fn nelem(&self) -> usize {
        self.conn.len()
    }

    pub fn ndof_el(&self, iel: usize) -> usize {
        self.conn[iel].len()
    }

    pub fn global(&self, iel: usize, idof: usize) -> usize {
        self.conn[iel][idof]
    }

    pub fn size(&self) -> usize {
        self.n_nodes
    }
}
