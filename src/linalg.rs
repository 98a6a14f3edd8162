use ndarray::{Array1, Array2, ArrayView1};

/// Compressed row storage for ragged connectivity data.
#[derive(Debug, Clone, Default)]
pub struct Crs<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
}

impl<T: Clone> Crs<T> {
    pub fn from_ragged(ragged: &[Vec<T>]) -> Self {
        let mut offsets = Vec::with_capacity(ragged.len() + 1);
        offsets.push(0);
        let mut data = Vec::new();
        for row in ragged {
            data.extend_from_slice(row);
            offsets.push(data.len());
        }
        Self { data, offsets }
    }

    pub fn nrow(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, irow: usize) -> &[T] {
        &self.data[self.offsets[irow]..self.offsets[irow + 1]]
    }
}

/// Sparse matrix in CSR form, assembled from triplets.
///
/// Duplicate entries are summed during assembly; the sparsity pattern is
/// determined once from the element/face incidence and refilled per
/// iteration.
#[derive(Debug, Clone)]
pub struct SparseMat {
    pub nrows: usize,
    pub ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMat {
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Self {
        // count entries per row after dedup
        let mut sorted: Vec<(usize, usize, f64)> = triplets.to_vec();
        sorted.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut row_ptr = vec![0usize; nrows + 1];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();

        let mut iter = sorted.into_iter().peekable();
        while let Some((r, c, mut v)) = iter.next() {
            while let Some(&(r2, c2, v2)) = iter.peek() {
                if r2 == r && c2 == c {
                    v += v2;
                    iter.next();
                } else {
                    break;
                }
            }
            row_ptr[r + 1] += 1;
            col_idx.push(c);
            values.push(v);
        }
        for r in 0..nrows {
            row_ptr[r + 1] += row_ptr[r];
        }
        Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// y = A x
    pub fn matvec(&self, x: ArrayView1<f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.ncols);
        let mut y = Array1::zeros(self.nrows);
        for r in 0..self.nrows {
            let mut acc = 0.0;
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                acc += self.values[k] * x[self.col_idx[k]];
            }
            y[r] = acc;
        }
        y
    }

    /// y = A^T x
    pub fn matvec_transpose(&self, x: ArrayView1<f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.nrows);
        let mut y = Array1::zeros(self.ncols);
        for r in 0..self.nrows {
            let xr = x[r];
            if xr == 0.0 {
                continue;
            }
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                y[self.col_idx[k]] += self.values[k] * xr;
            }
        }
        y
    }

    /// Euclidean norm of each column.
    pub fn column_norms(&self) -> Array1<f64> {
        let mut norms = Array1::zeros(self.ncols);
        for k in 0..self.values.len() {
            norms[self.col_idx[k]] += self.values[k] * self.values[k];
        }
        norms.mapv_inplace(f64::sqrt);
        norms
    }

    /// Densify; only for the explicitly formed subproblem and tests.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for r in 0..self.nrows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                dense[(r, self.col_idx[k])] = self.values[k];
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_crs_rows() {
        let ragged = vec![vec![1usize, 2], vec![], vec![3, 4, 5]];
        let crs = Crs::from_ragged(&ragged);
        assert_eq!(crs.nrow(), 3);
        assert_eq!(crs.nnz(), 5);
        assert_eq!(crs.row(0), &[1, 2]);
        assert_eq!(crs.row(1), &[] as &[usize]);
        assert_eq!(crs.row(2), &[3, 4, 5]);
    }

    #[test]
    fn test_sparse_matvec_and_transpose() {
        // [[1, 2, 0], [0, 3, 4]] with a duplicate triplet summed
        let triplets = vec![
            (0, 0, 1.0),
            (0, 1, 1.5),
            (0, 1, 0.5),
            (1, 1, 3.0),
            (1, 2, 4.0),
        ];
        let a = SparseMat::from_triplets(2, 3, &triplets);
        assert_eq!(a.nnz(), 4);

        let x = array![1.0, 2.0, 3.0];
        let y = a.matvec(x.view());
        assert!((y[0] - 5.0).abs() < 1e-14);
        assert!((y[1] - 18.0).abs() < 1e-14);

        let z = a.matvec_transpose(array![1.0, 1.0].view());
        assert!((z[0] - 1.0).abs() < 1e-14);
        assert!((z[1] - 5.0).abs() < 1e-14);
        assert!((z[2] - 4.0).abs() < 1e-14);

        let norms = a.column_norms();
        assert!((norms[1] - (4.0f64 + 9.0).sqrt()).abs() < 1e-14);
    }
}
