//! Minimal compressed-sparse-row matrix and the handful of operations the
//! vectorization stage needs.
//!
//! Grounded in `_vectorization.py`, which leans on `scipy.sparse` for the
//! same operations (`normalize(..., norm="l1")`, `.dot()`, `sparse.spdiags`).
//! No sparse-matrix crate is part of this crate's dependency stack, so this
//! implements only the operations `_vectorization.py` actually performs:
//! row-wise L1 normalization, left-multiplication by a collapse operator,
//! right-multiplication by a diagonal, and element-wise combination.

/// A sparse matrix in compressed-sparse-row form: `indptr[i]..indptr[i+1]`
/// indexes into `indices`/`data` for the nonzero entries of row `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub n_rows: usize,
    pub n_cols: usize,
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
    pub data: Vec<f64>,
}

impl CsrMatrix {
    /// Build from one sparse row (unordered `(col, value)` pairs, zero
    /// values dropped) per matrix row.
    pub fn from_rows(n_cols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for mut row in rows {
            row.retain(|&(_, v)| v != 0.0);
            row.sort_by_key(|&(c, _)| c);
            for (col, val) in row {
                indices.push(col);
                data.push(val);
            }
            indptr.push(indices.len());
        }
        Self {
            n_rows: indptr.len() - 1,
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.indptr[i];
        let end = self.indptr[i + 1];
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.data[start..end].iter().copied())
    }

    /// Divide each row by the sum of its entries (rows that sum to zero are
    /// left as all-zero rows, matching `sklearn.preprocessing.normalize`).
    pub fn l1_normalize_rows(&self) -> Self {
        let mut rows = Vec::with_capacity(self.n_rows);
        for i in 0..self.n_rows {
            let row: Vec<(usize, f64)> = self.row(i).collect();
            let total: f64 = row.iter().map(|&(_, v)| v.abs()).sum();
            if total == 0.0 {
                rows.push(Vec::new());
            } else {
                rows.push(row.into_iter().map(|(c, v)| (c, v / total)).collect());
            }
        }
        Self::from_rows(self.n_cols, rows)
    }

    /// Element-wise mean of same-shape matrices.
    pub fn mean(matrices: &[CsrMatrix]) -> Self {
        assert!(!matrices.is_empty(), "mean of zero matrices is undefined");
        let n_rows = matrices[0].n_rows;
        let n_cols = matrices[0].n_cols;
        let n = matrices.len() as f64;
        let mut rows = Vec::with_capacity(n_rows);
        for i in 0..n_rows {
            let mut sums: std::collections::BTreeMap<usize, f64> = std::collections::BTreeMap::new();
            for m in matrices {
                for (col, val) in m.row(i) {
                    *sums.entry(col).or_insert(0.0) += val;
                }
            }
            rows.push(sums.into_iter().map(|(c, v)| (c, v / n)).collect());
        }
        Self::from_rows(n_cols, rows)
    }

    /// Number of rows (documents) in which each column has a nonzero value.
    pub fn column_doc_counts(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.n_cols];
        for i in 0..self.n_rows {
            for (col, val) in self.row(i) {
                if val != 0.0 {
                    counts[col] += 1;
                }
            }
        }
        counts
    }

    /// Right-multiply by a diagonal matrix given as a vector of its entries:
    /// scales column `j` of every row by `diag[j]`.
    pub fn right_multiply_diag(&self, diag: &[f64]) -> Self {
        assert_eq!(diag.len(), self.n_cols);
        let mut rows = Vec::with_capacity(self.n_rows);
        for i in 0..self.n_rows {
            rows.push(self.row(i).map(|(c, v)| (c, v * diag[c])).collect());
        }
        Self::from_rows(self.n_cols, rows)
    }

    /// Left-multiply this matrix by a collapse operator `M` (`self · Mᵀ`):
    /// for every full-vocabulary column, fold its value into the reduced
    /// column(s) `M` maps it to. `M` has `M.n_cols == self.n_cols` (the full
    /// vocabulary) and `M.n_rows` columns in the result (the reduced
    /// vocabulary).
    pub fn apply_collapse(&self, m: &CsrMatrix) -> Self {
        assert_eq!(m.n_cols, self.n_cols);
        // full-vocabulary column -> (reduced row, weight) entries of M, so
        // applying `self · Mᵀ` is a single pass over each row's nonzeros.
        let mut col_to_targets: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.n_cols];
        for j in 0..m.n_rows {
            for (col, weight) in m.row(j) {
                col_to_targets[col].push((j, weight));
            }
        }

        let mut rows = Vec::with_capacity(self.n_rows);
        for i in 0..self.n_rows {
            let mut out: std::collections::BTreeMap<usize, f64> = std::collections::BTreeMap::new();
            for (col, val) in self.row(i) {
                for &(target, weight) in &col_to_targets[col] {
                    *out.entry(target).or_insert(0.0) += val * weight;
                }
            }
            rows.push(out.into_iter().collect());
        }
        Self::from_rows(m.n_rows, rows)
    }
}
