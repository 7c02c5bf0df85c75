//! On-disk format for [`CsrMatrix`] values.
//!
//! `_vectorization.py` persists matrices with `scipy.sparse.save_npz`, a
//! NumPy zip container this crate has no reason to reproduce byte-for-byte:
//! nothing downstream reads these files but this crate's own `load`. Matrices
//! are kept in compressed-sparse-row form and serialized as plain JSON
//! (`{n_rows, n_cols, indptr, indices, data}`) via `serde_json`, which is
//! already part of this crate's dependency stack. Files keep the `.npz`
//! extension to match the on-disk layout names used elsewhere.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vectorize::sparse::CsrMatrix;

#[derive(Serialize, Deserialize)]
struct SerializedMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl From<&CsrMatrix> for SerializedMatrix {
    fn from(m: &CsrMatrix) -> Self {
        Self {
            n_rows: m.n_rows,
            n_cols: m.n_cols,
            indptr: m.indptr.clone(),
            indices: m.indices.clone(),
            data: m.data.clone(),
        }
    }
}

impl From<SerializedMatrix> for CsrMatrix {
    fn from(s: SerializedMatrix) -> Self {
        Self {
            n_rows: s.n_rows,
            n_cols: s.n_cols,
            indptr: s.indptr,
            indices: s.indices,
            data: s.data,
        }
    }
}

/// Write `matrix` to `path`.
pub fn save(matrix: &CsrMatrix, path: &Path) -> Result<()> {
    let serialized = SerializedMatrix::from(matrix);
    let text = serde_json::to_string(&serialized)?;
    fs::write(path, text)?;
    Ok(())
}

/// Read a matrix previously written by [`save`].
pub fn load(path: &Path) -> Result<CsrMatrix> {
    let text = fs::read_to_string(path)?;
    let serialized: SerializedMatrix = serde_json::from_str(&text)?;
    Ok(serialized.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_matrix() {
        let matrix = CsrMatrix::from_rows(3, vec![vec![(0, 1.0), (2, 3.5)], vec![]]);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("title_counts.npz");
        save(&matrix, &path).expect("save");
        let restored = load(&path).expect("load");
        assert_eq!(restored, matrix);
    }
}
