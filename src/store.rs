//! Node vector loading.
//!
//! The embedding file is the output of an external random-walk tool:
//!
//! ```text
//! 2708 400
//! 35 0.0132 -0.2210 ... 0.0871
//! 1033 0.1200 0.0042 ... -0.3317
//! ```
//!
//! The header line is discarded. Every other non-blank line is a node id
//! followed by exactly `D` values. Rows are exposed sorted by node id, so
//! row `i` of [`VectorStore::vectors`] belongs to `ids()[i]`.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::error::{Error, Result};

/// Id-sorted dense matrix of node vectors.
#[derive(Debug, Clone)]
pub struct VectorStore {
    ids: Vec<u64>,
    vectors: Array2<f32>,
}

impl VectorStore {
    /// Read an embedding file from disk.
    ///
    /// When `expected_dim` is `None`, the dimension is taken from the
    /// header's second field, or from the first data row if the header does
    /// not carry one. Every row must agree with it.
    pub fn open(path: impl AsRef<Path>, expected_dim: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_reader(BufReader::new(file), expected_dim).map_err(|e| match e {
            Error::Io { source, .. } => Error::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), nodes = store.len(), dim = store.dim(), "loaded node vectors");
        Ok(store)
    }

    /// Parse an embedding file from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R, expected_dim: Option<usize>) -> Result<Self> {
        let mut dim = expected_dim;
        let mut rows: Vec<(u64, usize, Vec<f32>)> = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|source| Error::Io {
                path: Default::default(),
                source,
            })?;
            if line_no == 1 {
                if dim.is_none() {
                    dim = header_dim(&line);
                }
                continue;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let id_field = fields.next().unwrap_or_default();
            let id: u64 = id_field
                .parse()
                .map_err(|_| Error::malformed(line_no, format!("unparsable node id '{id_field}'")))?;

            let values = fields
                .map(|f| {
                    f.parse::<f32>()
                        .map_err(|_| Error::malformed(line_no, format!("unparsable value '{f}'")))
                })
                .collect::<Result<Vec<f32>>>()?;

            if values.is_empty() {
                return Err(Error::malformed(line_no, format!("node {id} has no vector values")));
            }
            let d = *dim.get_or_insert(values.len());
            if values.len() != d {
                return Err(Error::malformed(
                    line_no,
                    format!("expected {} fields, found {}", d + 1, values.len() + 1),
                ));
            }
            if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
                return Err(Error::malformed(line_no, format!("non-finite value in column {bad}")));
            }
            rows.push((id, line_no, values));
        }

        let d = match dim {
            Some(d) if !rows.is_empty() && d > 0 => d,
            _ => return Err(Error::EmptyInput),
        };

        rows.sort_by_key(|(id, line, _)| (*id, *line));
        if let Some(w) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Error::malformed(
                w[1].1,
                format!("duplicate node id {} (first seen on line {})", w[0].0, w[0].1),
            ));
        }

        let n = rows.len();
        let mut ids = Vec::with_capacity(n);
        let mut flat = Vec::with_capacity(n * d);
        for (id, _, values) in rows {
            ids.push(id);
            flat.extend(values);
        }
        let vectors = Array2::from_shape_vec((n, d), flat).map_err(|e| Error::ShapeMismatch {
            expected: format!("{n}x{d}"),
            actual: e.to_string(),
        })?;

        Ok(Self { ids, vectors })
    }

    /// Node ids in row order (ascending).
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// The N x D matrix.
    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Vector dimensionality.
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    /// Row index of a node id.
    pub fn row_of(&self, id: u64) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Map ground-truth labels onto row order as dense class indices.
    ///
    /// Class indices follow the sorted order of the distinct label names, so
    /// the mapping is stable across runs.
    pub fn align_labels(&self, labels: &HashMap<u64, String>) -> Result<Vec<usize>> {
        let names: BTreeSet<&str> = self
            .ids
            .iter()
            .filter_map(|id| labels.get(id).map(String::as_str))
            .collect();
        let index: HashMap<&str, usize> = names.into_iter().enumerate().map(|(i, s)| (s, i)).collect();

        self.ids
            .iter()
            .map(|id| {
                labels
                    .get(id)
                    .map(|name| index[name.as_str()])
                    .ok_or(Error::MissingLabel { node: *id })
            })
            .collect()
    }
}

/// Dimension from a `<node-count> <dim>` header, if it has one.
fn header_dim(header: &str) -> Option<usize> {
    let mut fields = header.split_whitespace();
    fields.next()?.parse::<u64>().ok()?;
    fields.next()?.parse::<usize>().ok().filter(|&d| d > 0)
}

/// Parse ground-truth labels, one `<node_id> ... <label>` row per line.
///
/// Only the first and last fields are read, so citation `.content` files
/// (id, bag-of-words columns, class) load directly.
pub fn read_labels<R: BufRead>(reader: R) -> Result<HashMap<u64, String>> {
    let mut labels = HashMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| Error::Io {
            path: Default::default(),
            source,
        })?;
        let mut fields = line.split_whitespace();
        let Some(id_field) = fields.next() else {
            continue;
        };
        let Some(label) = fields.last() else {
            return Err(Error::malformed(line_no, "missing label field"));
        };
        let id: u64 = id_field
            .parse()
            .map_err(|_| Error::malformed(line_no, format!("unparsable node id '{id_field}'")))?;
        labels.insert(id, label.to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "3 2\n7 0.5 1.5\n2 -1.0 0.25\n\n4 3.0 3.0\n";

    #[test]
    fn test_rows_sorted_by_id() {
        let store = VectorStore::from_reader(SAMPLE.as_bytes(), None).unwrap();
        assert_eq!(store.ids(), &[2, 4, 7]);
        assert_eq!(store.dim(), 2);
        assert_eq!(store.vectors()[[0, 0]], -1.0);
        assert_eq!(store.vectors()[[2, 1]], 1.5);
        assert_eq!(store.row_of(4), Some(1));
        assert_eq!(store.row_of(5), None);
    }

    #[test]
    fn test_short_row_is_malformed() {
        let text = "2 3\n1 0.1 0.2 0.3\n2 0.1 0.2\n";
        let err = VectorStore::from_reader(text.as_bytes(), Some(3)).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_bad_node_id_is_malformed() {
        let text = "1 2\nnode7 0.1 0.2\n";
        let err = VectorStore::from_reader(text.as_bytes(), None).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { line: 2, .. }));
    }

    #[test]
    fn test_duplicate_id_is_malformed() {
        let text = "2 1\n5 0.1\n5 0.2\n";
        assert!(matches!(
            VectorStore::from_reader(text.as_bytes(), None),
            Err(Error::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(matches!(
            VectorStore::from_reader("0 400\n".as_bytes(), None),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_align_labels_dense_and_sorted() {
        let store = VectorStore::from_reader(SAMPLE.as_bytes(), None).unwrap();
        let labels = read_labels("7 1 0 Theory\n2 0 1 Neural_Networks\n4 1 1 Theory\n".as_bytes()).unwrap();
        let aligned = store.align_labels(&labels).unwrap();
        // ids 2, 4, 7 -> Neural_Networks=0, Theory=1
        assert_eq!(aligned, vec![0, 1, 1]);
    }

    #[test]
    fn test_align_labels_missing_node() {
        let store = VectorStore::from_reader(SAMPLE.as_bytes(), None).unwrap();
        let labels = read_labels("7 A\n2 B\n".as_bytes()).unwrap();
        assert!(matches!(
            store.align_labels(&labels),
            Err(Error::MissingLabel { node: 4 })
        ));
    }

    #[test]
    fn test_header_sets_dimension() {
        // The first data row is the short one; the header says D = 3.
        let text = "2 3\n1 0.1 0.2\n2 0.1 0.2 0.3\n";
        let err = VectorStore::from_reader(text.as_bytes(), None).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { line: 2, .. }), "{err}");
    }

    #[test]
    fn test_headerless_dimension_from_first_row() {
        let text = "embeddings\n1 0.1 0.2\n2 0.3 0.4\n";
        let store = VectorStore::from_reader(text.as_bytes(), None).unwrap();
        assert_eq!(store.dim(), 2);
        assert_eq!(store.len(), 2);
    }
}
