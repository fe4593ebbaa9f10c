//! NumPy `.npz` embedding archives
//!
//! Archives carry no modality tag, so the caller says which side of the
//! catalog they belong to. Every 2-D float array becomes one variant, named
//! after its entry without the `.npy` suffix. float64 arrays are narrowed
//! to f32.

use ndarray::Array2;
use ndarray_npy::{NpzReader, ReadNpzError};
use std::fs::File;
use std::path::Path;

use super::store::{ContainerWriter, EmbeddingMatrix, EmbeddingSet, Modality};
use crate::error::{Result, RetrievalError};

/// Read every float matrix in the archive at `path`
pub fn read_npz(path: &Path, modality: Modality) -> Result<EmbeddingSet> {
    if !path.exists() {
        return Err(RetrievalError::DataUnavailable(format!(
            "embedding archive not found: {}",
            path.display()
        )));
    }

    let file = File::open(path).map_err(|e| RetrievalError::data(path.display(), e))?;
    let mut npz = NpzReader::new(file).map_err(|e| RetrievalError::data(path.display(), e))?;
    let entries = npz
        .names()
        .map_err(|e| RetrievalError::data(path.display(), e))?;

    let mut matrices = Vec::with_capacity(entries.len());
    for entry in &entries {
        let variant = entry.strip_suffix(".npy").unwrap_or(entry);
        let array = match read_float_matrix(&mut npz, entry) {
            Ok(array) => array,
            Err(e) => {
                tracing::warn!(path = %path.display(), entry = %entry, error = %e, "skipping non-matrix entry");
                continue;
            }
        };

        let dimension = array.ncols();
        let vectors = array.outer_iter().map(|row| row.to_vec()).collect();
        matrices.push(EmbeddingMatrix::new(modality, variant, dimension, vectors)?);
    }

    let set = EmbeddingSet::new(modality, matrices);
    tracing::info!(
        path = %path.display(),
        %modality,
        variants = ?set.variants(),
        "embedding archive loaded"
    );
    Ok(set)
}

fn read_float_matrix(npz: &mut NpzReader<File>, entry: &str) -> std::result::Result<Array2<f32>, ReadNpzError> {
    let single: std::result::Result<Array2<f32>, ReadNpzError> = npz.by_name(entry);
    match single {
        Ok(array) => Ok(array),
        Err(_) => {
            let double: Array2<f64> = npz.by_name(entry)?;
            Ok(double.mapv(|v| v as f32))
        }
    }
}

/// Copy every matrix of an `.npz` archive into the SQLite container at
/// `output`, replacing arrays of the same name
pub fn import_npz(archive: &Path, modality: Modality, output: &Path) -> Result<EmbeddingSet> {
    let set = read_npz(archive, modality)?;
    if set.matrices().is_empty() {
        return Err(RetrievalError::DataUnavailable(format!(
            "{}: no float matrices to import",
            archive.display()
        )));
    }

    let mut writer = ContainerWriter::create(output, modality)?;
    for matrix in set.matrices() {
        writer.write_matrix(&matrix.variant, &matrix.vectors)?;
        tracing::debug!(variant = %matrix.variant, rows = matrix.rows(), "matrix imported");
    }

    tracing::info!(
        archive = %archive.display(),
        container = %output.display(),
        matrices = set.matrices().len(),
        "archive imported"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use ndarray_npy::NpzWriter;

    /// Writes an archive shaped like the offline pipeline's output
    fn write_archive(path: &Path) {
        let mut npz = NpzWriter::new(File::create(path).unwrap());
        npz.add_array(
            "title_embeddings_basic",
            &arr2(&[[0.1f32, 0.2, 0.3], [0.4, 0.5, 0.6]]),
        )
        .unwrap();
        npz.add_array("title_embeddings_improved", &arr2(&[[1.0f64, 0.0], [0.0, 1.0]]))
            .unwrap();
        npz.add_array("product_ids", &arr1(&[7i64, 9])).unwrap();
        npz.finish().unwrap();
    }

    #[test]
    fn test_read_npz_matrices() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings_textuels.npz");
        write_archive(&path);

        let set = read_npz(&path, Modality::Text)?;
        assert_eq!(set.modality(), Modality::Text);
        assert_eq!(set.matrices().len(), 2);

        let basic = set.select(&["title_embeddings_basic"])?;
        assert_eq!(basic.dimension, 3);
        assert_eq!(basic.vectors[1], vec![0.4, 0.5, 0.6]);

        let improved = set.select(&["title_embeddings_improved"])?;
        assert_eq!(improved.dimension, 2);
        assert_eq!(improved.vectors[0], vec![1.0, 0.0]);

        assert!(set.get("product_ids").is_none());
        Ok(())
    }

    #[test]
    fn test_import_into_container() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("embeddings_textuels.npz");
        let container = dir.path().join("embeddings_textual.sqlite");
        write_archive(&archive);

        let imported = import_npz(&archive, Modality::Text, &container)?;
        let loaded = EmbeddingSet::load(&container)?;

        assert_eq!(loaded.modality(), Modality::Text);
        assert_eq!(loaded.variants(), imported.variants());
        for matrix in imported.matrices() {
            let stored = loaded.get(&matrix.variant).unwrap();
            assert_eq!(stored.dimension, matrix.dimension);
            assert_eq!(stored.vectors, matrix.vectors);
        }
        Ok(())
    }

    #[test]
    fn test_missing_archive() {
        let err = read_npz(Path::new("/nonexistent/embeddings.npz"), Modality::Image).unwrap_err();
        assert!(matches!(err, RetrievalError::DataUnavailable(_)));
    }

    #[test]
    fn test_archive_without_matrices_is_not_imported() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ids.npz");
        let mut npz = NpzWriter::new(File::create(&archive).unwrap());
        npz.add_array("product_ids", &arr1(&[1i64, 2, 3])).unwrap();
        npz.finish().unwrap();

        let err = import_npz(&archive, Modality::Image, &dir.path().join("out.sqlite")).unwrap_err();
        assert!(matches!(err, RetrievalError::DataUnavailable(_)));
        assert!(!dir.path().join("out.sqlite").exists());
    }
}
