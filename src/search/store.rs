//! Embedding containers backed by SQLite
//!
//! One container per modality. Each holds named float matrices whose rows
//! line up with the catalog. Vectors are stored as little-endian f32 BLOBs
//! and loaded fully into memory; the store is read-only after load.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, RetrievalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Text,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Text => "text",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "image" => Some(Modality::Image),
            "text" => Some(Modality::Text),
            _ => None,
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Modality::parse(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown modality '{s}' (expected image or text)"))
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A named matrix of row-aligned embeddings
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    pub modality: Modality,
    pub variant: String,
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingMatrix {
    /// Build a matrix, checking every row has the declared dimension
    pub fn new(
        modality: Modality,
        variant: impl Into<String>,
        dimension: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let variant = variant.into();
        if let Some((row, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
            return Err(RetrievalError::DataUnavailable(format!(
                "{variant}: row {row} has {} values, expected {dimension}",
                v.len()
            )));
        }

        Ok(Self {
            modality,
            variant,
            dimension,
            vectors,
        })
    }

    pub fn rows(&self) -> usize {
        self.vectors.len()
    }
}

/// All matrices of one modality, in container order
#[derive(Debug, Clone)]
pub struct EmbeddingSet {
    modality: Modality,
    matrices: Vec<EmbeddingMatrix>,
}

impl EmbeddingSet {
    pub fn new(modality: Modality, matrices: Vec<EmbeddingMatrix>) -> Self {
        Self { modality, matrices }
    }

    /// Load the `modality` embeddings at `path`. `.npz` archives are read
    /// directly; anything else is an SQLite container.
    pub fn open(path: &Path, modality: Modality) -> Result<Self> {
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("npz")) {
            super::npz::read_npz(path, modality)
        } else {
            Self::load(path)
        }
    }

    /// Load every matrix from the SQLite container at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RetrievalError::DataUnavailable(format!(
                "embedding container not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| RetrievalError::data(path.display(), e))?;
        let set = read_container(&conn).map_err(|e| match e {
            RetrievalError::DataUnavailable(msg) => {
                RetrievalError::DataUnavailable(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        tracing::info!(
            path = %path.display(),
            modality = %set.modality,
            variants = ?set.variants(),
            "embedding container loaded"
        );
        Ok(set)
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn variants(&self) -> Vec<&str> {
        self.matrices.iter().map(|m| m.variant.as_str()).collect()
    }

    pub fn get(&self, variant: &str) -> Option<&EmbeddingMatrix> {
        self.matrices.iter().find(|m| m.variant == variant)
    }

    pub fn matrices(&self) -> &[EmbeddingMatrix] {
        &self.matrices
    }

    /// First variant present from the caller's preference order
    pub fn select<S: AsRef<str>>(&self, preferred: &[S]) -> Result<&EmbeddingMatrix> {
        for (position, name) in preferred.iter().enumerate() {
            if let Some(matrix) = self.get(name.as_ref()) {
                if position > 0 {
                    tracing::info!(
                        modality = %self.modality,
                        variant = %matrix.variant,
                        "preferred variant absent, using fallback"
                    );
                }
                return Ok(matrix);
            }
        }

        let wanted: Vec<&str> = preferred.iter().map(|s| s.as_ref()).collect();
        Err(RetrievalError::DataUnavailable(format!(
            "no {} embeddings among [{}] (container has [{}])",
            self.modality,
            wanted.join(", "),
            self.variants().join(", ")
        )))
    }
}

fn read_container(conn: &Connection) -> Result<EmbeddingSet> {
    let sql = |e: rusqlite::Error| RetrievalError::DataUnavailable(e.to_string());

    let tag: Option<String> = conn
        .query_row(
            "SELECT value FROM container_meta WHERE key = 'modality'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql)?;
    let tag = tag.ok_or_else(|| RetrievalError::DataUnavailable("missing modality tag".to_string()))?;
    let modality = Modality::parse(&tag)
        .ok_or_else(|| RetrievalError::DataUnavailable(format!("unknown modality '{tag}'")))?;

    let mut stmt = conn
        .prepare("SELECT name, dimension, row_count FROM arrays ORDER BY rowid")
        .map_err(sql)?;
    let arrays: Vec<(String, i64, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .map_err(sql)?
        .collect::<std::result::Result<_, _>>()
        .map_err(sql)?;

    let mut vectors_stmt = conn
        .prepare("SELECT row_index, embedding FROM vectors WHERE array_name = ?1 ORDER BY row_index")
        .map_err(sql)?;

    let mut matrices = Vec::with_capacity(arrays.len());
    for (name, dimension, row_count) in arrays {
        let rows = vectors_stmt
            .query_map(params![name], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(sql)?;

        let mut vectors = Vec::new();
        for row in rows {
            let (row_index, blob) = row.map_err(sql)?;
            if row_index != vectors.len() as i64 {
                return Err(RetrievalError::DataUnavailable(format!(
                    "{name}: expected row {}, found row {row_index}",
                    vectors.len()
                )));
            }
            vectors.push(blob_to_embedding(&blob).ok_or_else(|| {
                RetrievalError::DataUnavailable(format!("{name}: row {row_index} is not f32 data"))
            })?);
        }

        if vectors.len() as i64 != row_count {
            return Err(RetrievalError::DataUnavailable(format!(
                "{name}: declares {row_count} rows, holds {}",
                vectors.len()
            )));
        }

        matrices.push(EmbeddingMatrix::new(modality, name, dimension as usize, vectors)?);
    }

    Ok(EmbeddingSet { modality, matrices })
}

/// Packages precomputed matrices into a container file
pub struct ContainerWriter {
    conn: Connection,
}

impl ContainerWriter {
    /// Create (or reopen) a container tagged with `modality`
    pub fn create(path: &Path, modality: Modality) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| RetrievalError::data(path.display(), e))?;
        let writer = Self { conn };
        writer
            .init_schema(modality)
            .map_err(|e| RetrievalError::data(path.display(), e))?;
        Ok(writer)
    }

    fn init_schema(&self, modality: Modality) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS container_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS arrays (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                row_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vectors (
                array_name TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (array_name, row_index),
                FOREIGN KEY (array_name) REFERENCES arrays(name) ON DELETE CASCADE
            );
            "#,
        )?;

        self.conn.execute(
            "INSERT INTO container_meta (key, value) VALUES ('modality', ?1) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![modality.as_str()],
        )?;
        Ok(())
    }

    /// Write (replacing any previous array of the same name) one matrix
    pub fn write_matrix(&mut self, name: &str, vectors: &[Vec<f32>]) -> Result<()> {
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if let Some(row) = vectors.iter().position(|v| v.len() != dimension) {
            return Err(RetrievalError::DataUnavailable(format!(
                "{name}: row {row} does not have {dimension} values"
            )));
        }

        let sql = |e: rusqlite::Error| RetrievalError::data(name, e);
        let tx = self.conn.transaction().map_err(sql)?;
        tx.execute("DELETE FROM vectors WHERE array_name = ?1", params![name])
            .map_err(sql)?;
        tx.execute(
            r#"
            INSERT INTO arrays (name, dimension, row_count) VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                dimension = excluded.dimension,
                row_count = excluded.row_count
            "#,
            params![name, dimension as i64, vectors.len() as i64],
        )
        .map_err(sql)?;
        {
            let mut insert = tx
                .prepare("INSERT INTO vectors (array_name, row_index, embedding) VALUES (?1, ?2, ?3)")
                .map_err(sql)?;
            for (row, vector) in vectors.iter().enumerate() {
                insert
                    .execute(params![name, row as i64, embedding_to_blob(vector)])
                    .map_err(sql)?;
            }
        }
        tx.commit().map_err(sql)?;
        Ok(())
    }
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding; `None` when the length is not a multiple of 4
fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_set(names: &[(&str, usize)]) -> EmbeddingSet {
        let matrices = names
            .iter()
            .map(|(name, dim)| EmbeddingMatrix::new(Modality::Text, *name, *dim, vec![vec![0.5; *dim]]).unwrap())
            .collect();
        EmbeddingSet::new(Modality::Text, matrices)
    }

    const TEXT_ORDER: [&str; 2] = ["title_embeddings_improved", "title_embeddings_basic"];

    #[test]
    fn test_select_prefers_improved() -> Result<()> {
        let set = text_set(&[("title_embeddings_basic", 384), ("title_embeddings_improved", 768)]);
        let matrix = set.select(&TEXT_ORDER)?;
        assert_eq!(matrix.variant, "title_embeddings_improved");
        assert_eq!(matrix.dimension, 768);
        Ok(())
    }

    #[test]
    fn test_select_falls_back_to_basic() -> Result<()> {
        let set = text_set(&[("title_embeddings_basic", 384)]);
        assert_eq!(set.select(&TEXT_ORDER)?.variant, "title_embeddings_basic");
        Ok(())
    }

    #[test]
    fn test_select_none_present() {
        let set = text_set(&[("description_embeddings", 384)]);
        assert!(matches!(
            set.select(&TEXT_ORDER),
            Err(RetrievalError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let err = EmbeddingMatrix::new(Modality::Image, "clip_embeddings", 3, vec![vec![1.0; 3], vec![1.0; 2]])
            .unwrap_err();
        assert!(matches!(err, RetrievalError::DataUnavailable(_)));
    }

    #[test]
    fn test_container_write_then_load() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visual.sqlite");

        let mut writer = ContainerWriter::create(&path, Modality::Image)?;
        writer.write_matrix("clip_embeddings", &[vec![1.0, 0.0], vec![0.0, -2.5], vec![0.25, 0.75]])?;
        writer.write_matrix("resnet_embeddings", &[vec![1.0; 4], vec![2.0; 4], vec![3.0; 4]])?;
        drop(writer);

        let set = EmbeddingSet::load(&path)?;
        assert_eq!(set.modality(), Modality::Image);
        assert_eq!(set.variants(), vec!["clip_embeddings", "resnet_embeddings"]);

        let clip = set.select(&["clip_embeddings"])?;
        assert_eq!(clip.dimension, 2);
        assert_eq!(clip.rows(), 3);
        assert_eq!(clip.vectors[1], vec![0.0, -2.5]);
        Ok(())
    }

    #[test]
    fn test_load_missing_container() {
        let err = EmbeddingSet::load(Path::new("/nonexistent/embeddings.sqlite")).unwrap_err();
        assert!(matches!(err, RetrievalError::DataUnavailable(_)));
    }

    #[test]
    fn test_load_rejects_row_count_mismatch() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textual.sqlite");

        let mut writer = ContainerWriter::create(&path, Modality::Text)?;
        writer.write_matrix("title_embeddings_basic", &[vec![1.0; 3], vec![2.0; 3]])?;
        writer
            .conn
            .execute("UPDATE arrays SET row_count = 5", [])
            .unwrap();
        drop(writer);

        assert!(matches!(
            EmbeddingSet::load(&path),
            Err(RetrievalError::DataUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_load_rejects_non_container_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.sqlite");
        std::fs::write(&path, b"definitely not sqlite").unwrap();

        assert!(matches!(
            EmbeddingSet::load(&path),
            Err(RetrievalError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_blob_conversion() {
        let embedding = vec![1.0, 2.0, 3.0, -0.5];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob_to_embedding(&blob), Some(embedding));
        assert_eq!(blob_to_embedding(&[0u8; 5]), None);
    }
}
