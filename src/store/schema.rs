//! Vector store tables and sqlite-vec registration.

use rusqlite::Connection;
use std::sync::Once;

static SQLITE_VEC: Once = Once::new();

/// Register sqlite-vec as an auto extension for every connection opened afterwards.
pub fn register_sqlite_vec() {
    SQLITE_VEC.call_once(|| {
        // SAFETY: sqlite3_vec_init has the entry point signature sqlite expects.
        let rc = unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )))
        };
        if rc != rusqlite::ffi::SQLITE_OK {
            tracing::error!(code = rc, "Failed to register sqlite-vec extension");
        }
    });
}

/// Which optional virtual tables came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub vectors: bool,
    pub full_text: bool,
}

const DOCUMENTS_DDL: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    file_path TEXT NOT NULL DEFAULT '',
    text TEXT NOT NULL,
    payload JSON,
    content_hash TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_file_path ON documents(file_path);
";

/// Create `documents`, `vec_items` and `documents_fts`.
///
/// A failure on either virtual table is logged and reported through
/// [`Capabilities`]; the plain `documents` table is required.
///
/// # Errors
///
/// Returns `MapperError::StorageError` if `documents` cannot be created
pub fn create_tables(conn: &Connection, vector_size: usize) -> crate::types::Result<Capabilities> {
    conn.execute_batch(DOCUMENTS_DDL)?;

    let vec_ddl = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_items USING vec0(embedding float[{}] distance_metric=cosine)",
        vector_size
    );
    let vectors = match conn.execute_batch(&vec_ddl) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Could not create vec_items table, vector search disabled");
            false
        }
    };

    let full_text = match conn
        .execute_batch("CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(text, doc_id UNINDEXED)")
    {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Could not create documents_fts table, keyword search disabled");
            false
        }
    };

    Ok(Capabilities { vectors, full_text })
}

/// Little-endian f32 bytes, the blob layout vec0 expects.
pub fn serialize_f32(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_f32_layout() {
        let bytes = serialize_f32(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_tables_created() {
        register_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        let caps = create_tables(&conn, 4).unwrap();
        assert!(caps.vectors);
        assert!(caps.full_text);

        // idempotent
        let again = create_tables(&conn, 4).unwrap();
        assert_eq!(caps, again);
    }
}
