//! On-disk index format.
//!
//! ```text
//! offset  size  field
//! 0       8     magic "SEMIDX\0\0"
//! 8       4     format version (u32 LE)
//! 12      4     dimension (u32 LE)
//! 16      8     row count (u64 LE)
//! 24      8     side table length in bytes (u64 LE)
//! 32      32    SHA-256 of the body
//! 64      ..    body: rows * dimension f32 LE, then the JSON side table
//! ```

use crate::error::{Result, VectorStoreError};
use crate::store::RecordMeta;
use crate::types::{ChunkId, ChunkMetadata};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub const INDEX_MAGIC: &[u8; 8] = b"SEMIDX\0\0";
pub const INDEX_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct SideTableEntry {
    chunk_id: String,
    document_id: String,
    chunk_index: usize,
    #[serde(default)]
    metadata: ChunkMetadata,
    text_snippet: String,
    #[serde(default)]
    sentence_count: usize,
    #[serde(default)]
    inserted_at_unix_ms: u64,
}

pub(crate) struct DecodedIndex {
    pub dimension: usize,
    pub vectors: Vec<f32>,
    pub meta: Vec<RecordMeta>,
}

pub(crate) fn encode(dimension: usize, vectors: &[f32], meta: &[RecordMeta]) -> Result<Vec<u8>> {
    let side: Vec<SideTableEntry> = meta
        .iter()
        .map(|m| SideTableEntry {
            chunk_id: m.id.to_string(),
            document_id: m.id.document_id.clone(),
            chunk_index: m.id.chunk_index,
            metadata: m.metadata.clone(),
            text_snippet: m.content.clone(),
            sentence_count: m.sentence_count,
            inserted_at_unix_ms: m.inserted_at_unix_ms,
        })
        .collect();
    let side_json = serde_json::to_vec(&side)?;

    let mut body = Vec::with_capacity(vectors.len() * 4 + side_json.len());
    for value in vectors {
        body.extend_from_slice(&value.to_le_bytes());
    }
    body.extend_from_slice(&side_json);

    let dimension = u32::try_from(dimension)
        .map_err(|_| VectorStoreError::InvalidConfig(format!("dimension {dimension} too large")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&dimension.to_le_bytes());
    out.extend_from_slice(&(meta.len() as u64).to_le_bytes());
    out.extend_from_slice(&(side_json.len() as u64).to_le_bytes());
    out.extend_from_slice(&Sha256::digest(&body));
    out.extend_from_slice(&body);
    Ok(out)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<DecodedIndex> {
    if bytes.len() < HEADER_LEN {
        return Err(VectorStoreError::corruption(format!(
            "file too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..8] != INDEX_MAGIC {
        return Err(VectorStoreError::corruption("bad magic"));
    }
    let version = read_u32(&bytes[8..12]);
    if version != INDEX_FORMAT_VERSION {
        return Err(VectorStoreError::corruption(format!(
            "unsupported format version {version} (expected {INDEX_FORMAT_VERSION})"
        )));
    }
    let dimension = read_u32(&bytes[12..16]) as usize;
    let rows = usize::try_from(read_u64(&bytes[16..24]))
        .map_err(|_| VectorStoreError::corruption("row count overflows"))?;
    let side_len = usize::try_from(read_u64(&bytes[24..32]))
        .map_err(|_| VectorStoreError::corruption("side table length overflows"))?;
    let checksum = &bytes[32..64];
    let body = &bytes[HEADER_LEN..];

    let vector_bytes = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| VectorStoreError::corruption("vector section size overflows"))?;
    let expected = vector_bytes
        .checked_add(side_len)
        .ok_or_else(|| VectorStoreError::corruption("body size overflows"))?;
    if body.len() != expected {
        return Err(VectorStoreError::corruption(format!(
            "body is {} bytes, header announces {expected}",
            body.len()
        )));
    }
    if Sha256::digest(body).as_slice() != checksum {
        return Err(VectorStoreError::corruption("checksum mismatch"));
    }
    if dimension == 0 {
        return Err(VectorStoreError::corruption("zero dimension"));
    }

    let vectors: Vec<f32> = body[..vector_bytes]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if vectors.iter().any(|v| !v.is_finite()) {
        return Err(VectorStoreError::corruption("non-finite vector value"));
    }

    let side: Vec<SideTableEntry> = serde_json::from_slice(&body[vector_bytes..])
        .map_err(|e| VectorStoreError::corruption(format!("side table: {e}")))?;
    if side.len() != rows {
        return Err(VectorStoreError::corruption(format!(
            "side table has {} entries for {rows} rows",
            side.len()
        )));
    }

    let meta = side
        .into_iter()
        .map(|entry| {
            let id = ChunkId::new(entry.document_id, entry.chunk_index);
            if id.to_string() != entry.chunk_id {
                return Err(VectorStoreError::corruption(format!(
                    "chunk id {} does not match {id}",
                    entry.chunk_id
                )));
            }
            Ok(RecordMeta {
                id,
                metadata: entry.metadata,
                content: entry.text_snippet,
                sentence_count: entry.sentence_count,
                inserted_at_unix_ms: entry.inserted_at_unix_ms,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DecodedIndex {
        dimension,
        vectors,
        meta,
    })
}

/// Write `bytes` to `path` via a fsynced temporary file and a rename, so a
/// crash leaves either the old or the new file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<f32>, Vec<RecordMeta>) {
        let meta = vec![
            RecordMeta {
                id: ChunkId::new("doc-1", 0),
                metadata: ChunkMetadata {
                    patient_id: Some("P-7".to_string()),
                    ..Default::default()
                },
                content: "Patient has hypertension.".to_string(),
                sentence_count: 1,
                inserted_at_unix_ms: 42,
            },
            RecordMeta {
                id: ChunkId::new("doc-1", 1),
                metadata: ChunkMetadata::default(),
                content: "Treatment: ACE inhibitor 10mg daily.".to_string(),
                sentence_count: 1,
                inserted_at_unix_ms: 43,
            },
        ];
        (vec![1.0, 0.0, 0.0, 0.0, 0.6, 0.8], meta)
    }

    #[test]
    fn encoded_header_is_self_describing() {
        let (vectors, meta) = sample();
        let bytes = encode(3, &vectors, &meta).unwrap();
        assert_eq!(&bytes[0..8], INDEX_MAGIC);
        assert_eq!(read_u32(&bytes[8..12]), INDEX_FORMAT_VERSION);
        assert_eq!(read_u32(&bytes[12..16]), 3);
        assert_eq!(read_u64(&bytes[16..24]), 2);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimension, 3);
        assert_eq!(decoded.vectors, vectors);
        assert_eq!(decoded.meta, meta);
    }

    #[test]
    fn flipped_body_byte_is_detected() {
        let (vectors, meta) = sample();
        let mut bytes = encode(3, &vectors, &meta).unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0x01;
        let err = decode(&bytes).err().unwrap();
        assert!(err.to_string().contains("checksum mismatch"), "{err}");
    }

    #[test]
    fn truncated_and_foreign_files_are_rejected() {
        let (vectors, meta) = sample();
        let bytes = encode(3, &vectors, &meta).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(VectorStoreError::IndexCorruption(_))
        ));
        assert!(matches!(
            decode(b"not an index at all, just some text padding it out to 64+ bytes......"),
            Err(VectorStoreError::IndexCorruption(_))
        ));

        let mut wrong_version = bytes;
        wrong_version[8] = 9;
        assert!(matches!(
            decode(&wrong_version),
            Err(VectorStoreError::IndexCorruption(_))
        ));
    }

    #[tokio::test]
    async fn write_atomic_replaces_file_and_leaves_no_tmp() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.semidx");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        assert!(!tmp.path().join("nested").join("index.semidx.tmp").exists());
    }
}
