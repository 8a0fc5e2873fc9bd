// Chunk planning for entries larger than the chunk threshold
//
// A chunked body is stored as `chunk_count` values of `chunk_size` bytes (the
// last one may be shorter). A range read touches only the chunks that overlap
// the range and, within each, only the bytes inside it.

use bytes::{Bytes, BytesMut};

use crate::cache::entry::ChunkManifest;
use crate::cache::CacheError;
use crate::range::ByteRange;

/// The part of one chunk a read needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSlice {
    pub index: u32,
    /// Range inside the chunk, relative to the chunk start
    pub local: ByteRange,
}

/// Split a body into `chunk_size` pieces without copying
pub fn split_body(body: &Bytes, chunk_size: u64) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1) as usize;
    let mut chunks = Vec::with_capacity(body.len() / chunk_size + 1);
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + chunk_size).min(body.len());
        chunks.push(body.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Chunks (and the bytes within them) needed to serve `range`
///
/// `None` reads every chunk in full. The range must already be resolved
/// against the manifest's total size.
pub fn plan_read(manifest: &ChunkManifest, range: Option<ByteRange>) -> Vec<ChunkSlice> {
    let range = match range {
        Some(range) => range,
        None if manifest.total_size == 0 => return Vec::new(),
        None => ByteRange {
            start: 0,
            end: manifest.total_size - 1,
        },
    };

    manifest
        .covering(range)
        .filter_map(|index| {
            let bounds = manifest.chunk_bounds(index)?;
            let start = range.start.max(bounds.start) - bounds.start;
            let end = range.end.min(bounds.end) - bounds.start;
            Some(ChunkSlice {
                index,
                local: ByteRange { start, end },
            })
        })
        .collect()
}

/// Concatenate chunk slices, checking each one has the planned length
pub fn assemble(plan: &[ChunkSlice], parts: Vec<Bytes>) -> Result<Bytes, CacheError> {
    if plan.len() != parts.len() {
        return Err(CacheError::Corrupt(format!(
            "Expected {} chunk parts, got {}",
            plan.len(),
            parts.len()
        )));
    }

    // A single part needs no copy
    if parts.len() == 1 {
        let part = parts.into_iter().next().unwrap_or_default();
        check_len(&plan[0], &part)?;
        return Ok(part);
    }

    let total: usize = parts.iter().map(Bytes::len).sum();
    let mut body = BytesMut::with_capacity(total);
    for (slice, part) in plan.iter().zip(parts.iter()) {
        check_len(slice, part)?;
        body.extend_from_slice(part);
    }
    Ok(body.freeze())
}

fn check_len(slice: &ChunkSlice, part: &Bytes) -> Result<(), CacheError> {
    if part.len() as u64 != slice.local.len() {
        return Err(CacheError::Corrupt(format!(
            "Chunk {} returned {} bytes, expected {}",
            slice.index,
            part.len(),
            slice.local.len()
        )));
    }
    Ok(())
}
