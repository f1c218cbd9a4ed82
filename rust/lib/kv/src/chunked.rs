//! Chunked value I/O against a pool context.
//!
//! Reads go through a fixed-size buffer: the backend returns at most one
//! buffer per call, and a short read marks the end of the object. Writes are a
//! single truncating `write_full` unless a maximum write size is configured,
//! in which case the value is split into offset writes.

use radoskv_pool::{IoContext, PoolError};
use tracing::trace;

/// Read an entire object, `chunk_size` bytes per backend call.
///
/// Terminates on the first short read, so an object whose length is an exact
/// multiple of `chunk_size` costs one extra (empty) read. A missing object
/// yields `PoolError::NotFound`.
pub fn read_object(ctx: &dyn IoContext, oid: &str, chunk_size: usize) -> Result<Vec<u8>, PoolError> {
    let mut result = Vec::new();
    let mut buf = vec![0u8; chunk_size];
    let mut offset: u64 = 0;
    loop {
        let count = ctx.read(oid, &mut buf, offset)?;
        result.extend_from_slice(&buf[..count]);
        if count < buf.len() {
            break;
        }
        offset += count as u64;
    }
    trace!(oid, len = result.len(), "object read");
    Ok(result)
}

/// Replace an object's value.
///
/// With `max_write_size == 0`, or a value that fits, this is one `write_full`.
/// Otherwise the first chunk is written with `write_full` (dropping any older,
/// longer value) and the remaining chunks with `write` at increasing offsets.
pub fn write_object(
    ctx: &dyn IoContext,
    oid: &str,
    data: &[u8],
    max_write_size: usize,
) -> Result<(), PoolError> {
    if max_write_size == 0 || data.len() <= max_write_size {
        return ctx.write_full(oid, data);
    }

    let mut chunks = data.chunks(max_write_size);
    let mut offset: u64 = 0;
    if let Some(first) = chunks.next() {
        ctx.write_full(oid, first)?;
        offset = first.len() as u64;
    }
    for chunk in chunks {
        ctx.write(oid, chunk, offset)?;
        offset += chunk.len() as u64;
    }
    trace!(oid, len = data.len(), max_write_size, "object written in chunks");
    Ok(())
}
