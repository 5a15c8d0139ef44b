//! Chunked socket reads
//!
//! The relay never frames payloads. A chunk is whatever the peer has
//! delivered so far: one awaited read, then further pieces that are already
//! sitting in the socket buffer, up to [`chunk_limit`] bytes in total.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Reads of `buffer_size` bytes coalesced into one chunk at most
pub const MAX_COALESCED_READS: usize = 16;

/// Largest chunk [`read_chunk`] returns for a given read size
pub fn chunk_limit(buffer_size: usize) -> usize {
    buffer_size.saturating_mul(MAX_COALESCED_READS)
}

/// Read the next chunk from `stream`, `buffer_size` bytes per read and at
/// most [`chunk_limit`] bytes overall. Anything beyond the limit stays in
/// the socket for the next call.
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything. Cancel safe: the only await point is the first read.
pub async fn read_chunk(stream: &mut TcpStream, buffer_size: usize) -> io::Result<Option<Bytes>> {
    let limit = chunk_limit(buffer_size);
    let mut buffer = vec![0u8; buffer_size];
    let n = stream.read(&mut buffer).await?;
    if n == 0 {
        return Ok(None);
    }

    let mut chunk = BytesMut::with_capacity(n);
    chunk.extend_from_slice(&buffer[..n]);

    while chunk.len() < limit {
        let room = (limit - chunk.len()).min(buffer_size);
        match stream.try_read(&mut buffer[..room]) {
            Ok(0) => break,
            Ok(n) => chunk.extend_from_slice(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            // Surfaced by the next read; keep what already arrived
            Err(_) => break,
        }
    }

    Ok(Some(chunk.freeze()))
}
