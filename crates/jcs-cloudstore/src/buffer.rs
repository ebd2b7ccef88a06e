//! Recycled buffers for streaming staged files to and from clouds

use crate::{ObjectStream, Result, DEFAULT_BUFFER_SIZE};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default number of idle buffers kept by a pool
pub const DEFAULT_MAX_POOLED: usize = 64;

/// A pool of fixed-capacity `BytesMut` buffers shared across transfers
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<BytesMut>>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED)
    }
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(Vec::new())),
            buffer_size: buffer_size.max(1),
            max_pooled,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Take a buffer with at least `buffer_size` spare capacity
    pub fn get(&self) -> BytesMut {
        match self.buffers.lock().pop() {
            Some(mut buf) => {
                buf.reserve(self.buffer_size);
                buf
            }
            None => BytesMut::with_capacity(self.buffer_size),
        }
    }

    /// Return a buffer to the pool
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < self.buffer_size {
            return;
        }
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }
}

/// Stream a file in chunks of at most `pool.buffer_size()` bytes.
///
/// Chunks are split off a pooled buffer; `reserve` reclaims the allocation
/// once the consumer has dropped the previous chunk.
pub fn file_stream(file: File, pool: BufferPool) -> ObjectStream {
    let buf = pool.get();
    stream::try_unfold((file, pool, buf), next_chunk).boxed()
}

type ChunkState = (File, BufferPool, BytesMut);

async fn next_chunk(state: ChunkState) -> Result<Option<(Bytes, ChunkState)>> {
    let (mut file, pool, mut buf) = state;
    let limit = pool.buffer_size();
    buf.reserve(limit);
    let read = (&mut file).take(limit as u64).read_buf(&mut buf).await?;
    if read == 0 {
        pool.put(buf);
        return Ok(None);
    }
    let chunk = buf.split().freeze();
    Ok(Some((chunk, (file, pool, buf))))
}

/// Drain an object stream into `file`, returning the number of bytes written
pub async fn copy_to_file(stream: ObjectStream, file: &mut File) -> Result<u64> {
    let mut stream = stream;
    let mut written = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
