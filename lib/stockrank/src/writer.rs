use anyhow::{anyhow, Context, Result};
use crossbeam_channel as channel;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::error;

// Map output goes through one dedicated IO thread per partition file.
// Senders are bounded for backpressure.
pub struct WriterPool {
    senders: Vec<channel::Sender<WriterMsg>>,
}

enum WriterMsg { Data(Vec<u8>), Close }

/// What one partition's IO thread wrote.
#[derive(Clone, Debug, Default)]
pub struct PartitionWriteStats {
    pub bytes_written: u64,
    pub write_calls: u64,
}

pub struct WriterJoiner {
    handles: Vec<thread::JoinHandle<Result<PartitionWriteStats>>>,
}

impl WriterJoiner {
    /// Waits for every IO thread; the first write failure wins.
    pub fn join_all(&mut self) -> Result<Vec<PartitionWriteStats>> {
        let mut stats = Vec::with_capacity(self.handles.len());
        let mut first_err = None;
        for h in self.handles.drain(..) {
            match h.join() {
                Ok(Ok(s)) => stats.push(s),
                Ok(Err(e)) => { first_err.get_or_insert(e); }
                Err(_) => { first_err.get_or_insert(anyhow!("writer thread panicked")); }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

pub fn partition_file(base_dir: &Path, partition: usize) -> PathBuf {
    base_dir.join(format!("part-{:05}.bin", partition))
}

impl WriterPool {
    pub fn new(base_dir: &Path, num_partitions: usize, flush_bytes: usize, flush_interval: Duration, queue_cap: usize) -> Result<(Self, WriterJoiner)> {
        crate::io::ensure_dir(base_dir)?;
        let mut senders = Vec::with_capacity(num_partitions);
        let mut handles = Vec::with_capacity(num_partitions);
        for part in 0..num_partitions {
            let (tx, rx) = channel::bounded::<WriterMsg>(queue_cap);
            let path = partition_file(base_dir, part);
            // Open eagerly so every partition has a (possibly empty) file for the sort phase.
            let mut writer = crate::io::open_writer(&path)?;
            let handle = thread::spawn(move || -> Result<PartitionWriteStats> {
                let mut stats = PartitionWriteStats::default();
                let mut buf: Vec<u8> = Vec::with_capacity(flush_bytes.min(1 << 20));
                let mut last_flush = Instant::now();
                loop {
                    // Batch writes up to flush_bytes or flush_interval.
                    let timeout = flush_interval.saturating_sub(last_flush.elapsed());
                    let closing = match rx.recv_timeout(timeout) {
                        Ok(WriterMsg::Data(bytes)) => { buf.extend_from_slice(&bytes); false }
                        Ok(WriterMsg::Close) => true,
                        Err(channel::RecvTimeoutError::Timeout) => false,
                        // every sender dropped without Close: treat as close
                        Err(channel::RecvTimeoutError::Disconnected) => true,
                    };
                    let due = buf.len() >= flush_bytes || last_flush.elapsed() >= flush_interval;
                    if closing || due {
                        if !buf.is_empty() {
                            writer.write_all(&buf).with_context(|| format!("write {}", path.display()))?;
                            stats.bytes_written += buf.len() as u64;
                            stats.write_calls += 1;
                            buf.clear();
                        }
                        writer.flush().with_context(|| format!("flush {}", path.display()))?;
                        last_flush = Instant::now();
                    }
                    if closing {
                        break;
                    }
                }
                Ok(stats)
            });
            senders.push(tx);
            handles.push(handle);
        }
        Ok((Self { senders }, WriterJoiner { handles }))
    }

    // The pool takes ownership of the chunk; IO threads handle batching and flush policy.
    pub fn write_chunk(&self, partition: usize, bytes: Vec<u8>) -> Result<()> {
        self.senders[partition]
            .send(WriterMsg::Data(bytes))
            .map_err(|e| anyhow!("partition {} writer is gone: {}", partition, e))
    }

    pub fn close_all(&self) {
        for tx in &self.senders {
            let _ = tx.send(WriterMsg::Close);
        }
    }

    pub fn num_partitions(&self) -> usize { self.senders.len() }

    pub fn make_thread_writer(&self, local_batch_bytes: usize) -> ThreadWriter<'_> {
        ThreadWriter::new(self, local_batch_bytes)
    }
}

/// Per-task staging in front of the pool: records are batched per partition and handed
/// over as whole chunks once a batch fills up.
pub struct ThreadWriter<'a> {
    pool: &'a WriterPool,
    local_buffers: Vec<Vec<u8>>,
    batch_bytes: usize,
    flushes: u64,
    bytes_sent: u64,
}

impl<'a> ThreadWriter<'a> {
    fn new(pool: &'a WriterPool, batch_bytes: usize) -> Self {
        let local_buffers = (0..pool.num_partitions()).map(|_| Vec::new()).collect();
        Self { pool, local_buffers, batch_bytes, flushes: 0, bytes_sent: 0 }
    }

    /// Buffer of one partition; callers append whole records then call `maybe_flush`.
    pub fn buffer(&mut self, partition: usize) -> &mut Vec<u8> {
        &mut self.local_buffers[partition]
    }

    pub fn maybe_flush(&mut self, partition: usize) -> Result<()> {
        if self.local_buffers[partition].len() >= self.batch_bytes {
            self.flush_partition(partition)?;
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        for p in 0..self.local_buffers.len() {
            if !self.local_buffers[p].is_empty() {
                self.flush_partition(p)?;
            }
        }
        Ok(())
    }

    fn flush_partition(&mut self, partition: usize) -> Result<()> {
        let chunk = std::mem::take(&mut self.local_buffers[partition]);
        self.bytes_sent += chunk.len() as u64;
        self.flushes += 1;
        self.pool.write_chunk(partition, chunk).map_err(|e| {
            error!("writer_pool write_chunk failed: {}", e);
            e
        })
    }

    /// (flushes, bytes sent to the pool)
    pub fn stats(&self) -> (u64, u64) {
        (self.flushes, self.bytes_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_land_in_their_partition_files() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, mut joiner) = WriterPool::new(dir.path(), 2, 4, Duration::from_millis(5), 8).unwrap();
        {
            let mut tw = pool.make_thread_writer(3);
            tw.buffer(0).extend_from_slice(b"ab");
            tw.maybe_flush(0).unwrap();
            tw.buffer(1).extend_from_slice(b"xyz");
            tw.maybe_flush(1).unwrap();
            tw.buffer(0).extend_from_slice(b"cd");
            tw.flush_all().unwrap();
            assert_eq!(tw.stats(), (2, 7));
        }
        pool.close_all();
        let stats = joiner.join_all().unwrap();
        assert_eq!(stats.iter().map(|s| s.bytes_written).sum::<u64>(), 7);
        assert_eq!(std::fs::read(partition_file(dir.path(), 0)).unwrap(), b"abcd");
        assert_eq!(std::fs::read(partition_file(dir.path(), 1)).unwrap(), b"xyz");
    }
}
