// src/core/cache/inflight.rs

//! The in-flight entry: at most one writer per key, any number of readers
//! streaming the growing body.
//!
//! The writer publishes its committed byte count on a `watch` channel.
//! Readers open the same file the writer appends to and chase the committed
//! offset; completion or failure is the final channel state. A rename from
//! the temp path to the final path does not disturb readers that already
//! hold the file open.

use crate::core::cache::record::HeaderRecord;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::watch;

const READ_CHUNK: usize = 64 * 1024;

/// The writer-side progress published to joined readers.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteProgress {
    /// Bytes committed to disk so far; more may follow.
    Writing(u64),
    /// The body is complete at the given size.
    Done(u64),
    /// The write failed; readers receive the error.
    Failed(String),
}

/// A cache entry currently being written. Lives in the engine's in-flight
/// table from `store` until the writer commits or aborts.
#[derive(Debug)]
pub struct InFlight {
    pub fingerprint: String,
    /// The response metadata known when the write began.
    pub record: HeaderRecord,
    /// Writer generation, for coherence diagnostics between a writer and
    /// late-joining readers.
    pub generation: u64,
    progress: watch::Receiver<WriteProgress>,
    readers: AtomicUsize,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl InFlight {
    pub fn new(
        fingerprint: String,
        record: HeaderRecord,
        generation: u64,
        progress: watch::Receiver<WriteProgress>,
        tmp_path: PathBuf,
        final_path: PathBuf,
    ) -> Self {
        Self {
            fingerprint,
            record,
            generation,
            progress,
            readers: AtomicUsize::new(0),
            tmp_path,
            final_path,
        }
    }

    /// The number of readers currently attached.
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// The latest progress state.
    pub fn progress(&self) -> WriteProgress {
        self.progress.borrow().clone()
    }

    /// Attaches a reader and returns a stream over the growing body. The
    /// stream completes when the writer commits and fails when it aborts.
    pub fn body_stream(
        self: &Arc<Self>,
    ) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
        let guard = ReaderGuard::attach(Arc::clone(self));
        let inflight = Arc::clone(self);
        async_stream::try_stream! {
            let _guard = guard;
            let mut rx = inflight.progress.clone();

            // The temp file may already have been renamed if the writer
            // committed before this reader opened it.
            let mut file = match File::open(&inflight.tmp_path).await {
                Ok(f) => f,
                Err(_) => File::open(&inflight.final_path).await?,
            };

            let mut pos: u64 = 0;
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let state = rx.borrow().clone();
                let (committed, done) = match state {
                    WriteProgress::Writing(n) => (n, false),
                    WriteProgress::Done(n) => (n, true),
                    WriteProgress::Failed(msg) => {
                        Err::<(), io::Error>(io::Error::other(msg))?;
                        (0, true)
                    }
                };

                if pos < committed {
                    let want = ((committed - pos) as usize).min(buf.len());
                    file.seek(SeekFrom::Start(pos)).await?;
                    let n = file.read(&mut buf[..want]).await?;
                    if n == 0 {
                        Err::<(), io::Error>(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "cache body shorter than committed length",
                        ))?;
                    }
                    pos += n as u64;
                    yield Bytes::copy_from_slice(&buf[..n]);
                    continue;
                }

                if done {
                    break;
                }
                if rx.changed().await.is_err() {
                    Err::<(), io::Error>(io::Error::other("cache writer vanished"))?;
                }
            }
        }
    }
}

/// Holds a reader slot on the in-flight entry for the lifetime of a stream.
struct ReaderGuard(Arc<InFlight>);

impl ReaderGuard {
    fn attach(inflight: Arc<InFlight>) -> Self {
        inflight.readers.fetch_add(1, Ordering::AcqRel);
        Self(inflight)
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.readers.fetch_sub(1, Ordering::AcqRel);
    }
}
