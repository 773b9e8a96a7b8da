use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::protocol::{DecoderStats, Frame, FrameDecoder};

/// Bytes requested from the source per read.
pub const READ_CHUNK: usize = 4096;

/// State shared between the ingestion thread and whoever controls it.
#[derive(Debug, Clone)]
pub struct IngestContext {
    running: Arc<AtomicBool>,
}

impl Default for IngestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestContext {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the ingestion loop to exit after its current read.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Read `reader` to the end (or until stopped), decoding frames and sending
/// them on `tx`. Returns the decoder's counters.
pub fn run_ingest<R: Read>(
    mut reader: R,
    ctx: &IngestContext,
    tx: &Sender<Frame>,
) -> io::Result<DecoderStats> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    while ctx.is_running() {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                debug!("byte source exhausted");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("reading byte source: {e}");
                return Err(e);
            }
        };

        for frame in decoder.feed(&chunk[..n]) {
            if tx.send(frame).is_err() {
                debug!("frame receiver closed, stopping ingestion");
                return Ok(decoder.stats());
            }
        }
    }
    Ok(decoder.stats())
}

/// Start the single producer thread.
pub fn spawn_ingest<R>(
    reader: R,
    ctx: IngestContext,
    tx: Sender<Frame>,
) -> JoinHandle<io::Result<DecoderStats>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        info!("ingestion started");
        let result = run_ingest(reader, &ctx, &tx);
        if let Ok(stats) = &result {
            info!(
                "ingestion stopped: {} frames, {} resync drops, {} bytes discarded",
                stats.frames, stats.resync_drops, stats.discarded_bytes
            );
        }
        result
    })
}
