//! Dedicated histogram thread: queue -> decode -> histogram -> sink

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, instrument, warn};

use crate::capture::{decoder, Frame};
use crate::display::ResultSink;
use crate::error::{Error, Result};
use crate::pipeline::histogram::{self, HistogramResult};
use crate::pipeline::queue::{FrameQueue, Popped};
use crate::PipelineConfig;

pub struct PipelineWorker {
    handle: Option<JoinHandle<()>>,
    queue: Arc<FrameQueue>,
    processed: Arc<AtomicU64>,
}

impl PipelineWorker {
    /// Start the worker thread. It runs until the queue is closed.
    pub fn spawn(
        queue: Arc<FrameQueue>,
        sink: Arc<dyn ResultSink>,
        config: Arc<ArcSwap<PipelineConfig>>,
    ) -> Result<Self> {
        let processed = Arc::new(AtomicU64::new(0));
        let handle = {
            let queue = Arc::clone(&queue);
            let processed = Arc::clone(&processed);
            thread::Builder::new()
                .name("chroma-histogram".into())
                .spawn(move || run(&queue, sink.as_ref(), &config, &processed))
                .map_err(Error::Spawn)?
        };

        Ok(Self {
            handle: Some(handle),
            queue,
            processed,
        })
    }

    /// Frames turned into histograms so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Close the queue and wait for the thread to finish.
    pub fn stop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("histogram worker panicked");
            }
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    queue: &FrameQueue,
    sink: &dyn ResultSink,
    config: &ArcSwap<PipelineConfig>,
    processed: &AtomicU64,
) {
    pin_to_core(config.load().worker_core);
    info!("histogram worker started");

    loop {
        let cfg = config.load_full();
        match queue.pop_blocking(Duration::from_millis(cfg.pop_timeout_ms)) {
            Popped::Frame(frame) => {
                if let Some(result) = process_frame(frame, cfg.top_n) {
                    sink.on_histogram(result);
                    processed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Popped::Timeout => continue,
            Popped::Closed => break,
        }
    }

    info!(processed = processed.load(Ordering::Relaxed), "histogram worker exiting");
}

/// Decode and analyse one frame. The frame is released before returning.
#[instrument(skip(frame), fields(sequence = frame.meta.sequence))]
pub fn process_frame(frame: Frame, top_n: usize) -> Option<HistogramResult> {
    let started = Instant::now();
    let latency = started.duration_since(frame.timestamp);

    let image = match decoder::decode_frame(&frame) {
        Ok(image) => image,
        Err(e) => {
            warn!("Failed to decode frame: {}", e);
            metrics::counter!("chroma_decode_failures_total").increment(1);
            return None;
        }
    };
    let sequence = frame.meta.sequence;
    drop(frame);

    let mut result = histogram::compute(&image, top_n);
    result.frame_sequence = sequence;

    metrics::counter!("chroma_frames_processed_total").increment(1);
    metrics::histogram!("chroma_histogram_seconds").record(started.elapsed().as_secs_f64());
    metrics::histogram!("chroma_frame_latency_seconds").record(latency.as_secs_f64());
    debug!(distinct = result.distinct_colors, "histogram computed");
    Some(result)
}

fn pin_to_core(core: Option<usize>) {
    let Some(wanted) = core else {
        return;
    };
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == wanted))
        .is_some_and(core_affinity::set_for_current);
    if pinned {
        info!(core = wanted, "histogram worker pinned");
    } else {
        warn!(core = wanted, "could not pin histogram worker");
    }
}
