//! Pumps a log byte stream into numbered, coalesced line batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use lookout_core::lines::LineBuffer;
use lookout_core::{LogOptions, LogSource};
use lookout_kubehub::StreamTransport;
use metrics::{counter, histogram};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::coalesce::{Coalescer, LogConfig};
use crate::sink::{LogBatch, LogLine, LogSink};

/// How a stream task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEnd {
    Closed,
    Error,
    LimitReached,
    Stopped,
}

/// Owner's side of a running stream. Dropping it stops the stream.
pub struct LogHandle {
    alive: Arc<Mutex<bool>>,
    lines: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<LogEnd>>,
}

impl LogHandle {
    /// Lines delivered or pending so far.
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    /// Bytes received so far, capped at the limit.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the stream. Waits for a sink callback in progress, so none runs
    /// after this returns. Must not be called from the stream's own sink.
    pub fn stop(&mut self) {
        *lock(&self.alive) = false;
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the task to finish.
    pub async fn join(&mut self) -> LogEnd {
        match self.task.take() {
            Some(t) => t.await.unwrap_or(LogEnd::Stopped),
            None => LogEnd::Stopped,
        }
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(m: &Mutex<bool>) -> MutexGuard<'_, bool> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Forwards to the sink only while the handle is alive. The flag stays
/// locked for the whole callback.
struct Gate {
    alive: Arc<Mutex<bool>>,
    sink: Arc<dyn LogSink>,
}

impl Gate {
    fn deliver(&self, f: impl FnOnce(&dyn LogSink)) {
        let alive = lock(&self.alive);
        if *alive {
            f(self.sink.as_ref());
        }
    }

    fn flush(&self, c: &mut Coalescer) {
        if c.is_empty() {
            return;
        }
        let lines = c.take();
        histogram!("lookout_log_batch_lines", lines.len() as f64);
        self.deliver(|s| s.on_lines(LogBatch { lines, scroll_to_bottom: false }));
    }
}

pub struct LogStreamConsumer;

impl LogStreamConsumer {
    /// Open the log stream for `source` and feed `sink` until it closes,
    /// errors, hits `opts.limit_bytes`, or the handle is stopped.
    pub fn start(
        transport: Arc<dyn StreamTransport>,
        source: LogSource,
        opts: LogOptions,
        sink: Arc<dyn LogSink>,
        config: LogConfig,
    ) -> LogHandle {
        let alive = Arc::new(Mutex::new(true));
        let lines = Arc::new(AtomicU64::new(0));
        let bytes = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let pump = Pump {
            gate: Gate { alive: Arc::clone(&alive), sink },
            lines: Arc::clone(&lines),
            bytes: Arc::clone(&bytes),
            config,
        };
        let task = tokio::spawn(pump.run(transport, source, opts, stop_rx));
        LogHandle { alive, lines, bytes, stop: Some(stop_tx), task: Some(task) }
    }
}

struct Pump {
    gate: Gate,
    lines: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    config: LogConfig,
}

impl Pump {
    async fn run(
        self,
        transport: Arc<dyn StreamTransport>,
        source: LogSource,
        opts: LogOptions,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> LogEnd {
        let t0 = Instant::now();
        let opened = tokio::select! {
            _ = &mut stop_rx => return LogEnd::Stopped,
            r = transport.open_log_stream(&source, &opts) => r,
        };
        let stream = match opened {
            Ok(s) => s,
            Err(e) => {
                warn!(source = %source, error = %e, "logs: open failed");
                self.gate.deliver(|s| s.on_error(&e));
                return LogEnd::Error;
            }
        };
        info!(source = %source, container = ?opts.container, took_ms = %t0.elapsed().as_millis(), "logs: stream started");

        let stream = stream.fuse();
        futures::pin_mut!(stream);
        let mut buf = LineBuffer::new();
        let mut coalescer = Coalescer::new(self.config);
        let mut number = 0u64;
        let mut total = 0u64;
        let mut warned_partial = false;

        let mut push_line = |raw: &[u8], c: &mut Coalescer, number: &mut u64| {
            *number += 1;
            self.lines.store(*number, Ordering::Relaxed);
            c.push(LogLine { number: *number, text: String::from_utf8_lossy(raw).into_owned() }, Instant::now());
            if !warned_partial && opts.tail_lines.map(|t| t > 0 && *number >= t as u64).unwrap_or(false) {
                warned_partial = true;
                self.gate.deliver(|s| s.on_possibly_truncated());
            }
        };

        let end = loop {
            let deadline = coalescer.deadline();
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!(source = %source, "logs: stop requested");
                    break LogEnd::Stopped;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.gate.flush(&mut coalescer);
                }
                next = stream.next() => match next {
                    Some(Ok(mut chunk)) => {
                        let mut hit = false;
                        if let Some(limit) = opts.limit_bytes {
                            let remaining = limit.saturating_sub(total);
                            if chunk.len() as u64 >= remaining {
                                chunk.truncate(remaining as usize);
                                hit = true;
                            }
                        }
                        total += chunk.len() as u64;
                        self.bytes.store(total, Ordering::Relaxed);
                        for line in buf.push(&chunk) {
                            push_line(&line, &mut coalescer, &mut number);
                        }
                        if hit {
                            if let Some(tail) = buf.finish() {
                                push_line(&tail, &mut coalescer, &mut number);
                            }
                            self.gate.flush(&mut coalescer);
                            counter!("lookout_log_limit_reached_total", 1u64);
                            warn!(source = %source, bytes = total, "logs: limit reached; stopping");
                            self.gate.deliver(|s| s.on_limit_reached(total));
                            break LogEnd::LimitReached;
                        }
                    }
                    Some(Err(e)) => {
                        self.gate.flush(&mut coalescer);
                        warn!(source = %source, error = %e, "logs: stream error");
                        self.gate.deliver(|s| s.on_error(&e));
                        break LogEnd::Error;
                    }
                    None => {
                        if let Some(tail) = buf.finish() {
                            push_line(&tail, &mut coalescer, &mut number);
                        }
                        self.gate.flush(&mut coalescer);
                        self.gate.deliver(|s| s.on_close());
                        break LogEnd::Closed;
                    }
                }
            }
        };
        info!(source = %source, lines = number, bytes = total, end = ?end, "logs: stream ended");
        end
    }
}
