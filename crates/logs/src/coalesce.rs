//! Debounce with a ceiling: a batch is released after a quiet period with no
//! new lines, or once the oldest pending line has waited `max_wait`.

use std::time::Duration;

use lookout_core::config::env_or;
use tokio::time::Instant;

use crate::sink::LogLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub quiet: Duration,
    pub max_wait: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { quiet: Duration::from_millis(100), max_wait: Duration::from_millis(300) }
    }
}

impl LogConfig {
    /// `LOOKOUT_LOG_DEBOUNCE_MS` and `LOOKOUT_LOG_MAX_WAIT_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            quiet: Duration::from_millis(env_or("LOOKOUT_LOG_DEBOUNCE_MS", d.quiet.as_millis() as u64)),
            max_wait: Duration::from_millis(env_or("LOOKOUT_LOG_MAX_WAIT_MS", d.max_wait.as_millis() as u64)),
        }
    }
}

#[derive(Debug)]
pub struct Coalescer {
    cfg: LogConfig,
    pending: Vec<LogLine>,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl Coalescer {
    pub fn new(cfg: LogConfig) -> Self {
        Self { cfg, pending: Vec::new(), first_at: None, last_at: None }
    }

    pub fn push(&mut self, line: LogLine, now: Instant) {
        if self.pending.is_empty() {
            self.first_at = Some(now);
        }
        self.last_at = Some(now);
        self.pending.push(line);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// When the pending batch is due; `None` when nothing is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.first_at, self.last_at) {
            (Some(first), Some(last)) => Some((last + self.cfg.quiet).min(first + self.cfg.max_wait)),
            _ => None,
        }
    }

    /// Release the batch if due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<LogLine>> {
        match self.deadline() {
            Some(d) if d <= now => Some(self.take()),
            _ => None,
        }
    }

    /// Release everything pending regardless of timers.
    pub fn take(&mut self) -> Vec<LogLine> {
        self.first_at = None;
        self.last_at = None;
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: u64) -> LogLine {
        LogLine { number: n, text: format!("l{}", n) }
    }

    #[test]
    fn quiet_period_releases_batch() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(LogConfig::default());
        c.push(line(1), t0);
        c.push(line(2), t0 + Duration::from_millis(50));
        assert_eq!(c.deadline(), Some(t0 + Duration::from_millis(150)));
        assert!(c.take_due(t0 + Duration::from_millis(149)).is_none());
        assert_eq!(c.take_due(t0 + Duration::from_millis(150)).map(|b| b.len()), Some(2));
        assert!(c.deadline().is_none());
    }

    #[test]
    fn steady_stream_is_capped_by_max_wait() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(LogConfig::default());
        for i in 0..10u64 {
            c.push(line(i + 1), t0 + Duration::from_millis(i * 40));
        }
        // last push at 360ms would put the quiet deadline at 460ms
        assert_eq!(c.deadline(), Some(t0 + Duration::from_millis(300)));
    }
}
