//! Operational alarms raised on durable apply failures

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink for keyed operator alarms
pub trait AlarmSink: Send + Sync {
    fn raise(&self, key: &str, detail: &str);
}

/// Thread-safe alarm sink handle
pub type AlarmHandle = Arc<dyn AlarmSink>;

/// Alarm key for a partition whose state machine could not apply a command
pub fn apply_alarm_key(cluster_id: &str, partition_id: u64) -> String {
    format!("{}_datapartition_{}_apply_err", cluster_id, partition_id)
}

/// Alarm sink that logs at error level, suppressing repeats of a key within an interval
pub struct TracingAlarm {
    interval: Duration,
    last_raised: DashMap<String, Instant>,
    suppressed: AtomicU64,
}

impl TracingAlarm {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_raised: DashMap::new(),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Alarms dropped because their key fired recently
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl AlarmSink for TracingAlarm {
    fn raise(&self, key: &str, detail: &str) {
        let now = Instant::now();
        let mut fire = true;
        self.last_raised
            .entry(key.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) < self.interval {
                    fire = false;
                } else {
                    *last = now;
                }
            })
            .or_insert(now);

        if fire {
            tracing::error!(alarm = key, detail, "alarm raised");
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
