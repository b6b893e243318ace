//! 分发指标
//!
//! 四个单调计数器。递增与读取只持有共享闸门，彼此不阻塞；
//! `reset` 持有独占闸门，整批清零，不会与快照交错。
//!
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EventMetrics {
    gate: RwLock<()>,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

/// 某一时刻的指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dropped: u64,
}

impl EventMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let _gate = self.gate.read();
        MetricsSnapshot {
            processed: self.processed(),
            failed: self.failed(),
            retried: self.retried(),
            dropped: self.dropped(),
        }
    }

    /// 整批清零全部计数，返回清零前的值
    pub fn reset(&self) -> MetricsSnapshot {
        let _gate = self.gate.write();
        MetricsSnapshot {
            processed: self.processed.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
            retried: self.retried.swap(0, Ordering::Relaxed),
            dropped: self.dropped.swap(0, Ordering::Relaxed),
        }
    }

    pub(crate) fn incr_processed(&self) {
        let _gate = self.gate.read();
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_failed(&self) {
        let _gate = self.gate.read();
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_retried(&self) {
        let _gate = self.gate.read();
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_dropped(&self) {
        let _gate = self.gate.read();
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}
