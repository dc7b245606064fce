use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for the relay; all updates are relaxed.
#[derive(Debug, Default)]
pub struct RelayStats {
    connections_accepted: AtomicU64,
    connections_open: AtomicU64,
    frames_received: AtomicU64,
    frames_relayed: AtomicU64,
    video_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_open: u64,
    pub frames_received: u64,
    pub frames_relayed: u64,
    pub video_dropped: u64,
}

impl RelayStats {
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate rather than wrap if a close is ever double counted.
        let _ = self
            .connections_open
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |open| {
                open.checked_sub(1)
            });
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_relayed(&self, count: usize) {
        self.frames_relayed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn video_dropped(&self) {
        self.video_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_open: self.connections_open.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            video_dropped: self.video_dropped.load(Ordering::Relaxed),
        }
    }
}
