//! Viewport change detection and request supersession

use geo_events::BoundingBox;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Minimum movement, in degrees, that warrants a new viewport query.
pub const SIGNIFICANT_SHIFT_DEG: f64 = 0.01;

/// Monotonic counter shared by everyone issuing viewport queries. Starting a
/// new request invalidates every ticket handed out before it.
#[derive(Debug, Clone, Default)]
pub struct RequestGeneration {
    current: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct GenerationTicket {
    value: u64,
    current: Arc<AtomicU64>,
}

impl RequestGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> GenerationTicket {
        let value = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationTicket {
            value,
            current: self.current.clone(),
        }
    }
}

impl GenerationTicket {
    /// `false` once a newer request has begun.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.value
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewportTracker {
    last: Option<BoundingBox>,
}

impl ViewportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `next` differs enough from the last fetched viewport. Records
    /// `next` as the new reference when it does.
    pub fn should_fetch(&mut self, next: BoundingBox) -> bool {
        let significant = match self.last {
            None => true,
            Some(last) => is_significant_change(&last, &next),
        };
        if significant {
            self.last = Some(next);
        }
        significant
    }
}

pub fn is_significant_change(old: &BoundingBox, new: &BoundingBox) -> bool {
    let lat_shift = (old.min_lat - new.min_lat).abs();
    let lng_shift = (old.min_lng - new.min_lng).abs();
    let zoom_shift = ((old.max_lat - old.min_lat) - (new.max_lat - new.min_lat)).abs();

    lat_shift > SIGNIFICANT_SHIFT_DEG || lng_shift > SIGNIFICANT_SHIFT_DEG || zoom_shift > SIGNIFICANT_SHIFT_DEG
}
