//! Idempotency fingerprint

use crate::ValidatedEvent;
use geo_events::canonical_timestamp;
use sha2::{Digest, Sha256};

/// SHA-256 hex over `source|observed_at|lat|lng|TYPE|severity|text`.
///
/// Coordinates are fixed to six decimals and the timestamp is canonical, so
/// two submissions of the same report always agree on the key.
pub fn fingerprint(event: &ValidatedEvent) -> String {
    let material = format!(
        "{}|{}|{:.6}|{:.6}|{}|{}|{}",
        event.source_id,
        canonical_timestamp(event.observed_at),
        event.location.lat,
        event.location.lng,
        event.event_type.as_str(),
        event.severity,
        event.text.as_deref().unwrap_or(""),
    );

    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}
