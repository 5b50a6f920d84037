//! Keyword heuristics for reports the extractor could not handle

use crate::{ParsedEvent, SocialPost};
use chrono::{DateTime, Utc};
use geo_events::{normalize_observed_at, Coordinate, EventType};
use regex::Regex;
use std::sync::OnceLock;

/// Type keywords in precedence order. First hit wins.
const TYPE_KEYWORDS: &[(EventType, &[&str])] = &[
    (EventType::Accident, &["accident", "crash", "collision"]),
    (EventType::Construction, &["construction", "repair", "work zone"]),
    (EventType::MetroWork, &["metro", "rail work"]),
    (EventType::WaterLogging, &["flood", "waterlogging"]),
    (EventType::Protest, &["protest", "march", "demonstration"]),
    (EventType::RoadBlock, &["closed", "closure", "blocked", "diversion"]),
];

/// Intensity keywords, strongest first.
const SEVERITY_KEYWORDS: &[(u8, &[&str])] = &[
    (5, &["massive", "major", "severe", "standstill", "fatal"]),
    (4, &["heavy", "badly", "blocked", "closure"]),
    (3, &["delay", "slow"]),
    (2, &["minor", "small"]),
];

fn coordinate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(-?\d{1,2}\.\d+)\s*[, ]\s*(-?\d{1,3}\.\d+)").expect("coordinate pattern compiles")
    })
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// First "lat, lng" pair in the text, if it is a valid coordinate.
pub fn find_coordinate(text: &str) -> Option<Coordinate> {
    let captures = coordinate_pattern().captures(text)?;
    let lat: f64 = captures.get(1)?.as_str().parse().ok()?;
    let lng: f64 = captures.get(2)?.as_str().parse().ok()?;
    Coordinate::new(lat, lng).ok()
}

/// Expects lower-cased text.
pub fn classify(lower: &str) -> EventType {
    TYPE_KEYWORDS
        .iter()
        .find(|(_, words)| contains_any(lower, words))
        .map(|(event_type, _)| *event_type)
        .unwrap_or(EventType::HeavyTraffic)
}

/// Expects lower-cased text.
pub fn severity_hint(lower: &str) -> u8 {
    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, words)| contains_any(lower, words))
        .map(|(severity, _)| *severity)
        .unwrap_or(1)
}

pub fn parse(post: &SocialPost, now: DateTime<Utc>) -> Option<ParsedEvent> {
    let text = post.text.trim();
    if text.is_empty() {
        return None;
    }

    let location = find_coordinate(text)?;
    let lower = text.to_lowercase();

    Some(ParsedEvent {
        source_id: post.source_id.clone(),
        observed_at: normalize_observed_at(post.observed_at.as_deref(), now),
        lat: location.lat,
        lng: location.lng,
        event_type: classify(&lower),
        severity_hint: severity_hint(&lower),
        text: text.to_string(),
    })
}
