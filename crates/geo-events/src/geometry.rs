//! Coordinates, viewport boxes and grid cells

use crate::{GeoError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Kilometres per degree used for planar route-length estimates.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Default edge length of a grid cell in degrees (~220 m of latitude).
pub const DEFAULT_CELL_SIZE_DEG: f64 = 0.002;

fn is_valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

fn is_valid_longitude(lng: f64) -> bool {
    lng.is_finite() && (-180.0..=180.0).contains(&lng)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let coordinate = Self { lat, lng };
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(GeoError::InvalidCoordinates { lat, lng })
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_latitude(self.lat) && is_valid_longitude(self.lng)
    }
}

/// Viewport query window. All four bounds are mandatory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Result<Self> {
        let bbox = Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_latitude(self.min_lat) || !is_valid_latitude(self.max_lat) {
            return Err(GeoError::InvalidBoundingBox(format!(
                "latitude bounds out of range: [{}, {}]",
                self.min_lat, self.max_lat
            )));
        }
        if !is_valid_longitude(self.min_lng) || !is_valid_longitude(self.max_lng) {
            return Err(GeoError::InvalidBoundingBox(format!(
                "longitude bounds out of range: [{}, {}]",
                self.min_lng, self.max_lng
            )));
        }
        if self.min_lat > self.max_lat || self.min_lng > self.max_lng {
            return Err(GeoError::InvalidBoundingBox(
                "minimum bound exceeds maximum bound".to_string(),
            ));
        }
        Ok(())
    }

    /// Inclusive on all edges.
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Fixed-resolution spatial bucket identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GridCell(pub i64);

impl GridCell {
    /// Cell containing `coordinate` on a grid of `cell_size_deg` squares.
    pub fn containing(coordinate: Coordinate, cell_size_deg: f64) -> Self {
        let columns = (360.0 / cell_size_deg).ceil() as i64;
        let row = ((coordinate.lat + 90.0) / cell_size_deg).floor() as i64;
        let col = ((coordinate.lng + 180.0) / cell_size_deg).floor() as i64;
        GridCell(row * columns + col.min(columns - 1))
    }
}

impl std::fmt::Display for GridCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Great-circle distance in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6371.0;

    let lat1_rad = lat1 * PI / 180.0;
    let lat2_rad = lat2 * PI / 180.0;
    let dlat = (lat2 - lat1) * PI / 180.0;
    let dlon = (lon2 - lon1) * PI / 180.0;

    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    R * c
}

/// Planar polyline length in degrees converted at ~111 km per degree.
pub fn approx_route_length_km(route: &[Coordinate]) -> f64 {
    route
        .windows(2)
        .map(|pair| {
            let dlat = pair[1].lat - pair[0].lat;
            let dlng = pair[1].lng - pair[0].lng;
            (dlat * dlat + dlng * dlng).sqrt()
        })
        .sum::<f64>()
        * KM_PER_DEGREE
}
