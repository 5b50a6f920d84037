//! Route-to-cell sampling on the fixed grid

use geo_events::{Coordinate, GridCell};
use std::collections::HashSet;

/// Samples per cell edge when walking a segment. Four keeps diagonal
/// crossings from skipping a cell corner in practice.
const SAMPLES_PER_CELL: f64 = 4.0;

/// Distinct cells a polyline passes through, in traversal order.
pub fn cells_along(route: &[Coordinate], cell_size_deg: f64) -> Vec<GridCell> {
    let mut seen = HashSet::new();
    let mut cells = Vec::new();
    let mut visit = |point: Coordinate| {
        let cell = GridCell::containing(point, cell_size_deg);
        if seen.insert(cell) {
            cells.push(cell);
        }
    };

    if let [only] = route {
        visit(*only);
        return cells;
    }

    let step = cell_size_deg / SAMPLES_PER_CELL;
    for pair in route.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let dlat = to.lat - from.lat;
        let dlng = to.lng - from.lng;
        let length = (dlat * dlat + dlng * dlng).sqrt();
        let steps = ((length / step).ceil() as usize).max(1);

        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            visit(Coordinate {
                lat: from.lat + dlat * t,
                lng: from.lng + dlng * t,
            });
        }
    }

    cells
}
