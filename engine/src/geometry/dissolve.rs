use std::cmp::Ordering;

use geo::{Area, BooleanOps, BoundingRect, Centroid, Contains, InteriorPoint, MultiPolygon, Point, Polygon};

/// Union of every piece, merged pairwise so each level halves the work list.
pub fn union_all(mut pieces: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    pieces.retain(|piece| !piece.0.is_empty());
    while pieces.len() > 1 {
        let mut merged = Vec::with_capacity(pieces.len().div_ceil(2));
        let mut iter = pieces.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => merged.push(a.union(&b)),
                None => merged.push(a),
            }
        }
        pieces = merged;
    }
    pieces
        .pop()
        .unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

/// Largest-area connected piece. On equal areas the earlier piece wins.
pub fn largest_piece(shape: &MultiPolygon<f64>) -> Option<&Polygon<f64>> {
    let mut best: Option<(&Polygon<f64>, f64)> = None;
    for polygon in &shape.0 {
        let area = polygon.unsigned_area();
        if best.is_none_or(|(_, best_area)| area > best_area) {
            best = Some((polygon, area));
        }
    }
    best.map(|(polygon, _)| polygon)
}

/// Where a zone label goes: the centre of mass when it lies inside the
/// polygon, otherwise a guaranteed interior point.
pub fn label_point(polygon: &Polygon<f64>) -> Option<Point<f64>> {
    match polygon.centroid() {
        Some(centroid) if polygon.contains(&centroid) => Some(centroid),
        _ => polygon.interior_point(),
    }
}

/// Label point of the largest piece of a dissolved zone.
pub fn zone_label_point(shape: &MultiPolygon<f64>) -> Option<Point<f64>> {
    largest_piece(shape).and_then(label_point)
}

/// Reading order for unassigned regions: ascending min y, then descending
/// min x. Regions without extent sort last.
pub fn region_order(a: &Polygon<f64>, b: &Polygon<f64>) -> Ordering {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => ra
            .min()
            .y
            .total_cmp(&rb.min().y)
            .then_with(|| rb.min().x.total_cmp(&ra.min().x)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
