use geo::{BooleanOps, BoundingRect, Coord, Geometry, MultiPolygon, Polygon, Rect};
use zonemap_shared::BBox;

pub fn bbox_to_rect(bbox: &BBox) -> Rect<f64> {
    Rect::new(
        Coord {
            x: bbox.min[0],
            y: bbox.min[1],
        },
        Coord {
            x: bbox.max[0],
            y: bbox.max[1],
        },
    )
}

pub fn rect_to_bbox(rect: &Rect<f64>) -> BBox {
    BBox::new([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

pub fn bbox_polygon(bbox: &BBox) -> Polygon<f64> {
    bbox_to_rect(bbox).to_polygon()
}

pub fn multi_bbox(shape: &MultiPolygon<f64>) -> Option<BBox> {
    shape.bounding_rect().map(|rect| rect_to_bbox(&rect))
}

pub fn polygon_bbox(polygon: &Polygon<f64>) -> Option<BBox> {
    polygon.bounding_rect().map(|rect| rect_to_bbox(&rect))
}

/// Polygonal parts of an arbitrary geometry. Points and lines are dropped.
pub fn polygonal_parts(geometry: Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => vec![polygon],
        Geometry::MultiPolygon(multi) => multi.0,
        Geometry::Rect(rect) => vec![rect.to_polygon()],
        Geometry::Triangle(triangle) => vec![triangle.to_polygon()],
        Geometry::GeometryCollection(collection) => {
            collection.0.into_iter().flat_map(polygonal_parts).collect()
        }
        _ => Vec::new(),
    }
}

/// Converts a GeoJSON geometry, keeping only its polygonal parts.
pub fn from_geojson(geometry: geojson::Geometry) -> Result<Vec<Polygon<f64>>, String> {
    let geometry: Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| e.to_string())?;
    Ok(polygonal_parts(geometry))
}

pub fn to_geojson_multi(shape: &MultiPolygon<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(shape))
}

pub fn to_geojson_polygon(polygon: &Polygon<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(polygon))
}

/// Part of `shape` inside `bbox`.
pub fn clip_to_bbox(shape: &MultiPolygon<f64>, bbox: &BBox) -> MultiPolygon<f64> {
    let Some(extent) = multi_bbox(shape) else {
        return MultiPolygon::new(Vec::new());
    };
    if !extent.intersects(bbox) {
        return MultiPolygon::new(Vec::new());
    }
    if extent.min[0] >= bbox.min[0]
        && extent.min[1] >= bbox.min[1]
        && extent.max[0] <= bbox.max[0]
        && extent.max[1] <= bbox.max[1]
    {
        return shape.clone();
    }
    shape.intersection(&MultiPolygon::new(vec![bbox_polygon(bbox)]))
}
