use serde::ser::{Serialize, Serializer};

use super::geometry::Geometry;

/// 四周各留出的边距比例
pub const MARGIN_RATIO: f64 = 0.1;

/// 所有坐标重合时使用的最小纬度跨度（度），约 1.1 km
pub const MIN_SPAN_DEG: f64 = 0.01;

/// 地理范围，序列化为 `[[minLat, minLng], [maxLat, maxLng]]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl Bounds {
    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn lng_span(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    pub fn as_array(&self) -> [[f64; 2]; 2] {
        [[self.min_lat, self.min_lng], [self.max_lat, self.max_lng]]
    }
}

impl Serialize for Bounds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_array().serialize(serializer)
    }
}

/// 计算包围所有几何的范围，并按图片宽高比校正、再加 10% 边距。
///
/// 没有任何坐标，或宽高为 0 时返回 `None`。
pub fn extent_of<'a, I>(geometries: I, width: u32, height: u32) -> Option<Bounds>
where
    I: IntoIterator<Item = &'a Geometry>,
{
    if width == 0 || height == 0 {
        return None;
    }

    let mut points = Vec::new();
    for g in geometries {
        g.flatten_lng_lat(&mut points);
    }
    let raw = raw_bounds(&points)?;
    Some(with_margin(fit_aspect(raw, width, height), MARGIN_RATIO))
}

fn raw_bounds(points: &[(f64, f64)]) -> Option<Bounds> {
    let (first_lng, first_lat) = *points.first()?;
    let init = Bounds {
        min_lat: first_lat,
        min_lng: first_lng,
        max_lat: first_lat,
        max_lng: first_lng,
    };
    Some(points.iter().fold(init, |b, &(lng, lat)| Bounds {
        min_lat: b.min_lat.min(lat),
        min_lng: b.min_lng.min(lng),
        max_lat: b.max_lat.max(lat),
        max_lng: b.max_lng.max(lng),
    }))
}

/// 扩展较短的一轴，使 `经度跨度 / 纬度跨度 == width / height`，中心保持不变。
///
/// 路线相对图片更"宽"时扩展纬度方向，否则扩展经度方向。
pub fn fit_aspect(bounds: Bounds, width: u32, height: u32) -> Bounds {
    let mut b = bounds;
    if b.lat_span() == 0.0 && b.lng_span() == 0.0 {
        b.min_lat -= MIN_SPAN_DEG / 2.0;
        b.max_lat += MIN_SPAN_DEG / 2.0;
    }

    let lat_range = b.lat_span();
    let lng_range = b.lng_span();
    let image_ratio = f64::from(width) / f64::from(height);
    let route_ratio = lng_range / lat_range;

    if route_ratio > image_ratio {
        let needed_height = lng_range / image_ratio;
        let center = (b.min_lat + b.max_lat) / 2.0;
        b.min_lat = center - needed_height / 2.0;
        b.max_lat = center + needed_height / 2.0;
    } else {
        let needed_width = lat_range * image_ratio;
        let center = (b.min_lng + b.max_lng) / 2.0;
        b.min_lng = center - needed_width / 2.0;
        b.max_lng = center + needed_width / 2.0;
    }
    b
}

/// 各方向按跨度比例外扩
pub fn with_margin(bounds: Bounds, ratio: f64) -> Bounds {
    let lat_margin = bounds.lat_span() * ratio;
    let lng_margin = bounds.lng_span() * ratio;
    Bounds {
        min_lat: bounds.min_lat - lat_margin,
        min_lng: bounds.min_lng - lng_margin,
        max_lat: bounds.max_lat + lat_margin,
        max_lng: bounds.max_lng + lng_margin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lng: f64, lat: f64) -> Geometry {
        Geometry::Point {
            coordinates: vec![lng, lat],
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_input_has_no_extent() {
        assert!(extent_of(std::iter::empty::<&Geometry>(), 800, 600).is_none());
        let line = Geometry::LineString {
            coordinates: vec![],
        };
        assert!(extent_of([&line], 800, 600).is_none());
    }

    #[test]
    fn single_point_gets_positive_margin_and_image_ratio() {
        let p = point(2.35, 48.85);
        let b = extent_of([&p], 800, 600).expect("extent");
        assert!(b.min_lat < 48.85 && b.max_lat > 48.85);
        assert!(b.min_lng < 2.35 && b.max_lng > 2.35);

        let raw = Bounds {
            min_lat: 48.85,
            min_lng: 2.35,
            max_lat: 48.85,
            max_lng: 2.35,
        };
        let fitted = fit_aspect(raw, 800, 600);
        assert!(approx(fitted.lng_span() / fitted.lat_span(), 800.0 / 600.0));
        assert!(b.lat_span() > fitted.lat_span());
    }

    #[test]
    fn wide_route_expands_latitude() {
        let a = point(0.0, 10.0);
        let b = point(4.0, 11.0);
        // 路线 4:1，图片 1:1 → 纬度扩展到 4
        let fitted = fit_aspect(raw_bounds(&[(0.0, 10.0), (4.0, 11.0)]).unwrap(), 500, 500);
        assert!(approx(fitted.lat_span(), 4.0));
        assert!(approx(fitted.lng_span(), 4.0));
        assert!(approx((fitted.min_lat + fitted.max_lat) / 2.0, 10.5));

        let ext = extent_of([&a, &b], 500, 500).unwrap();
        assert!(approx(ext.min_lat, 10.5 - 2.0 - 0.4));
        assert!(approx(ext.max_lng, 4.0 + 0.4));
    }

    #[test]
    fn tall_route_expands_longitude() {
        let fitted = fit_aspect(raw_bounds(&[(0.0, 0.0), (1.0, 3.0)]).unwrap(), 800, 400);
        assert!(approx(fitted.lat_span(), 3.0));
        assert!(approx(fitted.lng_span(), 6.0));
        assert!(approx((fitted.min_lng + fitted.max_lng) / 2.0, 0.5));
    }

    #[test]
    fn serializes_as_lat_lng_pairs() {
        let b = Bounds {
            min_lat: 1.0,
            min_lng: 2.0,
            max_lat: 3.0,
            max_lng: 4.0,
        };
        assert_eq!(
            serde_json::to_value(b).unwrap(),
            serde_json::json!([[1.0, 2.0], [3.0, 4.0]])
        );
    }
}
