use serde_json::{Value, json};
use std::sync::Arc;

use super::models::{
    CircleOptions, DEFAULT_ICON_ANCHOR, DEFAULT_ICON_SIZE, DEFAULT_ICON_URL, Endpoint,
    FORCED_FILL_OPACITY, IconOptions, MarkerOptions, PathOptions, ResolvedCircle, ResolvedMarker,
    RouteKind, RouteOptions, RoutePlan,
};
use super::osrm::VehicleRouter;
use crate::error::AppError;
use crate::features::geo::{Geometry, distance, format_distance};

/// 校验路线输入并合并默认值。任何 I/O 之前调用。
pub fn plan_route(options: &RouteOptions, force_transparent_fill: bool) -> Result<RoutePlan, AppError> {
    let origin = parse_position("routes.origin", options.origin.as_ref())?;
    let destination = parse_position("routes.destination", options.destination.as_ref())?;

    Ok(RoutePlan {
        origin,
        destination,
        show_vehicle: options.show_vehicle.unwrap_or(true),
        show_straight: options.show_straight.unwrap_or(true),
        vehicle_style: options
            .vehicle_options
            .clone()
            .unwrap_or_default()
            .over(PathOptions::vehicle_default()),
        straight_style: options
            .straight_options
            .clone()
            .unwrap_or_default()
            .over(PathOptions::straight_default()),
        origin_marker: resolve_marker(
            options.origin_marker.as_ref(),
            Endpoint::Origin,
            force_transparent_fill,
        ),
        destination_marker: resolve_marker(
            options.destination_marker.as_ref(),
            Endpoint::Destination,
            force_transparent_fill,
        ),
    })
}

/// 必须恰好是两个有限数字 `[经度, 纬度]`
fn parse_position(field: &str, value: Option<&Value>) -> Result<[f64; 2], AppError> {
    let value = value.ok_or_else(|| AppError::Validation(format!("缺少 {field}")))?;
    let pair = match value.as_array().map(Vec::as_slice) {
        Some([lng, lat]) => lng.as_f64().zip(lat.as_f64()),
        _ => None,
    };
    let (lng, lat) = pair.ok_or_else(|| {
        AppError::Validation(format!("{field} 必须是 [经度, 纬度] 两个数字"))
    })?;

    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::Validation(format!("{field} 经度超出范围: {lng}")));
    }
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::Validation(format!("{field} 纬度超出范围: {lat}")));
    }
    Ok([lng, lat])
}

fn resolve_marker(
    marker: Option<&MarkerOptions>,
    endpoint: Endpoint,
    force_transparent_fill: bool,
) -> Option<ResolvedMarker> {
    let Some(marker) = marker else {
        // 未提供标记对象：默认可见、无圆
        return Some(ResolvedMarker {
            circle: None,
            icon_options: default_icon(),
            label: None,
            legend: None,
            label_style: endpoint.default_label_style().to_string(),
            custom_label_style: None,
        });
    };

    if marker.visible == Some(false) {
        return None;
    }

    let circle = match &marker.circle {
        Some(c) => resolve_circle(c, endpoint, force_transparent_fill),
        // 注入的默认圆圈固定不透明度，不受 forceTransparentFill 影响
        None => Some(endpoint.default_circle()),
    };

    Some(ResolvedMarker {
        circle,
        icon_options: IconOptions {
            icon_url: marker
                .icon_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ICON_URL.clone()),
            icon_size: marker.icon_size.unwrap_or(DEFAULT_ICON_SIZE),
            icon_anchor: marker.icon_anchor.unwrap_or(DEFAULT_ICON_ANCHOR),
        },
        label: marker.label.clone(),
        legend: marker.legend.clone(),
        label_style: marker
            .label_style
            .clone()
            .unwrap_or_else(|| endpoint.default_label_style().to_string()),
        custom_label_style: marker.custom_label_style.clone(),
    })
}

fn resolve_circle(
    circle: &CircleOptions,
    endpoint: Endpoint,
    force_transparent_fill: bool,
) -> Option<ResolvedCircle> {
    if circle.visible == Some(false) {
        return None;
    }
    let d = endpoint.default_circle();
    let fill_opacity = match circle.fill_opacity {
        Some(v) => v,
        None if force_transparent_fill => FORCED_FILL_OPACITY,
        None => d.fill_opacity,
    };
    Some(ResolvedCircle {
        visible: true,
        radius: circle.radius.unwrap_or(d.radius),
        color: circle.color.clone().unwrap_or(d.color),
        fill_color: circle.fill_color.clone().unwrap_or(d.fill_color),
        fill_opacity,
        weight: circle.weight.unwrap_or(d.weight),
        legend: circle.legend.clone().or(d.legend),
    })
}

fn default_icon() -> IconOptions {
    IconOptions {
        icon_url: DEFAULT_ICON_URL.clone(),
        icon_size: DEFAULT_ICON_SIZE,
        icon_anchor: DEFAULT_ICON_ANCHOR,
    }
}

/// 根据路线计划生成标记与路线要素
pub struct RouteBuilder {
    router: Arc<dyn VehicleRouter>,
}

impl RouteBuilder {
    pub fn new(router: Arc<dyn VehicleRouter>) -> Self {
        Self { router }
    }

    /// 顺序：起点标记、终点标记、驾车路线、直线。驾车路线获取失败时省略。
    pub async fn build(&self, plan: &RoutePlan) -> Vec<Value> {
        let mut features = Vec::new();

        for (marker, position) in [
            (&plan.origin_marker, plan.origin),
            (&plan.destination_marker, plan.destination),
        ] {
            if let Some(m) = marker {
                features.push(json!({
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": position },
                    "properties": { "markerOptions": m },
                }));
            }
        }

        if plan.show_vehicle {
            if let Some(geometry) = self.router.route(plan.origin, plan.destination).await {
                features.push(route_feature(geometry, RouteKind::Vehicle, &plan.vehicle_style));
            }
        }

        if plan.show_straight {
            let line = Geometry::LineString {
                coordinates: vec![plan.origin.to_vec(), plan.destination.to_vec()],
            };
            features.push(route_feature(line, RouteKind::Straight, &plan.straight_style));
        }

        features
    }
}

fn route_feature(geometry: Geometry, kind: RouteKind, style: &PathOptions) -> Value {
    let meters = match &geometry {
        Geometry::LineString { coordinates } => distance(coordinates),
        _ => 0.0,
    };
    json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": {
            "routeType": kind,
            "pathOptions": style,
            "distance": format_distance(meters),
        },
    })
}

const GEOMETRY_TYPES: [&str; 7] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

/// 将生成的要素前置合并到调用方 GeoJSON。
///
/// FeatureCollection 展开其 features；单个 Feature 作为一个元素；裸几何包装为 Feature。
/// 没有生成任何要素时原样返回调用方输入。
pub fn merge_features(generated: Vec<Value>, existing: Option<Value>) -> Result<Option<Value>, AppError> {
    if generated.is_empty() {
        return Ok(existing);
    }

    let mut features = generated;
    if let Some(existing) = existing {
        match existing.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => {
                if let Some(Value::Array(items)) = existing.get("features") {
                    features.extend(items.iter().cloned());
                }
            }
            Some("Feature") => features.push(existing),
            Some(t) if GEOMETRY_TYPES.contains(&t) => features.push(json!({
                "type": "Feature",
                "geometry": existing,
                "properties": {},
            })),
            _ => {
                return Err(AppError::Validation(
                    "geojson 必须是 FeatureCollection、Feature 或几何对象".into(),
                ));
            }
        }
    }

    Ok(Some(json!({ "type": "FeatureCollection", "features": features })))
}
