use serde::{Deserialize, Serialize};
use serde_json::Value;

/// GeoJSON 位置：`[经度, 纬度, (海拔)]`
pub type Position = Vec<f64>;

/// GeoJSON 几何对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    /// 包含外环与所有内环（洞）
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// 递归展开为 `(经度, 纬度)` 列表；维度不足 2 的位置被跳过。
    pub fn flatten_lng_lat(&self, out: &mut Vec<(f64, f64)>) {
        fn push(out: &mut Vec<(f64, f64)>, p: &Position) {
            if let Some(ll) = lng_lat(p) {
                out.push(ll);
            }
        }

        match self {
            Geometry::Point { coordinates } => push(out, coordinates),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                coordinates.iter().for_each(|p| push(out, p));
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().flatten().for_each(|p| push(out, p));
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().for_each(|p| push(out, p));
            }
            Geometry::GeometryCollection { geometries } => {
                for g in geometries {
                    g.flatten_lng_lat(out);
                }
            }
        }
    }
}

/// 读取位置的前两个分量
pub fn lng_lat(p: &[f64]) -> Option<(f64, f64)> {
    match p {
        [lng, lat, ..] => Some((*lng, *lat)),
        _ => None,
    }
}

/// 从任意 GeoJSON 值（FeatureCollection / Feature / 几何）中提取所有可解析的几何。
///
/// 无法解析的要素（如 `geometry: null` 或未知类型）直接跳过。
pub fn geometries_of(value: &Value) -> Vec<Geometry> {
    let mut out = Vec::new();
    collect_geometries(value, &mut out);
    out
}

fn collect_geometries(value: &Value, out: &mut Vec<Geometry>) {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            if let Some(features) = value.get("features").and_then(Value::as_array) {
                for f in features {
                    collect_geometries(f, out);
                }
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry") {
                collect_geometries(geometry, out);
            }
        }
        Some(_) => {
            if let Ok(g) = serde_json::from_value::<Geometry>(value.clone()) {
                out.push(g);
            }
        }
        None => {}
    }
}
