use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 内置默认图钉（25×41，锚点在底部中心）
const DEFAULT_PIN_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="25" height="41" viewBox="0 0 25 41"><path d="M12.5 0C5.6 0 0 5.6 0 12.5 0 21.9 12.5 41 12.5 41S25 21.9 25 12.5C25 5.6 19.4 0 12.5 0z" fill="#2a81cb" stroke="#1b5a8e" stroke-width="1"/><circle cx="12.5" cy="12.5" r="4.5" fill="#ffffff"/></svg>"##;

pub static DEFAULT_ICON_URL: Lazy<String> = Lazy::new(|| {
    format!(
        "data:image/svg+xml;base64,{}",
        base64_engine.encode(DEFAULT_PIN_SVG)
    )
});

pub const DEFAULT_ICON_SIZE: [u32; 2] = [25, 41];
pub const DEFAULT_ICON_ANCHOR: [i32; 2] = [12, 41];

/// 调用方未给出 fillOpacity 且开启强制透明填充时使用的不透明度
pub const FORCED_FILL_OPACITY: f64 = 0.3;

/// 路线请求（调用方原始输入）
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptions {
    /// 起点 `[经度, 纬度]`
    #[schema(value_type = Option<Vec<f64>>, example = json!([2.35, 48.85]))]
    #[serde(default)]
    pub origin: Option<Value>,
    /// 终点 `[经度, 纬度]`
    #[schema(value_type = Option<Vec<f64>>, example = json!([2.36, 48.86]))]
    #[serde(default)]
    pub destination: Option<Value>,
    /// 是否绘制驾车路线（默认 true）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_vehicle: Option<bool>,
    /// 是否绘制直线（默认 true）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_straight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_options: Option<PathOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub straight_options: Option<PathOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_marker: Option<MarkerOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_marker: Option<MarkerOptions>,
}

/// 折线样式（未给出的字段取该路线类型的默认值）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PathOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash_array: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

impl PathOptions {
    pub fn vehicle_default() -> Self {
        Self {
            color: Some("#3388ff".to_string()),
            weight: Some(5.0),
            dash_array: None,
            opacity: None,
        }
    }

    pub fn straight_default() -> Self {
        Self {
            color: Some("#ff0000".to_string()),
            weight: Some(3.0),
            dash_array: Some("5,5".to_string()),
            opacity: None,
        }
    }

    /// 逐字段以 `self` 覆盖默认值
    pub fn over(self, defaults: PathOptions) -> PathOptions {
        PathOptions {
            color: self.color.or(defaults.color),
            weight: self.weight.or(defaults.weight),
            dash_array: self.dash_array.or(defaults.dash_array),
            opacity: self.opacity.or(defaults.opacity),
        }
    }
}

/// 端点标记配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkerOptions {
    /// 是否显示（默认 true）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_size: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_anchor: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circle: Option<CircleOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_style: Option<String>,
    #[schema(value_type = Option<Object>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_label_style: Option<Value>,
}

/// 标记周围的圆形覆盖层
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    /// 半径（米）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend: Option<String>,
}

/// 起点还是终点，决定默认标签样式与默认圆的配色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Origin,
    Destination,
}

impl Endpoint {
    pub fn default_label_style(self) -> &'static str {
        match self {
            Endpoint::Origin => "style1",
            Endpoint::Destination => "style2",
        }
    }

    pub fn default_circle(self) -> ResolvedCircle {
        let (color, legend) = match self {
            Endpoint::Origin => ("#3388ff", None),
            Endpoint::Destination => ("#ff0000", Some("circle legend".to_string())),
        };
        ResolvedCircle {
            visible: true,
            radius: 500.0,
            color: color.to_string(),
            fill_color: color.to_string(),
            fill_opacity: 0.2,
            weight: 2.0,
            legend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCircle {
    pub visible: bool,
    pub radius: f64,
    pub color: String,
    pub fill_color: String,
    pub fill_opacity: f64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IconOptions {
    pub icon_url: String,
    pub icon_size: [u32; 2],
    pub icon_anchor: [i32; 2],
}

/// 写入标记要素 `properties.markerOptions` 的内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMarker {
    pub circle: Option<ResolvedCircle>,
    pub icon_options: IconOptions,
    pub label: Option<String>,
    pub legend: Option<String>,
    pub label_style: String,
    pub custom_label_style: Option<Value>,
}

/// 路线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Vehicle,
    Straight,
}

/// 校验与默认值合并后的路线计划（不可变，构建阶段不再做任何校验）
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub origin: [f64; 2],
    pub destination: [f64; 2],
    pub show_vehicle: bool,
    pub show_straight: bool,
    pub vehicle_style: PathOptions,
    pub straight_style: PathOptions,
    /// 不可见的标记为 `None`
    pub origin_marker: Option<ResolvedMarker>,
    pub destination_marker: Option<ResolvedMarker>,
}
