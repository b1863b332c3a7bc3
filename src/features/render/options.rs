use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{GeoJsonConfig, RenderConfig};
use crate::error::AppError;
use crate::features::route::{RouteOptions, RoutePlan, plan_route};
use crate::features::session::ImageFormat;

pub const MAX_DIMENSION: u32 = 4096;
pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_QUALITY: u32 = 100;

/// 渲染请求（全部字段可选）
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// 内联 GeoJSON（字符串或对象）
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub geojson: Option<Value>,
    /// GeoJSON 来源：http(s) URL、本地路径或 `-`（标准输入）
    #[serde(default)]
    pub geojsonfile: Option<String>,
    /// 图片宽度（默认 800）
    #[serde(default)]
    pub width: Option<u32>,
    /// 图片高度（默认 600）
    #[serde(default)]
    pub height: Option<u32>,
    /// 地图中心 `"经度,纬度"`；给出时不再按几何计算范围
    #[serde(default)]
    #[schema(example = "2.35,48.85")]
    pub center: Option<String>,
    #[serde(default)]
    pub zoom: Option<u32>,
    #[serde(default)]
    pub max_zoom: Option<u32>,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub tileserver_url: Option<String>,
    /// 在折线上绘制方向箭头
    #[serde(default)]
    pub arrows: Option<bool>,
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub marker_icon_options: Option<Value>,
    /// GeoJSON 图层样式
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub style: Option<Value>,
    /// 比例尺（对象或布尔）
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub scale: Option<Value>,
    /// 等待就绪的超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub halt_on_console_error: Option<bool>,
    #[serde(default)]
    pub show_legend: Option<bool>,
    #[serde(default)]
    pub show_scale: Option<bool>,
    #[serde(default)]
    pub show_north_arrow: Option<bool>,
    /// 未指定 fillOpacity 的圆使用 0.3 的填充不透明度
    #[serde(default)]
    pub force_transparent_fill: Option<bool>,
    #[serde(default, rename = "type")]
    pub format: Option<ImageFormat>,
    /// jpeg/webp 质量（1-100，默认 100）
    #[serde(default)]
    pub quality: Option<u32>,
    /// 通过外部压缩器优化输出
    #[serde(default)]
    pub optimize: Option<bool>,
    /// 只返回场景 HTML，不截图
    #[serde(default)]
    pub render_to_html: Option<bool>,
    #[serde(default)]
    pub routes: Option<RouteOptions>,
}

/// GeoJSON 的来源
#[derive(Debug, Clone, PartialEq)]
pub enum GeoJsonSource {
    None,
    Inline(Value),
    Remote(String),
    Local(PathBuf),
    Stdin,
}

/// 校验后的不可变渲染参数
#[derive(Debug, Clone)]
pub struct NormalizedOptions {
    pub source: GeoJsonSource,
    pub width: u32,
    pub height: u32,
    pub center: Option<[f64; 2]>,
    pub zoom: Option<u32>,
    pub max_zoom: u32,
    pub attribution: String,
    pub tileserver_url: String,
    pub arrows: bool,
    pub marker_icon_options: Option<Value>,
    pub style: Option<Value>,
    pub scale: Option<Value>,
    pub timeout: Duration,
    pub halt_on_console_error: bool,
    pub show_legend: bool,
    pub show_scale: bool,
    pub show_north_arrow: bool,
    pub force_transparent_fill: bool,
    pub format: ImageFormat,
    pub quality: u8,
    pub optimize: bool,
    pub render_to_html: bool,
    pub route: Option<RoutePlan>,
}

impl RenderOptions {
    /// 一次性完成校验与默认值合并，不做任何 I/O。
    pub fn normalize(
        &self,
        render: &RenderConfig,
        geojson: &GeoJsonConfig,
    ) -> Result<NormalizedOptions, AppError> {
        let width = check_dimension("width", self.width.unwrap_or(DEFAULT_WIDTH))?;
        let height = check_dimension("height", self.height.unwrap_or(DEFAULT_HEIGHT))?;

        let quality = self.quality.unwrap_or(DEFAULT_QUALITY);
        if !(1..=100).contains(&quality) {
            return Err(AppError::Validation(format!("quality 必须在 1..=100 之间: {quality}")));
        }

        let timeout = match self.timeout {
            Some(0) => return Err(AppError::Validation("timeout 必须大于 0".into())),
            Some(ms) => Duration::from_millis(ms),
            None => render.ready_timeout(),
        };

        let center = self.center.as_deref().map(parse_center).transpose()?;
        let force_transparent_fill = self.force_transparent_fill.unwrap_or(false);
        let route = self
            .routes
            .as_ref()
            .map(|r| plan_route(r, force_transparent_fill))
            .transpose()?;

        let source = self.source(geojson)?;

        Ok(NormalizedOptions {
            source,
            width,
            height,
            center,
            zoom: self.zoom,
            max_zoom: self.max_zoom.unwrap_or(render.max_zoom),
            attribution: self
                .attribution
                .clone()
                .unwrap_or_else(|| render.attribution.clone()),
            tileserver_url: self
                .tileserver_url
                .clone()
                .unwrap_or_else(|| render.tileserver_url.clone()),
            arrows: self.arrows.unwrap_or(false),
            marker_icon_options: self.marker_icon_options.clone(),
            style: self.style.clone(),
            scale: self.scale.clone(),
            timeout,
            halt_on_console_error: self.halt_on_console_error.unwrap_or(false),
            show_legend: self.show_legend.unwrap_or(true),
            show_scale: self.show_scale.unwrap_or(true),
            show_north_arrow: self.show_north_arrow.unwrap_or(true),
            force_transparent_fill,
            format: self.format.unwrap_or_default(),
            quality: quality as u8,
            optimize: self.optimize.unwrap_or(false),
            render_to_html: self.render_to_html.unwrap_or(false),
            route,
        })
    }

    fn source(&self, config: &GeoJsonConfig) -> Result<GeoJsonSource, AppError> {
        match (&self.geojson, &self.geojsonfile) {
            (Some(_), Some(_)) => Err(AppError::ConflictingInput(
                "geojson 与 geojsonfile 不能同时提供".into(),
            )),
            (Some(Value::String(text)), None) => serde_json::from_str(text)
                .map(GeoJsonSource::Inline)
                .map_err(|e| AppError::Validation(format!("geojson 不是合法 JSON: {e}"))),
            (Some(Value::Null), None) | (None, None) => Ok(GeoJsonSource::None),
            (Some(v), None) => Ok(GeoJsonSource::Inline(v.clone())),
            (None, Some(file)) => {
                let lower = file.to_ascii_lowercase();
                if lower.starts_with("http://") || lower.starts_with("https://") {
                    return Ok(GeoJsonSource::Remote(file.clone()));
                }
                if !config.allow_local_files {
                    return Err(AppError::Validation(
                        "geojsonfile 只允许 http(s) URL".into(),
                    ));
                }
                if file == "-" {
                    Ok(GeoJsonSource::Stdin)
                } else {
                    Ok(GeoJsonSource::Local(PathBuf::from(file)))
                }
            }
        }
    }
}

fn check_dimension(field: &str, value: u32) -> Result<u32, AppError> {
    if (1..=MAX_DIMENSION).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::Validation(format!(
            "{field} 必须在 1..={MAX_DIMENSION} 之间: {value}"
        )))
    }
}

/// `"经度,纬度"`
fn parse_center(text: &str) -> Result<[f64; 2], AppError> {
    let invalid = || AppError::Validation(format!("center 格式应为 \"经度,纬度\": {text}"));
    let (lng, lat) = text.split_once(',').ok_or_else(invalid)?;
    let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
    let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return Err(invalid());
    }
    Ok([lng, lat])
}
