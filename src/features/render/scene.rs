use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use serde_json::{Value, json};

use super::options::NormalizedOptions;
use crate::config::RenderConfig;
use crate::error::AppError;
use crate::features::geo::{Bounds, extent_of, geometries_of};

pub const SCENE_TEMPLATE: &str = "scene.html.jinja";
const BUILTIN_SCENE: &str = include_str!("../../../templates/scene.html.jinja");

/// 只给出 center 时使用的缩放级别
const DEFAULT_CENTER_ZOOM: u32 = 12;

/// 地图初始视野
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SceneView {
    /// `center` 为 `[纬度, 经度]`
    Center { center: [f64; 2], zoom: u32 },
    #[serde(rename_all = "camelCase")]
    Bounds { bounds: Bounds, max_zoom: u32 },
    World { zoom: u32 },
}

/// 选择视野：显式 center 优先，否则按几何范围，二者皆无时显示全球。
pub fn view_for(options: &NormalizedOptions, geojson: Option<&Value>) -> SceneView {
    if let Some([lng, lat]) = options.center {
        let zoom = options
            .zoom
            .unwrap_or(DEFAULT_CENTER_ZOOM)
            .min(options.max_zoom);
        return SceneView::Center {
            center: [lat, lng],
            zoom,
        };
    }

    let bounds = geojson.and_then(|g| {
        let geometries = geometries_of(g);
        extent_of(&geometries, options.width, options.height)
    });
    match bounds {
        Some(bounds) => SceneView::Bounds {
            bounds,
            max_zoom: options.zoom.unwrap_or(options.max_zoom).min(options.max_zoom),
        },
        None => SceneView::World {
            zoom: options.zoom.unwrap_or(1).min(options.max_zoom),
        },
    }
}

/// 序列化为可安全嵌入 `<script>` 的 JSON：转义 `<`、`>`、`&` 与 U+2028/U+2029
pub fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String, AppError> {
    let raw = serde_json::to_string(value).map_err(|e| AppError::Json(e.to_string()))?;
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[derive(Serialize)]
struct SceneContext<'a> {
    width: u32,
    height: u32,
    leaflet_js_url: &'a str,
    leaflet_css_url: &'a str,
    decorator_js_url: &'a str,
    arrows: bool,
    show_north_arrow: bool,
    scene_json: String,
}

/// 场景 HTML 构造器（minijinja）
pub struct SceneBuilder {
    env: Environment<'static>,
    config: RenderConfig,
}

impl SceneBuilder {
    /// 配置了 `template_dir` 时从该目录加载 `scene.html.jinja`，否则使用内置模板
    pub fn new(config: &RenderConfig) -> Result<Self, AppError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        match &config.template_dir {
            Some(dir) => env.set_loader(minijinja::path_loader(dir)),
            None => env
                .add_template(SCENE_TEMPLATE, BUILTIN_SCENE)
                .map_err(|e| AppError::Internal(format!("内置场景模板无效: {e}")))?,
        }
        Ok(Self {
            env,
            config: config.clone(),
        })
    }

    pub fn render(&self, options: &NormalizedOptions, geojson: Option<&Value>) -> Result<String, AppError> {
        let scene = json!({
            "tileserverUrl": options.tileserver_url,
            "attribution": options.attribution,
            "maxZoom": options.max_zoom,
            "view": view_for(options, geojson),
            "geojson": geojson,
            "style": options.style,
            "markerIconOptions": options.marker_icon_options,
            "scale": options.scale,
            "showScale": options.show_scale,
            "showLegend": options.show_legend,
            "arrows": options.arrows,
        });

        let ctx = SceneContext {
            width: options.width,
            height: options.height,
            leaflet_js_url: &self.config.leaflet_js_url,
            leaflet_css_url: &self.config.leaflet_css_url,
            decorator_js_url: &self.config.decorator_js_url,
            arrows: options.arrows,
            show_north_arrow: options.show_north_arrow,
            scene_json: script_json(&scene)?,
        };

        let tpl = self
            .env
            .get_template(SCENE_TEMPLATE)
            .map_err(|e| AppError::Internal(format!("加载场景模板失败（{SCENE_TEMPLATE}）: {e}")))?;
        tpl.render(&ctx)
            .map_err(|e| AppError::Internal(format!("渲染场景模板失败（{SCENE_TEMPLATE}）: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoJsonConfig;
    use crate::features::render::options::RenderOptions;

    fn normalized(v: Value) -> NormalizedOptions {
        serde_json::from_value::<RenderOptions>(v)
            .expect("options")
            .normalize(&RenderConfig::default(), &GeoJsonConfig::default())
            .expect("normalize")
    }

    #[test]
    fn script_json_cannot_close_the_script_block() {
        let s = script_json(&json!({"label": "</script><script>alert(1)</script>"})).unwrap();
        assert!(!s.contains("</script>"));
        assert!(s.contains("\\u003c/script\\u003e"));
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(back["label"], "</script><script>alert(1)</script>");
    }

    #[test]
    fn center_wins_over_geometry() {
        let opts = normalized(json!({"center": "2.35,48.85", "zoom": 20}));
        let geo = json!({"type": "Point", "coordinates": [10.0, 10.0]});
        assert_eq!(
            view_for(&opts, Some(&geo)),
            SceneView::Center {
                center: [48.85, 2.35],
                zoom: 15
            }
        );
    }

    #[test]
    fn geometry_gives_bounds_and_empty_gives_world() {
        let opts = normalized(json!({}));
        let geo = json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]});
        assert!(matches!(view_for(&opts, Some(&geo)), SceneView::Bounds { max_zoom: 15, .. }));
        assert!(matches!(view_for(&opts, None), SceneView::World { zoom: 1 }));
    }

    #[test]
    fn builtin_template_renders_scene() {
        let builder = SceneBuilder::new(&RenderConfig::default()).expect("builder");
        let opts = normalized(json!({"width": 320, "height": 240, "arrows": true}));
        let geo = json!({"type": "Point", "coordinates": [2.35, 48.85]});
        let html = builder.render(&opts, Some(&geo)).expect("render");

        assert!(html.contains("#map { width: 320px; height: 240px; }"));
        assert!(html.contains("window.mapRendered = true"));
        assert!(html.contains("leaflet.polylineDecorator.js"));
        assert!(html.contains("\"kind\":\"bounds\""));
    }
}
