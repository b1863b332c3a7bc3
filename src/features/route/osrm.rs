use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RouteConfig;
use crate::error::AppError;
use crate::features::geo::Geometry;

/// 驾车路线能力：失败时返回 `None`（软失败，不中断渲染）
#[async_trait]
pub trait VehicleRouter: Send + Sync {
    async fn route(&self, origin: [f64; 2], destination: [f64; 2]) -> Option<Geometry>;
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: Geometry,
}

/// OSRM 路线服务客户端（单次超时 + 线性退避重试）
#[derive(Debug, Clone)]
pub struct OsrmClient {
    client: Client,
    base_url: String,
    attempt_timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl OsrmClient {
    pub fn new(config: &RouteConfig) -> Result<Self, AppError> {
        let client = crate::http::client_default()?.clone();
        Ok(Self {
            client,
            base_url: config.osrm_base_url.trim_end_matches('/').to_string(),
            attempt_timeout: config.attempt_timeout(),
            retries: config.retries,
            backoff: config.backoff(),
        })
    }

    pub fn route_url(&self, origin: [f64; 2], destination: [f64; 2]) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url, origin[0], origin[1], destination[0], destination[1]
        )
    }

    async fn fetch_once(&self, url: &str) -> Result<Geometry, AppError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.attempt_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Network(format!("路线服务返回 HTTP {status}")));
        }

        let body: OsrmResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Json(format!("路线服务响应无法解析: {e}")))?;

        match body.routes.into_iter().next().map(|r| r.geometry) {
            Some(g @ Geometry::LineString { .. }) => Ok(g),
            Some(_) => Err(AppError::Network("路线几何不是 LineString".into())),
            None => Err(AppError::Network("路线服务未返回任何路线".into())),
        }
    }
}

#[async_trait]
impl VehicleRouter for OsrmClient {
    async fn route(&self, origin: [f64; 2], destination: [f64; 2]) -> Option<Geometry> {
        let url = self.route_url(origin, destination);
        let attempts = self.retries + 1;

        for attempt in 1..=attempts {
            match self.fetch_once(&url).await {
                Ok(geometry) => return Some(geometry),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "驾车路线获取失败");
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        tracing::warn!(%url, "驾车路线重试耗尽，省略该路线");
        None
    }
}
