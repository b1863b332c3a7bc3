//! 路线构建：OSRM 驾车路线（带重试/退避）、直线路线、端点标记，以及与调用方 GeoJSON 的合并。

pub mod builder;
pub mod models;
pub mod osrm;

pub use builder::{RouteBuilder, merge_features, plan_route};
pub use models::{CircleOptions, MarkerOptions, PathOptions, RouteOptions, RoutePlan};
pub use osrm::{OsrmClient, VehicleRouter};
