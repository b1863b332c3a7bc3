mod common;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::spawn_stub;
use staticmap_backend::config::RouteConfig;
use staticmap_backend::features::geo::{format_distance, haversine};
use staticmap_backend::features::route::{
    OsrmClient, RouteBuilder, RouteOptions, merge_features, plan_route,
};

#[derive(Clone)]
struct Stub {
    hits: Arc<AtomicUsize>,
    fail: bool,
    delay: Duration,
}

async fn osrm_route(State(stub): State<Stub>, Path(coords): Path<String>) -> impl IntoResponse {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    if !stub.delay.is_zero() {
        tokio::time::sleep(stub.delay).await;
    }
    if stub.fail {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"code": "Error"})));
    }
    assert_eq!(coords, "2.35,48.85;2.36,48.86");
    (
        StatusCode::OK,
        Json(json!({
            "code": "Ok",
            "routes": [{
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[2.35, 48.85], [2.352, 48.857], [2.36, 48.86]]
                }
            }]
        })),
    )
}

async fn osrm_stub(fail: bool, delay: Duration) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/route/v1/driving/:coords", get(osrm_route))
        .with_state(Stub {
            hits: Arc::clone(&hits),
            fail,
            delay,
        });
    (spawn_stub(app).await, hits)
}

fn builder_for(base: &str, retries: u32, attempt_timeout_ms: u64) -> RouteBuilder {
    let config = RouteConfig {
        osrm_base_url: base.to_string(),
        attempt_timeout_ms,
        retries,
        backoff_ms: 10,
    };
    RouteBuilder::new(Arc::new(OsrmClient::new(&config).unwrap()))
}

fn options(value: Value) -> RouteOptions {
    serde_json::from_value(value).unwrap()
}

fn route_types(features: &[Value]) -> Vec<&str> {
    features
        .iter()
        .filter_map(|f| f["properties"]["routeType"].as_str())
        .collect()
}

#[tokio::test]
async fn vehicle_route_comes_from_osrm() {
    let (base, hits) = osrm_stub(false, Duration::ZERO).await;
    let builder = builder_for(&base, 2, 2000);
    let plan = plan_route(
        &options(json!({
            "origin": [2.35, 48.85],
            "destination": [2.36, 48.86],
            "showStraight": false,
            "vehicleOptions": {"color": "#00aa00"}
        })),
        false,
    )
    .unwrap();

    let features = builder.build(&plan).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(route_types(&features), vec!["vehicle"]);

    let vehicle = features.last().unwrap();
    assert_eq!(vehicle["geometry"]["coordinates"].as_array().unwrap().len(), 3);
    assert_eq!(vehicle["properties"]["pathOptions"]["color"], "#00aa00");
    assert_eq!(vehicle["properties"]["pathOptions"]["weight"], 5.0);
    assert!(vehicle["properties"]["distance"].as_str().unwrap().ends_with(" km"));
}

#[tokio::test]
async fn failing_router_is_retried_then_omitted() {
    let (base, hits) = osrm_stub(true, Duration::ZERO).await;
    let builder = builder_for(&base, 2, 2000);
    let plan = plan_route(
        &options(json!({"origin": [2.35, 48.85], "destination": [2.36, 48.86]})),
        false,
    )
    .unwrap();

    let features = builder.build(&plan).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(route_types(&features), vec!["straight"]);
    assert_eq!(features.len(), 3);
}

#[tokio::test]
async fn slow_router_times_out_per_attempt() {
    let (base, hits) = osrm_stub(false, Duration::from_secs(5)).await;
    let builder = builder_for(&base, 0, 100);
    let plan = plan_route(
        &options(json!({
            "origin": [2.35, 48.85],
            "destination": [2.36, 48.86],
            "showStraight": false
        })),
        false,
    )
    .unwrap();

    let features = tokio::time::timeout(Duration::from_secs(3), builder.build(&plan))
        .await
        .expect("attempt timeout bounds the build");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(route_types(&features).is_empty());
}

#[tokio::test]
async fn straight_only_route_matches_haversine() {
    // showVehicle=false 时不访问路线服务
    let (base, hits) = osrm_stub(true, Duration::ZERO).await;
    let builder = builder_for(&base, 2, 2000);
    let plan = plan_route(
        &options(json!({
            "origin": [2.35, 48.85],
            "destination": [2.36, 48.86],
            "showVehicle": false,
            "showStraight": true
        })),
        false,
    )
    .unwrap();

    let features = builder.build(&plan).await;
    let merged = merge_features(features, None).unwrap().unwrap();
    assert_eq!(merged["type"], "FeatureCollection");
    let features = merged["features"].as_array().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let points: Vec<&Value> = features
        .iter()
        .filter(|f| f["geometry"]["type"] == "Point")
        .collect();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p["properties"]["markerOptions"].is_object()));

    let lines: Vec<&Value> = features
        .iter()
        .filter(|f| f["geometry"]["type"] == "LineString")
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["properties"]["routeType"], "straight");
    assert_eq!(lines[0]["properties"]["pathOptions"]["dashArray"], "5,5");

    let expected = format_distance(haversine((2.35, 48.85), (2.36, 48.86)));
    assert_eq!(lines[0]["properties"]["distance"], expected.as_str());
}

#[tokio::test]
async fn generated_features_precede_caller_geojson() {
    let (base, _) = osrm_stub(true, Duration::ZERO).await;
    let builder = builder_for(&base, 0, 2000);
    let plan = plan_route(
        &options(json!({
            "origin": [2.35, 48.85],
            "destination": [2.36, 48.86],
            "showVehicle": false,
            "originMarker": {"visible": false},
            "destinationMarker": {"visible": false}
        })),
        false,
    )
    .unwrap();

    let existing = json!({
        "type": "FeatureCollection",
        "features": [{"type": "Feature", "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}, "properties": {"name": "caller"}}]
    });
    let merged = merge_features(builder.build(&plan).await, Some(existing))
        .unwrap()
        .unwrap();
    let features = merged["features"].as_array().unwrap();
    assert_eq!(features.len(), 2);
    assert_eq!(features[0]["properties"]["routeType"], "straight");
    assert_eq!(features[1]["properties"]["name"], "caller");
}
