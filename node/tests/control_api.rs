use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use sensor_node::metrics::Metrics;
use sensor_node::model::DeviceConfig;
use sensor_node::network::StaticLink;
use sensor_node::rest::create_router;
use sensor_node::state::{Device, SharedDevice};
use sensor_node::store::{ConfigStore, MemoryStorage, Secrets};
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tower::ServiceExt;

const GRACE: Duration = Duration::from_secs(3);

fn device(storage: &MemoryStorage) -> SharedDevice {
    let store = ConfigStore::load(Box::new(storage.clone()), &Secrets::default());
    let link = StaticLink::new("lab-wifi", Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))));
    SharedDevice::new(Device::new(store, Box::new(link), Metrics::new().unwrap()))
}

fn app(storage: &MemoryStorage) -> (Router, SharedDevice) {
    let device = device(storage);
    (create_router(device.clone(), GRACE), device)
}

async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_get_config_returns_defaults_without_password() {
    let storage = MemoryStorage::with_config(DeviceConfig {
        broker_password: "hunter2".to_string(),
        ..DeviceConfig::default()
    });
    let (app, _) = app(&storage);

    let (status, body) = send(app, "GET", "/config", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_id"], "Sensor-TempHumid1");
    assert_eq!(body["mqtt_port"], 1883);
    assert_eq!(body["sample_interval_seconds"], 60);
    assert_eq!(body["sensor_pin"], 15);
    assert!(body.get("mqtt_password").is_none());
    assert!(!body.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_post_config_applies_and_schedules_restart() {
    let storage = MemoryStorage::default();
    let (app, device) = app(&storage);

    let (status, body) = send(app.clone(), "POST", "/config", r#"{"sensor_pin": 16}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated_fields"], json!(["sensor_pin"]));
    assert_eq!(body["reboot"], true);
    assert_eq!(
        body["message"],
        "Configuration updated successfully. Device will reboot in 3 seconds."
    );
    assert_eq!(storage.saved().unwrap().sensor_pin, 16);
    assert!(device.lock().unwrap().store.pending_restart().is_armed());

    let (_, config) = send(app, "GET", "/config", "").await;
    assert_eq!(config["sensor_pin"], 16);
}

#[tokio::test]
async fn test_password_is_write_only() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/config",
        r#"{"mqtt_user": "node", "mqtt_password": "s3cret"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated_fields"], json!(["mqtt_user", "mqtt_password"]));
    assert_eq!(storage.saved().unwrap().broker_password, "s3cret");

    let (_, config) = send(app, "GET", "/config", "").await;
    assert_eq!(config["mqtt_user"], "node");
    assert!(config.get("mqtt_password").is_none());
}

#[tokio::test]
async fn test_invalid_field_is_rejected() {
    let storage = MemoryStorage::default();
    let (app, device) = app(&storage);
    let writes = storage.writes();

    let (status, body) = send(app, "POST", "/config", r#"{"mqtt_port": "abc"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidField: mqtt_port");
    assert_eq!(body["status_code"], 400);
    assert!(body["reason"].is_string());
    assert_eq!(storage.writes(), writes);
    assert!(!device.lock().unwrap().store.pending_restart().is_armed());
}

#[tokio::test]
async fn test_empty_patch_is_rejected() {
    let storage = MemoryStorage::default();

    for body in ["{}", ""] {
        let (app, _) = app(&storage);
        let (status, response) = send(app, "POST", "/config", body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "EmptyRequestBody");
    }
}

#[tokio::test]
async fn test_unknown_field_rejects_whole_patch() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);
    let writes = storage.writes();

    let (status, body) = send(
        app.clone(),
        "POST",
        "/config",
        r#"{"sensor_pin": 16, "colour": "blue"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UnknownField: colour");
    assert_eq!(storage.writes(), writes);

    let (_, config) = send(app, "GET", "/config", "").await;
    assert_eq!(config["sensor_pin"], 15);
}

#[tokio::test]
async fn test_one_bad_field_rejects_the_rest() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);

    let (status, body) = send(
        app,
        "POST",
        "/config",
        r#"{"location": "Lab 2", "sensor_pin": 24}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidField: sensor_pin");
    assert_eq!(storage.saved().unwrap().location, "");
}

#[tokio::test]
async fn test_malformed_json() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);

    let (status, body) = send(app.clone(), "POST", "/config", r#"{"sensor_pin": "#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "RequestParseFault");

    let (status, body) = send(app, "POST", "/config", "[16]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "RequestParseFault");
}

#[tokio::test]
async fn test_storage_fault_is_internal_error() {
    let storage = MemoryStorage::default();
    let (app, device) = app(&storage);
    storage.set_fail_writes(true);

    let (status, body) = send(app, "POST", "/config", r#"{"sensor_pin": 16}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "InternalError");
    let device = device.lock().unwrap();
    assert_eq!(device.store.get().sensor_pin, 15);
    assert!(!device.store.pending_restart().is_armed());
}

#[tokio::test]
async fn test_unknown_route() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);

    let (status, body) = send(app, "GET", "/metrics", "").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "RouteNotFound");
    assert_eq!(body["status_code"], 404);
}

#[tokio::test]
async fn test_wrong_method() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);

    let request = Request::builder()
        .method("DELETE")
        .uri("/config")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST");

    let (status, body) = send(app, "POST", "/status", "{}").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "MethodNotAllowed");
}

#[tokio::test]
async fn test_status_before_first_reading() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);

    let (status, body) = send(app, "GET", "/status", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_id"], "Sensor-TempHumid1");
    assert_eq!(body["wifi_connected"], true);
    assert_eq!(body["wifi_ssid"], "lab-wifi");
    assert_eq!(body["ip_address"], "192.168.1.50");
    assert_eq!(body["mqtt_connected"], false);
    assert_eq!(body["mqtt_broker"], "localhost");
    assert_eq!(body["sample_interval_seconds"], 60);
    assert!(body["last_temperature"].is_null());
    assert!(body["last_humidity"].is_null());
    assert_eq!(body["restart_pending"], false);
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_status_reflects_device_state() {
    let storage = MemoryStorage::default();
    let (app, device) = app(&storage);
    {
        let mut device = device.lock().unwrap();
        device.mqtt_connected = true;
        device.readings.temperature = Some(22.4);
        device.readings.humidity = Some(48.0);
        device.readings.timestamp = Some("2026-03-01T12:00:00Z".to_string());
    }

    let (_, body) = send(app, "GET", "/status", "").await;

    assert_eq!(body["mqtt_connected"], true);
    assert_eq!(body["last_temperature"], 22.4);
    assert_eq!(body["last_humidity"], 48.0);
    assert_eq!(body["last_reading_timestamp"], "2026-03-01T12:00:00Z");
}

#[tokio::test]
async fn test_oversized_body_is_refused() {
    let storage = MemoryStorage::default();
    let (app, _) = app(&storage);
    let location = "x".repeat(8 * 1024);
    let body = json!({ "location": location }).to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/config")
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(storage.saved().unwrap().location, "");
}
