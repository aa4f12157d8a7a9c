//! HTTP Server & Routing Integration Tests

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use helpers::{demo_state, generate_wav_bytes, stub_providers, AudioConfig, StubFingerprintProvider};
use http_body_util::BodyExt;
use pulse_ai::{build_router, AppState};
use pulse_common::RecapConfig;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn test_app_state(confidence: f64) -> AppState {
    demo_state(
        RecapConfig::default(),
        stub_providers(StubFingerprintProvider::demo(confidence)),
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// TC-HTTP-001: health reports module, version and registry size
#[tokio::test]
async fn tc_http_001_health_check() {
    let app = build_router(test_app_state(0.92));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "pulse-ai");
    assert_eq!(json["broadcasts"], 2);
    assert!(json.get("last_error").is_none());
}

/// TC-HTTP-002: JSON without audio runs demo mode
#[tokio::test(start_paused = true)]
async fn tc_http_002_demo_mode_recap() {
    let app = build_router(test_app_state(0.92));

    let response = app
        .oneshot(json_post("/recognize", json!({"preferredLeagues": ["NFL"]})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let data = &json["data"];
    assert_eq!(data["broadcastId"], "nfl_2024_sea_hou_001");
    assert_eq!(data["generationPhase"], "enhanced");
    assert!(data["narrativeText"].as_str().unwrap().contains("Witherspoon"));
    assert_eq!(data["audioClip"]["mimeType"], "audio/wav");
    assert_eq!(data["latency"]["stages"].as_array().unwrap().len(), 4);

    let audio = STANDARD.decode(data["audioClip"]["dataBase64"].as_str().unwrap()).unwrap();
    assert_eq!(&audio[..4], b"RIFF");
}

/// TC-HTTP-003: raw WAV body is matched and recapped
#[tokio::test(start_paused = true)]
async fn tc_http_003_raw_wav_upload() {
    let app = build_router(test_app_state(0.92));
    let wav = generate_wav_bytes(&AudioConfig {
        channels: 2,
        ..Default::default()
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/recognize?user_id=u-17")
                .header(header::CONTENT_TYPE, "audio/wav")
                .body(Body::from(wav))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["confidence"], 0.92);
    assert!(json["data"]["matchReason"].as_str().unwrap().contains("stub"));
}

/// TC-HTTP-004: failed match returns the category, stage and partial trace
#[tokio::test(start_paused = true)]
async fn tc_http_004_no_match_error_envelope() {
    // Given: every candidate is below the confidence threshold
    let state = test_app_state(0.3);
    let app = build_router(state.clone());
    let audio = STANDARD.encode(generate_wav_bytes(&AudioConfig::default()));

    // When: an audio sample is posted
    let response = app
        .oneshot(json_post("/recognize", json!({"audioBase64": audio})))
        .await
        .unwrap();

    // Then: 404 envelope; an unrecognized sample leaves health untouched
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "NO_MATCH");
    assert_eq!(json["error"]["category"], "couldn't recognize the broadcast");
    assert_eq!(json["error"]["stage"], "match");
    assert_eq!(json["error"]["latency"]["stages"].as_array().unwrap().len(), 1);
    assert!(state.last_error.read().await.is_none());
}

/// TC-HTTP-005: voice-only returns audio bytes with latency headers
#[tokio::test(start_paused = true)]
async fn tc_http_005_voice_only() {
    let app = build_router(test_app_state(0.92));

    let response = app
        .oneshot(json_post("/recognize/voice-only", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
    assert_eq!(headers["x-generation-phase"], "enhanced");
    let latency: u64 = headers["x-total-latency-ms"].to_str().unwrap().parse().unwrap();
    assert!(latency <= 1000);
    assert!(headers.contains_key("x-narrative-text"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..4], b"RIFF");
}

/// TC-HTTP-006: feed ingestion reports inserts and duplicates
#[tokio::test]
async fn tc_http_006_feed_ingestion() {
    let app = build_router(test_app_state(0.92));
    let event = json!({
        "broadcastId": "nfl_2024_sea_hou_001",
        "timestampSeconds": 905.0,
        "eventType": "sack",
        "description": "Boye Mafe sacks the quarterback",
        "teamRef": "Seahawks",
        "playerRef": "Boye Mafe",
        "rawStats": {"quarter": 4, "time_remaining": "0:52", "score_home": 24, "score_away": 21}
    });

    let response = app
        .oneshot(json_post("/feed/events", json!([event.clone(), event])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["inserted"], 1);
    assert_eq!(json["data"]["duplicates"], 1);
}

/// TC-HTTP-007: registered broadcasts are listed with their event counts
#[tokio::test]
async fn tc_http_007_register_and_list_broadcasts() {
    let app = build_router(test_app_state(0.92));

    let response = app
        .clone()
        .oneshot(json_post(
            "/broadcasts",
            json!({
                "broadcastId": "nhl_2024_sea_van_001",
                "league": "NHL",
                "homeTeam": "Kraken",
                "awayTeam": "Canucks",
                "live": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/broadcasts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    let broadcasts = json["data"].as_array().unwrap();
    assert_eq!(broadcasts.len(), 3);

    let kraken = broadcasts
        .iter()
        .find(|b| b["broadcastId"] == "nhl_2024_sea_van_001")
        .unwrap();
    assert_eq!(kraken["eventCount"], 0);
    assert!(kraken["newestEventSeconds"].is_null());

    let nfl = broadcasts
        .iter()
        .find(|b| b["broadcastId"] == "nfl_2024_sea_hou_001")
        .unwrap();
    assert_eq!(nfl["eventCount"], 2);
}

/// TC-HTTP-008: metrics exposes stage targets and the run summary
#[tokio::test(start_paused = true)]
async fn tc_http_008_metrics_after_runs() {
    let state = test_app_state(0.92);
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(json_post("/recognize", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["globalDeadlineMs"], 1000);
    assert_eq!(data["stageTargetsMs"]["match"], 200);
    assert_eq!(data["stageTargetsMs"]["synthesize"], 250);
    assert_eq!(data["summary"]["runs"], 1);
    assert_eq!(data["summary"]["success"], 1);

    let stages = data["summary"]["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 4);
    assert_eq!(stages[0]["stage"], "match");
    assert_eq!(stages[0]["runs"], 1);
    assert!(stages[2]["avgMs"].as_f64().unwrap() > 0.0);
}

/// TC-HTTP-009: malformed input is a 400 with the shared envelope
#[tokio::test]
async fn tc_http_009_bad_request() {
    let app = build_router(test_app_state(0.92));

    let response = app
        .oneshot(json_post("/recognize", json!({"audioBase64": "%%%"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

/// TC-HTTP-010: negative feed timestamps are rejected before reaching the cache
#[tokio::test]
async fn tc_http_010_negative_feed_timestamp_rejected() {
    // Given: an event far before the start of the broadcast
    let state = test_app_state(0.92);
    let app = build_router(state.clone());
    let event = json!({
        "broadcastId": "nfl_2024_sea_hou_001",
        "timestampSeconds": -1e300,
        "eventType": "sack",
        "description": "Boye Mafe sacks the quarterback",
        "teamRef": "Seahawks",
        "rawStats": {}
    });

    // When: it is posted to the feed
    let response = app.oneshot(json_post("/feed/events", json!([event]))).await.unwrap();

    // Then: 400, cache unchanged
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.cache.event_count("nfl_2024_sea_hou_001"), 2);
}

/// TC-HTTP-011: a matcher outage marks the service degraded
#[tokio::test(start_paused = true)]
async fn tc_http_011_service_fault_degrades_health() {
    // Given: a fingerprint provider that never answers inside the budget
    let state = demo_state(
        RecapConfig::default(),
        stub_providers(StubFingerprintProvider::demo(0.92).with_latency(Duration::from_secs(30))),
    );
    let app = build_router(state);
    let audio = STANDARD.encode(generate_wav_bytes(&AudioConfig::default()));

    // When: a run fails on the matcher
    let response = app
        .clone()
        .oneshot(json_post("/recognize", json!({"audioBase64": audio})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "MATCHER_UNAVAILABLE");
    assert_eq!(json["error"]["category"], "recognition is unavailable right now");

    // Then: health reports the failure
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert!(json["last_error"].as_str().unwrap().contains("matcher"));
}
