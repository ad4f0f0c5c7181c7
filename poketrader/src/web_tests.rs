//! Request-level tests for the JSON API

use super::*;
use crate::cache::SearchCache;
use crate::database::{create_user, insert_card, insert_item, NewCard};
use crate::precached::PrecomputedSet;
use crate::rate_limit::RateLimiter;
use crate::tcg_api::TcgApiClient;
use axum::body::Body;
use axum::http::Request;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestApp {
    router: Router,
    db: Arc<Mutex<Connection>>,
    oak: i64,
    ash: i64,
    misty: i64,
    _dir: TempDir,
}

fn test_app(api_base_url: &str) -> TestApp {
    let dir = TempDir::new().unwrap();
    let conn = database::open_in_memory().unwrap();
    let oak = create_user(&conn, "oak", "oak@lab.example", 0).unwrap().id;
    let ash = create_user(&conn, "ash", "ash@example.com", 1000).unwrap().id;
    let misty = create_user(&conn, "misty", "misty@example.com", 10).unwrap().id;
    let db = Arc::new(Mutex::new(conn));

    let api = TcgApiClient::new(
        api_base_url,
        None,
        Duration::from_secs(2),
        Arc::new(RateLimiter::new(Duration::ZERO)),
    )
    .unwrap();
    let pipeline = SearchPipeline::new(
        Arc::clone(&db),
        PrecomputedSet::builtin(),
        SearchCache::new(dir.path().join("search"), chrono::Duration::hours(24)),
        api,
        chrono_tz::UTC,
    );
    let state = AppState::new(
        Arc::clone(&db),
        Arc::new(pipeline),
        AdminPolicy::from_list("oak"),
        chrono_tz::UTC,
    );

    TestApp {
        router: create_router(state),
        db,
        oak,
        ash,
        misty,
        _dir: dir,
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, user: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(USER_ID_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn give(&self, user_id: i64, api_id: &str) -> i64 {
        let conn = self.db.lock().unwrap();
        let card = insert_card(
            &conn,
            &NewCard {
                api_card_id: api_id,
                name: api_id,
                set_name: "Test Set",
                image_url_small: None,
                image_url_large: None,
            },
        )
        .unwrap();
        insert_item(&conn, user_id, card.id, Condition::NearMint, 100)
            .unwrap()
            .id
    }
}

const UNREACHABLE: &str = "http://127.0.0.1:9";

fn gengar_v(condition: &str) -> Value {
    json!({
        "api_card_id": "swsh11-TG06",
        "name": "Gengar V",
        "set_name": "Astral Radiance",
        "condition": condition
    })
}

#[test]
fn test_api_response_serialization() {
    let response: ApiResponse<Vec<i32>> = ApiResponse {
        success: true,
        data: Some(vec![1, 2, 3]),
        error: None,
        kind: None,
    };

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"success\":true"));
    assert!(json.contains("\"data\":[1,2,3]"));
    assert!(!json.contains("\"kind\""));
}

#[test]
fn errors_map_to_status_codes() {
    assert_eq!(status_for(&MarketError::Validation("x".into())), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(&MarketError::Authorization("x".into())), StatusCode::FORBIDDEN);
    assert_eq!(status_for(&MarketError::NotFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(status_for(&MarketError::Conflict("x".into())), StatusCode::CONFLICT);
    assert_eq!(status_for(&MarketError::Integrity("x".into())), StatusCode::CONFLICT);
    assert_eq!(
        status_for(&MarketError::InsufficientFunds {
            needed: 2,
            available: 1
        }),
        StatusCode::PAYMENT_REQUIRED
    );
    assert_eq!(status_for(&MarketError::LockPoisoned), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn internal_errors_hide_details() {
    let response = ApiError::from(MarketError::Database(rusqlite::Error::InvalidQuery)).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "internal server error");
    assert_eq!(body["kind"], "database");
}

#[tokio::test]
async fn missing_or_malformed_user_header_is_rejected() {
    let app = test_app(UNREACHABLE);

    let (status, body) = app.call("GET", "/api/collection", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let request = Request::builder()
        .uri("/api/collection")
        .header(USER_ID_HEADER, "ash")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn price_countdown_needs_no_user() {
    let app = test_app(UNREACHABLE);
    let (status, body) = app.call("GET", "/api/price-countdown", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let total = body["data"]["total_seconds"].as_i64().unwrap();
    assert!((0..=24 * 3600).contains(&total));
}

#[tokio::test]
async fn popular_search_is_served_without_the_network() {
    let app = test_app(UNREACHABLE);
    let (status, body) = app.call("GET", "/api/search?q=pikachu", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "found");
    let cards = body["data"]["cards"].as_array().unwrap();
    assert!(!cards.is_empty());
    assert!(cards.iter().all(|c| c["price"].as_i64().unwrap() >= 1));
}

#[tokio::test]
async fn short_search_reports_query_too_short() {
    let app = test_app(UNREACHABLE);
    let (status, body) = app.call("GET", "/api/search?q=p", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "query_too_short");
}

#[tokio::test]
async fn search_without_query_reports_query_too_short() {
    let app = test_app(UNREACHABLE);
    let (status, body) = app.call("GET", "/api/search?mode=cache_only", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "query_too_short");
}

#[tokio::test]
async fn purchase_then_sell() {
    let app = test_app(UNREACHABLE);

    let (status, body) = app
        .call("POST", "/api/cards/purchase", Some(app.ash), Some(gengar_v("Damaged")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "purchased");
    assert_eq!(body["data"]["item"]["current_price"], 178);
    assert_eq!(body["data"]["balance"], 822);
    let item_id = body["data"]["item"]["id"].as_i64().unwrap();

    let (status, body) = app
        .call("GET", "/api/collection", Some(app.ash), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let uri = format!("/api/collection/{}/sell", item_id);
    let (status, body) = app.call("POST", &uri, Some(app.ash), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sale_price"], 89);
    assert_eq!(body["data"]["balance"], 911);
}

#[tokio::test]
async fn second_purchase_of_same_card_is_a_no_op() {
    let app = test_app(UNREACHABLE);
    app.call("POST", "/api/cards/purchase", Some(app.ash), Some(gengar_v("Near Mint")))
        .await;
    let (status, body) = app
        .call("POST", "/api/cards/purchase", Some(app.ash), Some(gengar_v("NM")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "already_owned");
}

#[tokio::test]
async fn purchase_failures_map_to_statuses() {
    let app = test_app(UNREACHABLE);

    let (status, body) = app
        .call("POST", "/api/cards/purchase", Some(app.ash), Some(gengar_v("Mint-ish")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app
        .call("POST", "/api/cards/purchase", Some(app.misty), Some(gengar_v("Near Mint")))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["kind"], "insufficient_funds");

    let (status, _) = app
        .call("POST", "/api/cards/purchase", Some(9999), Some(gengar_v("Near Mint")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn removing_someone_elses_card_is_forbidden() {
    let app = test_app(UNREACHABLE);
    let item = app.give(app.ash, "base1-4");

    let uri = format!("/api/collection/{}", item);
    let (status, _) = app.call("DELETE", &uri, Some(app.misty), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call("DELETE", &uri, Some(app.ash), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], item);
}

#[tokio::test]
async fn trade_round_trip() {
    let app = test_app(UNREACHABLE);
    let charizard = app.give(app.ash, "base1-4");
    let blastoise = app.give(app.misty, "base1-2");

    let offer = json!({
        "receiver_id": app.misty,
        "offered_item_ids": [charizard],
        "requested_item_ids": [blastoise],
        "currency": 50,
        "message": "straight swap plus change"
    });
    let (status, body) = app.call("POST", "/api/trades", Some(app.ash), Some(offer)).await;
    assert_eq!(status, StatusCode::OK);
    let trade_id = body["data"]["trade"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["trade"]["status"], "pending");

    let (_, inbox) = app.call("GET", "/api/trades", Some(app.misty), None).await;
    assert_eq!(inbox["data"]["received"].as_array().unwrap().len(), 1);

    let view = format!("/api/trades/{}", trade_id);
    let (status, _) = app.call("GET", &view, Some(app.oak), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let accept = format!("/api/trades/{}/accept", trade_id);
    let (status, _) = app.call("POST", &accept, Some(app.ash), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call("POST", &accept, Some(app.misty), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trade"]["status"], "accepted");

    let (status, body) = app.call("POST", &accept, Some(app.misty), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn counter_offer_replaces_trade() {
    let app = test_app(UNREACHABLE);
    let charizard = app.give(app.ash, "base1-4");
    let blastoise = app.give(app.misty, "base1-2");

    let offer = json!({
        "receiver_id": app.misty,
        "offered_item_ids": [charizard],
        "requested_item_ids": [blastoise]
    });
    let (_, body) = app.call("POST", "/api/trades", Some(app.ash), Some(offer)).await;
    let trade_id = body["data"]["trade"]["id"].as_i64().unwrap();

    let counter = json!({
        "offered_item_ids": [blastoise],
        "requested_item_ids": [charizard],
        "currency": 5
    });
    let uri = format!("/api/trades/{}/counter", trade_id);
    let (status, body) = app.call("POST", &uri, Some(app.misty), Some(counter)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trade"]["proposer_id"], app.misty);
    assert_eq!(body["data"]["trade"]["receiver_id"], app.ash);

    let (_, body) = app
        .call("GET", &format!("/api/trades/{}", trade_id), Some(app.ash), None)
        .await;
    assert_eq!(body["data"]["trade"]["status"], "cancelled");
}

#[tokio::test]
async fn user_search_excludes_caller() {
    let app = test_app(UNREACHABLE);
    let (status, body) = app
        .call("GET", "/api/users/search?q=s", Some(app.ash), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = app
        .call("GET", "/api/users/search?q=MIS", Some(app.misty), None)
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = app
        .call("GET", "/api/users/search?q=MIS", Some(app.ash), None)
        .await;
    let names: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["misty"]);
}

#[tokio::test]
async fn admin_routes_require_the_allow_list() {
    let app = test_app(UNREACHABLE);

    for uri in ["/api/admin/update-prices", "/api/admin/clear-cache"] {
        let (status, _) = app.call("POST", uri, Some(app.ash), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }
    let (status, _) = app.call("GET", "/api/admin/test-api", Some(app.ash), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.give(app.ash, "base1-4");
    let (status, body) = app
        .call("POST", "/api/admin/update-prices", Some(app.oak), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["updated"], 1);

    let (status, body) = app
        .call("POST", "/api/admin/clear-cache", Some(app.oak), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["files_removed"], 0);
}

#[tokio::test]
async fn admin_probe_reports_api_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cards"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let app = test_app(&server.uri());
    let (status, body) = app
        .call("GET", "/api/admin/test-api", Some(app.oak), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ok"], true);
    assert_eq!(body["data"]["cards_found"], 0);
}
