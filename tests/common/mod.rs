//! Test utilities and fixtures for LessonPay integration tests

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use rusqlite::Connection;
use tempfile::TempDir;

pub use lessonpay::bookings;
pub use lessonpay::db::{AppState, DbPool, create_pool, init_db, queries};
pub use lessonpay::error::AppError;
pub use lessonpay::handlers;
pub use lessonpay::models::*;
pub use lessonpay::notify::Notifier;
pub use lessonpay::orchestrator::{self, CompletionResult, InitiatePayment};
pub use lessonpay::payments::{Gateways, MockGateway, StripeClient, StripeConfig};

pub const HOUR: i64 = 60 * 60;
pub const DAY: i64 = 24 * HOUR;
pub const SESSION_TTL_SECS: i64 = 30 * 60;

pub const STUDENT: &str = "student_thandi";
pub const OTHER_STUDENT: &str = "student_pieter";
pub const INSTRUCTOR: &str = "instructor_sipho";

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_BASE_URL: &str = "http://localhost:3000";

pub fn now() -> i64 {
    queries::now()
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.pragma_update(None, "foreign_keys", "ON")
        .expect("Failed to enable foreign keys");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// File-backed pool for tests that need several connections to one database.
pub fn setup_test_pool() -> (DbPool, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("lessonpay_test.db");
    let pool = create_pool(path.to_str().expect("temp path is not UTF-8"))
        .expect("Failed to create pool");
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    (pool, dir)
}

pub fn test_stripe_client() -> StripeClient {
    StripeClient::new(
        reqwest::Client::new(),
        &StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            // Nothing listens here, so checkout creation fails fast
            api_base: "http://127.0.0.1:9".to_string(),
        },
    )
}

/// App state with both gateways enabled and notifications off.
/// Keep the `TempDir` alive for as long as the state is used.
pub fn create_test_app_state() -> (AppState, TempDir) {
    let (db, dir) = setup_test_pool();
    let state = AppState {
        db,
        base_url: TEST_BASE_URL.to_string(),
        currency: "zar".to_string(),
        session_ttl_secs: SESSION_TTL_SECS,
        gateways: Gateways {
            stripe: Some(test_stripe_client()),
            mock: Some(MockGateway::new(TEST_BASE_URL)),
        },
        notifier: Notifier::disabled(),
    };
    (state, dir)
}

/// Router with every route the server mounts in dev mode.
pub fn test_app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::public::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::dev::router())
        .with_state(state)
}

pub fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&body).to_string()
}

pub fn spec(lesson_datetime: i64, lesson_fee_cents: i64, booking_fee_cents: i64) -> BookingSpec {
    BookingSpec {
        lesson_datetime,
        duration_minutes: 60,
        pickup_location: "14 Bree Street, Cape Town".to_string(),
        lesson_fee_cents,
        booking_fee_cents,
    }
}

pub fn create_input(
    student_id: &str,
    gateway: GatewayKind,
    specs: Vec<BookingSpec>,
    credit_applied_cents: i64,
) -> CreatePaymentSession {
    CreatePaymentSession {
        student_id: student_id.to_string(),
        instructor_id: INSTRUCTOR.to_string(),
        gateway,
        bookings: specs,
        reschedule_of_booking_id: None,
        credit_applied_cents,
        currency: "zar".to_string(),
        ttl_secs: SESSION_TTL_SECS,
    }
}

fn mock_reference() -> String {
    format!("mock_{}", uuid::Uuid::new_v4().simple())
}

/// Persist a pending session and attach a gateway reference, as initiate does.
pub fn create_pending_session(
    conn: &Connection,
    input: &CreatePaymentSession,
    now: i64,
) -> (PaymentSession, String) {
    let session = queries::create_payment_session(conn, input, now)
        .expect("Failed to create payment session");
    let reference = match input.gateway {
        GatewayKind::Mock => mock_reference(),
        GatewayKind::Stripe => format!("cs_test_{}", uuid::Uuid::new_v4().simple()),
    };
    assert!(
        queries::set_payment_session_reference(conn, &session.id, &reference)
            .expect("Failed to set reference")
    );
    (session, reference)
}

pub fn expect_completed(result: CompletionResult) -> (PaymentSession, Vec<Booking>) {
    match result {
        CompletionResult::Completed { session, bookings } => (session, bookings),
        other => panic!("expected Completed, got {:?}", other),
    }
}

/// A confirmed booking worth `value_cents`, paid in full through the mock gateway.
pub fn create_confirmed_booking(
    conn: &mut Connection,
    student_id: &str,
    lesson_datetime: i64,
    value_cents: i64,
    now: i64,
) -> Booking {
    let input = create_input(
        student_id,
        GatewayKind::Mock,
        vec![spec(lesson_datetime, value_cents, 0)],
        0,
    );
    let (_, reference) = create_pending_session(conn, &input, now);
    let result = orchestrator::process_completion(conn, &reference, GatewayOutcome::Success, now)
        .expect("completion should succeed");
    let (_, mut bookings) = expect_completed(result);
    bookings.remove(0)
}

/// Give a student `amount_cents` of credit the way production does: an admin
/// cancellation of a paid lesson. Returns the cancelled booking's ID.
pub fn seed_credit(conn: &mut Connection, student_id: &str, amount_cents: i64, now: i64) -> String {
    let booking = create_confirmed_booking(conn, student_id, now + 14 * DAY, amount_cents, now);
    let (cancelled, _) =
        bookings::cancel_booking(conn, &booking.id, CancelActor::Admin, Some("seed"), now)
            .expect("admin cancel should succeed");
    assert_eq!(cancelled.credit_granted, amount_cents);
    booking.id
}

pub fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

pub fn stripe_checkout_event(event_type: &str, checkout_id: &str, payment_status: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": event_type,
        "data": {
            "object": {
                "id": checkout_id,
                "object": "checkout.session",
                "payment_status": payment_status,
                "metadata": { "lessonpay_session_id": "lp_ps_unused" }
            }
        }
    }))
    .unwrap()
}
