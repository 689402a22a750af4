//! Stripe webhook endpoint tests

#[path = "../common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::*;

fn webhook_request(payload: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload)).unwrap()
}

fn signed(payload: Vec<u8>) -> Request<Body> {
    let signature = compute_stripe_signature(&payload, TEST_WEBHOOK_SECRET, now());
    webhook_request(payload, Some(signature))
}

/// Pending Stripe session for one 150.00 lesson. Returns (session_id, checkout_id).
fn pending_stripe_session(state: &AppState) -> (String, String) {
    let conn = state.db.get().unwrap();
    let now = now();
    let input = create_input(STUDENT, GatewayKind::Stripe, vec![spec(now + DAY, 15000, 0)], 0);
    let (session, reference) = create_pending_session(&conn, &input, now);
    (session.id, reference)
}

fn session_status(state: &AppState, session_id: &str) -> PaymentStatus {
    let conn = state.db.get().unwrap();
    queries::get_payment_session(&conn, session_id)
        .unwrap()
        .unwrap()
        .status
}

fn booking_count(state: &AppState, session_id: &str) -> usize {
    let conn = state.db.get().unwrap();
    queries::list_bookings_for_session(&conn, session_id)
        .unwrap()
        .len()
}

// ============ Authentication ============

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());

    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");
    let response = app.oneshot(webhook_request(payload, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(session_status(&state, &session_id), PaymentStatus::Pending);
}

#[tokio::test]
async fn test_wrong_secret_is_rejected_without_side_effects() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());

    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");
    let signature = compute_stripe_signature(&payload, "whsec_attacker", now());
    let response = app
        .oneshot(webhook_request(payload, Some(signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(session_status(&state, &session_id), PaymentStatus::Pending);
    assert_eq!(booking_count(&state, &session_id), 0);
}

#[tokio::test]
async fn test_malformed_and_stale_signatures_are_rejected() {
    let (state, _dir) = create_test_app_state();
    let (_, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state);
    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");

    for header in [
        "garbage".to_string(),
        "t=notanumber,v1=abcd".to_string(),
        compute_stripe_signature(&payload, TEST_WEBHOOK_SECRET, now() - 600),
    ] {
        let response = app
            .clone()
            .oneshot(webhook_request(payload.clone(), Some(header.clone())))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "header {:?} should be rejected",
            header
        );
    }
}

#[tokio::test]
async fn test_webhook_without_stripe_configured_is_not_found() {
    let (mut state, _dir) = create_test_app_state();
    state.gateways.stripe = None;
    let app = test_app(state);

    let payload = stripe_checkout_event("checkout.session.completed", "cs_test_x", "paid");
    let response = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signed_invalid_json_is_bad_request() {
    let (state, _dir) = create_test_app_state();
    let app = test_app(state);

    let response = app.oneshot(signed(b"{not json".to_vec())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============ Completion ============

#[tokio::test]
async fn test_paid_checkout_confirms_bookings() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());

    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");
    let response = app.clone().oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");

    assert_eq!(session_status(&state, &session_id), PaymentStatus::Completed);
    assert_eq!(booking_count(&state, &session_id), 1);

    // Polling now reports the bookings
    let response = app
        .oneshot(get_request(&format!("/payment-sessions/{}", session_id)))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["bookings_data"].as_array().unwrap().len(), 1);
    assert_eq!(body["bookings_data"][0]["status"], "confirmed");
}

#[tokio::test]
async fn test_replayed_webhook_is_acknowledged_once() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());
    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");

    let first = app.clone().oneshot(signed(payload.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_text(second).await, "Already processed");

    assert_eq!(booking_count(&state, &session_id), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_webhooks_create_bookings_once() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());
    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        let request = signed(payload.clone());
        handles.push(tokio::spawn(async move {
            let response = app.oneshot(request).await.unwrap();
            (response.status(), body_text(response).await)
        }));
    }

    let mut completed = 0;
    for handle in handles {
        let (status, text) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        if text == "OK" {
            completed += 1;
        } else {
            assert_eq!(text, "Already processed");
        }
    }

    assert_eq!(completed, 1, "exactly one delivery completes the session");
    assert_eq!(booking_count(&state, &session_id), 1);
}

#[tokio::test]
async fn test_unpaid_checkout_completion_is_ignored() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());

    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "unpaid");
    let response = app.clone().oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Event ignored");
    assert_eq!(session_status(&state, &session_id), PaymentStatus::Pending);

    // The money arrives later
    let payload =
        stripe_checkout_event("checkout.session.async_payment_succeeded", &checkout_id, "paid");
    let response = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(body_text(response).await, "OK");
    assert_eq!(session_status(&state, &session_id), PaymentStatus::Completed);
}

#[tokio::test]
async fn test_async_payment_failure_fails_session() {
    let (state, _dir) = create_test_app_state();
    let (session_id, checkout_id) = pending_stripe_session(&state);
    let app = test_app(state.clone());

    let payload =
        stripe_checkout_event("checkout.session.async_payment_failed", &checkout_id, "unpaid");
    let response = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Payment failure recorded");

    assert_eq!(session_status(&state, &session_id), PaymentStatus::Failed);
    assert_eq!(booking_count(&state, &session_id), 0);
}

#[tokio::test]
async fn test_unrelated_event_is_ignored() {
    let (state, _dir) = create_test_app_state();
    let app = test_app(state);

    let payload = serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "invoice.paid",
        "data": { "object": { "id": "in_1" } }
    }))
    .unwrap();
    let response = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Event ignored");
}

#[tokio::test]
async fn test_unknown_reference_is_acknowledged() {
    let (state, _dir) = create_test_app_state();
    let app = test_app(state);

    let payload = stripe_checkout_event("checkout.session.completed", "cs_test_nobody", "paid");
    let response = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Unknown payment reference");
}

#[tokio::test]
async fn test_late_webhook_goes_to_reconciliation() {
    let (state, _dir) = create_test_app_state();
    let checkout_id = "cs_test_late".to_string();
    let session_id = {
        let conn = state.db.get().unwrap();
        let now = now();
        let input = create_input(STUDENT, GatewayKind::Stripe, vec![spec(now + DAY, 15000, 0)], 0);
        // Created long enough ago that the TTL has run out
        let session = queries::create_payment_session(&conn, &input, now - 2 * HOUR).unwrap();
        queries::set_payment_session_reference(&conn, &session.id, &checkout_id).unwrap();
        session.id
    };
    let app = test_app(state.clone());

    let payload = stripe_checkout_event("checkout.session.completed", &checkout_id, "paid");
    let response = app.clone().oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "Session expired, queued for reconciliation"
    );
    assert_eq!(session_status(&state, &session_id), PaymentStatus::Expired);
    assert_eq!(booking_count(&state, &session_id), 0);

    let response = app.oneshot(get_request("/reconciliation")).await.unwrap();
    let items = body_json(response).await;
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["payment_session_id"], session_id.as_str());
    assert_eq!(items[0]["reason"], "late_completion");
    assert_eq!(items[0]["external_reference"], checkout_id.as_str());
}

#[tokio::test]
async fn test_stripe_event_for_mock_checkout_is_not_applied() {
    let (state, _dir) = create_test_app_state();
    let (session_id, reference) = {
        let conn = state.db.get().unwrap();
        let now = now();
        let input = create_input(STUDENT, GatewayKind::Mock, vec![spec(now + DAY, 15000, 0)], 0);
        let (session, reference) = create_pending_session(&conn, &input, now);
        (session.id, reference)
    };
    let app = test_app(state.clone());

    let payload = stripe_checkout_event("checkout.session.completed", &reference, "paid");
    let response = app.oneshot(signed(payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Unknown payment reference");
    assert_eq!(session_status(&state, &session_id), PaymentStatus::Pending);
    assert_eq!(booking_count(&state, &session_id), 0);
}
