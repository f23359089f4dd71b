//! # Stripe Webhook Handling
//!
//! Signature verification and translation of Stripe events into the
//! engine's [`WebhookEvent`]. Only Checkout Session and refund events are
//! mapped; everything else becomes [`WebhookEventType::Unknown`] and is
//! acknowledged without effect.
//!
//! `payment_intent.payment_failed` is deliberately not mapped: inside a
//! hosted Checkout Session a declined card can be retried, so only the
//! session's own async failure is final.

use cart_core::{Currency, OrderError, OrderResult, WebhookEvent, WebhookEventType};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

pub const PROVIDER: &str = "stripe";

/// Events that should be enabled in Stripe Dashboard for the order engine
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
    "checkout.session.async_payment_failed",
    "checkout.session.expired",
    "charge.refunded",
];

/// Setup instructions for the Stripe Dashboard, one step per line
pub fn webhook_setup_instructions(endpoint_url: &str) -> String {
    let mut out = String::from("=== Stripe Webhook Setup ===\n");
    out.push_str("1. Go to: https://dashboard.stripe.com/webhooks\n");
    out.push_str(&format!("2. Add endpoint: {endpoint_url}\n"));
    out.push_str("3. Select these events:\n");
    for event in REQUIRED_WEBHOOK_EVENTS {
        out.push_str(&format!("   - {event}\n"));
    }
    out.push_str("4. Copy the signing secret (whsec_...) to STRIPE_WEBHOOK_SECRET\n");
    out.push_str(&format!("5. Local testing: stripe listen --forward-to {endpoint_url}\n"));
    out
}

// =============================================================================
// Signature Verification
// =============================================================================

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> OrderResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        OrderError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(OrderError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_hmac_sha256(secret: &str, message: &[u8]) -> OrderResult<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| OrderError::Configuration(format!("invalid webhook secret: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a `Stripe-Signature` header for `payload` signed at `timestamp`.
///
/// Used to replay captured events against a local endpoint.
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> OrderResult<String> {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(payload);
    Ok(format!("t={timestamp},v1={}", compute_hmac_sha256(secret, &signed)?))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check a `Stripe-Signature` header against the raw body.
///
/// The signed message is `{timestamp}.{payload}`; a signature older or newer
/// than `tolerance_secs` relative to `now` is rejected.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> OrderResult<()> {
    let parsed = parse_signature_header(header)?;

    if (now.timestamp() - parsed.timestamp).abs() > tolerance_secs {
        return Err(OrderError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let mut signed = format!("{}.", parsed.timestamp).into_bytes();
    signed.extend_from_slice(payload);
    let expected = compute_hmac_sha256(secret, &signed)?;

    if parsed
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected))
    {
        Ok(())
    } else {
        Err(OrderError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ))
    }
}

// =============================================================================
// Event Mapping
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Map<String, serde_json::Value>,
}

fn str_field(object: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    object.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Parse a verified payload into a gateway-neutral event
pub fn parse_event(payload: &[u8]) -> OrderResult<WebhookEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| OrderError::WebhookParse(format!("Failed to parse webhook: {e}")))?;
    let object = &event.data.object;

    debug!(event_type = %event.event_type, event_id = %event.id, "Parsing Stripe event");

    let (event_type, session_id, payment_intent_id, amount) = match event.event_type.as_str() {
        "checkout.session.completed" => {
            // Delayed payment methods complete the session before money moves
            let paid = matches!(
                object.get("payment_status").and_then(|v| v.as_str()),
                Some("paid") | Some("no_payment_required")
            );
            let event_type = if paid {
                WebhookEventType::PaymentSucceeded
            } else {
                WebhookEventType::Unknown("checkout.session.completed (unpaid)".to_string())
            };
            (
                event_type,
                str_field(object, "id"),
                str_field(object, "payment_intent"),
                object.get("amount_total").and_then(|v| v.as_i64()),
            )
        }
        "checkout.session.async_payment_succeeded" => (
            WebhookEventType::PaymentSucceeded,
            str_field(object, "id"),
            str_field(object, "payment_intent"),
            object.get("amount_total").and_then(|v| v.as_i64()),
        ),
        "checkout.session.async_payment_failed" => (
            WebhookEventType::PaymentFailed,
            str_field(object, "id"),
            str_field(object, "payment_intent"),
            None,
        ),
        "checkout.session.expired" => (
            WebhookEventType::SessionExpired,
            str_field(object, "id"),
            None,
            None,
        ),
        "charge.refunded" => {
            let full = object.get("refunded").and_then(|v| v.as_bool()).unwrap_or(false);
            let event_type = if full {
                WebhookEventType::RefundIssued
            } else {
                WebhookEventType::Unknown("charge.refunded (partial)".to_string())
            };
            (
                event_type,
                None,
                str_field(object, "payment_intent"),
                object.get("amount_refunded").and_then(|v| v.as_i64()),
            )
        }
        other => (WebhookEventType::Unknown(other.to_string()), None, None, None),
    };

    let currency = object
        .get("currency")
        .and_then(|v| v.as_str())
        .and_then(|c| Currency::from_str(c).ok());

    Ok(WebhookEvent {
        event_id: event.id,
        event_type,
        provider: PROVIDER.to_string(),
        session_id,
        payment_intent_id,
        amount,
        currency,
        timestamp: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
    })
}
