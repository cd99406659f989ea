//! End-to-end pipeline: rate limiter -> circuit breaker -> webhook alerts.
//!
//! A flaky profile API is called for a stream of merchants. Calls beyond the
//! quota are refused locally, repeated upstream failures open the breaker, and
//! high-risk profiles are reported to a webhook endpoint.
//!
//! Set `WEBHOOK_URL` to post to a real endpoint; otherwise a scripted
//! in-process transport answers. Set `RUST_LOG=outbound_shield=debug` to see
//! every breaker and limiter decision.

use outbound_shield::infrastructure::mocks::ScriptedTransport;
use outbound_shield::{
    BatchSummary, CircuitBreaker, ExecutionError, InMemoryStore, Limiter, ProfileIdentity,
    RateLimiter, ResilienceConfig, RiskAssessment, SystemClock, WebhookConfig,
    WebhookDeliveryManager,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "circuitBreaker": { "failureThreshold": 3, "resetTimeout": 2000, "monitoringWindow": null },
    "rateLimit": { "points": 8, "duration": 60, "blockDuration": 120 },
    "webhooks": [
        { "url": "https://alerts.example.com/risk", "retry": { "maxAttempts": 2, "backoffMs": 50 } }
    ]
}"#;

/// Stand-in for the profile API. Calls 3 through 5 fail.
async fn score_profile(calls: &AtomicU32, phone: &str) -> Result<u8, String> {
    let n = calls.fetch_add(1, Ordering::SeqCst);
    if (3..6).contains(&n) {
        return Err(format!("profile api returned 503 for call {n}"));
    }
    let digits: u32 = phone.bytes().map(u32::from).sum();
    Ok(u8::try_from(digits * 13 % 100).unwrap_or(0))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = ResilienceConfig::from_json(CONFIG)?;
    let clock = Arc::new(SystemClock::new());

    let limiter = RateLimiter::new(
        InMemoryStore::new(clock.clone()),
        config.rate_limit,
        clock.clone(),
    )?;
    let breaker = CircuitBreaker::with_config_and_clock(
        "profile-api",
        config.circuit_breaker.clone(),
        clock.clone(),
    )?;

    let webhook = config.webhooks.pop().ok_or("no webhook configured")?;
    let alerts = match std::env::var("WEBHOOK_URL") {
        Ok(url) => WebhookDeliveryManager::new(WebhookConfig { url, ..webhook })?,
        Err(_) => WebhookDeliveryManager::with_transport(
            webhook,
            Arc::new(ScriptedTransport::new().then_status(503)),
            clock,
        )?,
    };

    println!("=== Outbound Shield Pipeline ===\n");

    let started = Instant::now();
    let calls = AtomicU32::new(0);
    let (mut total, mut high_risk, mut blocked) = (0, 0, 0);

    for i in 0..12u32 {
        total += 1;
        let merchant = "merchant-7";
        let identity =
            ProfileIdentity::new(format!("+1555010{:04}", 4400 + i), format!("cus_{i:08}"));

        let quota = limiter.consume(merchant).await?;
        if !quota.allowed {
            blocked += 1;
            println!(
                "call {i:>2}: rate limited, retry in {}s",
                quota.retry_after.unwrap_or_default()
            );
            continue;
        }

        let phone = identity.phone.clone().unwrap_or_default();
        let outcome = breaker.execute(|| score_profile(&calls, &phone)).await;

        match outcome.into_result() {
            Ok(score) => {
                let risk = RiskAssessment::new(score, vec!["velocity".to_string()]);
                println!("call {i:>2}: scored {score} ({:?})", risk.level);
                if score >= 70 {
                    high_risk += 1;
                    let result = alerts.send_high_risk(&identity, risk).await;
                    println!(
                        "         alert delivered={} attempts={}",
                        result.success, result.attempts
                    );
                }
            }
            Err(ExecutionError::CircuitOpen { next_attempt }) => {
                println!("call {i:>2}: circuit open until {next_attempt}");
            }
            Err(ExecutionError::Operation(e) | ExecutionError::Fallback(e)) => {
                println!("call {i:>2}: upstream failed: {e}");
            }
        }
    }

    let summary = alerts
        .send_batch_summary(BatchSummary {
            total,
            high_risk,
            blocked,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
        .await;

    println!("\nBatch summary delivered: {}", summary.success);
    println!("Breaker: {}", serde_json::to_string_pretty(&breaker.metrics())?);
    println!("Webhook: {}", serde_json::to_string_pretty(&alerts.stats())?);

    Ok(())
}
