//! Reservation demo - runs the library-to-gate scenario end to end.
//!
//! Demonstrates:
//! - Posting a request and watching it appear in the open pool
//! - Two parties racing to claim it (exactly one wins)
//! - Cancellation and the immutability of terminal requests
//! - Transition events reaching an observer

use anyhow::{Context, Result};
use futures::StreamExt;
use reservation_core::environment::SystemClock;
use reservation_core::{Contact, LifecycleError, NewRequest, PartyId, Request};
use reservation_runtime::metrics::MetricsExporter;
use reservation_runtime::{InMemoryRequestStore, RequestLifecycle, RuntimeConfig};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

fn summarize(snapshot: &[Request]) -> Vec<String> {
    snapshot
        .iter()
        .map(|r| format!("{} {}→{} [{}]", r.id, r.origin, r.destination, r.status))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reservation_runtime=debug".into()),
        )
        .with_target(false)
        .init();

    let config = RuntimeConfig::from_env().context("loading runtime configuration")?;
    let exporter = MetricsExporter::install().context("installing metrics recorder")?;

    let store = Arc::new(InMemoryRequestStore::with_change_feed_capacity(
        config.change_feed_capacity,
    ));
    let lifecycle = RequestLifecycle::from_config(store, Arc::new(SystemClock), &config);
    let views = lifecycle.views();

    let (u1, u2, u3, u4) = (
        PartyId::from("u1"),
        PartyId::from("u2"),
        PartyId::from("u3"),
        PartyId::from("u4"),
    );

    let mut events = Box::pin(lifecycle.bridge().events());
    let observer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            info!(
                request_id = %event.request_id,
                from = ?event.from,
                to = %event.to,
                actor = %event.actor,
                "Notification"
            );
        }
    });

    let mut pool = views.open_pool(&u2).await?;
    let mut claimed_by_u2 = views.as_claimant(&u2).await?;

    info!("Posting a walk from the Library to Gate 2");
    let request = lifecycle
        .create(NewRequest {
            requester_id: u1.clone(),
            origin: "Library".to_string(),
            destination: "Gate 2".to_string(),
            scheduled_at: Some(chrono::Utc::now() + chrono::Duration::minutes(30)),
            note: Some("Meet by the front desk".to_string()),
            contact: Some(Contact::new("555-0101")),
        })
        .await?;
    let id = request.id;

    match lifecycle.accept(id, &u1, None).await {
        Err(LifecycleError::Forbidden(reason)) => info!(%reason, "Self-claim rejected"),
        other => warn!(?other, "Unexpected self-claim outcome"),
    }

    info!("u2 and u3 race to accept");
    let (first, second) = tokio::join!(
        lifecycle.accept(id, &u2, Some(Contact::new("555-0102"))),
        lifecycle.accept(id, &u3, Some(Contact::new("555-0103"))),
    );
    for (party, outcome) in [(&u2, first), (&u3, second)] {
        match outcome {
            Ok(r) => info!(%party, status = %r.status, "Accepted"),
            Err(LifecycleError::AlreadyClaimed(_)) => {
                info!(%party, "Someone else already accepted this");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let cancelled = lifecycle.cancel(id, &u1).await?;
    info!(status = %cancelled.status, claimant = ?cancelled.claimant_id, "Requester cancelled");

    match lifecycle.accept(id, &u4, None).await {
        Err(LifecycleError::InvalidTransition(reason)) => info!(%reason, "Late accept rejected"),
        other => warn!(?other, "Unexpected late-accept outcome"),
    }

    // Drain whatever the views have buffered so far.
    for (name, view) in [("open_pool(u2)", &mut pool), ("as_claimant(u2)", &mut claimed_by_u2)] {
        while let Ok(Some(item)) = timeout(Duration::from_millis(50), view.next()).await {
            let snapshot = item?;
            info!(view = name, requests = ?summarize(&snapshot), "View snapshot");
        }
    }

    drop(lifecycle);
    drop(views);
    let _ = timeout(Duration::from_millis(100), observer).await;

    info!("Metrics:\n{}", exporter.render());
    Ok(())
}
