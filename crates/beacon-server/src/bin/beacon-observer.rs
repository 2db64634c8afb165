//! Beacon observer binary.
//!
//! Subscribes to a relay's observable resource and keeps a small local
//! event log, logging every event as it arrives. Exits non-zero when the
//! subscription cannot be established within the start-up retry budget.

use std::process::ExitCode;
use std::sync::Arc;

use beacon_observe::{FanoutSink, HttpObserveTransport, LogSink, ObservationClient, ObserveError};
use beacon_server::config::{load_config, resolve_config_path};
use beacon_server::init_tracing;
use beacon_store::EventStore;

#[tokio::main]
async fn main() -> ExitCode {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let observer = &config.observer;
    let policy = observer.retry_policy();
    let target = observer.target();

    let transport = match HttpObserveTransport::new(target.clone(), policy.connect_timeout) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(error = %e, "failed to build observe transport");
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(EventStore::new(observer.max_events));
    let sink = FanoutSink::new()
        .with(store.clone())
        .with(Arc::new(LogSink));

    let mut client = ObservationClient::new(Arc::new(transport), Arc::new(sink)).with_policy(policy);

    tracing::info!(
        url = %target.url(),
        confirmable = target.confirmable,
        delay_secs = observer.startup_delay_secs,
        "waiting before first observe request"
    );
    tokio::time::sleep(observer.startup_delay()).await;
    client.open();

    let finished = tokio::select! {
        outcome = client.join() => Some(outcome),
        () = shutdown_signal() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            client.close();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => {
            tracing::info!(events_retained = store.len(), "beacon observer shut down");
            ExitCode::SUCCESS
        }
        Err(ObserveError::SubscriptionExhausted { attempts }) => {
            tracing::error!(attempts, "could not establish observation; giving up");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "observation ended with an error");
            ExitCode::FAILURE
        }
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, stopping observer"); }
        () = terminate => { tracing::info!("received SIGTERM, stopping observer"); }
    }
}
