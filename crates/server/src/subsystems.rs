//! Background tasks started alongside the HTTP listener. The audit buffer's flush loop and the per-user pool's
//! idle-reaper/health-check loops are already self-contained (`AuditBuffer
//! ::start`, `PerUserMcpPool::spawn_background_loops`) and started inside
//! `factory::build_app_state`; this module owns the two subsystems that
//! need the fully-assembled [`AppState`] and the process-wide shutdown
//! signal: the HTTP server itself and the rate-limiter janitor.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use shared::error::CommonError;
use shared::subsystem::{SubsystemHandle, spawn_subsystem};
use tokio::sync::broadcast;
use tracing::info;

use crate::factory::AppState;

const RATE_LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Periodically evicts stale buckets from the login/registration rate
/// limiters so long-running processes don't accumulate one bucket per
/// distinct caller forever.
pub fn spawn_rate_limiter_janitor(state: &AppState, shutdown_rx: broadcast::Receiver<()>) -> SubsystemHandle {
    let login = state.identity.login_rate_limiter.clone();
    let registration = state.identity.registration_rate_limiter.clone();
    let mut shutdown_rx = shutdown_rx;

    spawn_subsystem("rate-limiter-janitor", shutdown_rx.resubscribe(), async move {
        let mut ticker = tokio::time::interval(RATE_LIMITER_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    login.sweep_expired();
                    registration.sweep_expired();
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        Ok::<(), CommonError>(())
    })
}

/// Binds and serves the HTTP router, stopping gracefully on the broadcast
/// shutdown signal.
pub fn spawn_http_server(
    router: Router,
    listen_addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> SubsystemHandle {
    spawn_subsystem("http-server", shutdown_rx.resubscribe(), async move {
        let listener = tokio::net::TcpListener::bind(listen_addr).await.map_err(CommonError::from)?;
        info!(address = %listen_addr, "listening");

        // `sessions::register` pulls the caller's IP from `ConnectInfo` for
        // its per-address rate limit, so the make-service has to carry it.
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(CommonError::from)?;

        Ok(())
    })
}
