// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Whisper server.
//!
//! The composition root wires the backend services to the websocket
//! gateway and exposes `GET /health` and the `/ws` upgrade endpoint.

pub mod configurations;
pub mod core;
pub mod pipeline;
pub mod presence;
pub mod push_notification_provider;
pub mod telemetry;
pub mod ws;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix::{Actor, Addr};
use actix_web::{
    dev::Server,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

use whisperbackend::auth_service::AuthService;
use whisperbackend::call_service::timeout::TimeoutWheel;
use whisperbackend::call_service::CallService;
use whisperbackend::clock::{Clock, OsRandom, RandomSource, SystemClock};
use whisperbackend::group_service::GroupService;
use whisperbackend::notifier::ConnectionNotifier;
use whisperbackend::push_dispatcher::{PushDispatcher, PushNotificationProvider, WakeSink};
use whisperbackend::rate_limiter::RateLimiter;
use whisperbackend::router::MessageRouter;
use whisperbackend::settings::Settings;
use whisperbackend::store::{DurableStore, VolatileStore};

use crate::core::AppCore;
use crate::presence::PresenceBroker;
use crate::ws::dispatch::{Dispatch, DispatchNotifier};
use crate::ws::messages::SetOfflineHook;

async fn health_check() -> impl Responder {
    HttpResponse::Ok().finish()
}

/// Wire all services together. Spawns the call timeout wheel, the
/// volatile sweeper and the retention purger onto the current runtime.
pub fn build_core<P: PushNotificationProvider>(
    settings: &Settings,
    store: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    push_provider: P,
) -> (Arc<AppCore>, Addr<Dispatch>) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng: Arc<dyn RandomSource> = Arc::new(OsRandom);

    let dispatch_addr = Dispatch::default().start();
    let notifier: Arc<dyn ConnectionNotifier> =
        Arc::new(DispatchNotifier::new(dispatch_addr.clone()));

    let push: Arc<dyn WakeSink> = Arc::new(PushDispatcher::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        push_provider,
    ));

    let auth = Arc::new(AuthService::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        rng,
        notifier.clone(),
    ));
    let router = Arc::new(MessageRouter::new(
        store.clone(),
        clock.clone(),
        notifier.clone(),
        push.clone(),
    ));
    let groups = Arc::new(GroupService::new(
        store.clone(),
        clock.clone(),
        notifier.clone(),
        router.clone(),
    ));

    let (wheel, wheel_runner) = TimeoutWheel::new();
    let calls = Arc::new(CallService::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        notifier.clone(),
        push,
        wheel,
        settings.turn.clone(),
    ));
    {
        let calls = calls.clone();
        tokio::spawn(wheel_runner.run(move |call_id| {
            let calls = calls.clone();
            async move { calls.handle_timeout(&call_id).await }
        }));
    }

    let limiter = Arc::new(RateLimiter::new(volatile.clone()));
    let presence = Arc::new(PresenceBroker::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        notifier.clone(),
    ));

    // The registry calls back into the presence broker when a user loses
    // their last connection.
    {
        let presence = presence.clone();
        dispatch_addr.do_send(SetOfflineHook {
            hook: Arc::new(move |whisper_id| {
                let presence = presence.clone();
                tokio::spawn(async move { presence.on_disconnect(&whisper_id).await });
            }),
        });
    }

    // Volatile sweeper: evict expired challenges, presence entries and
    // idle rate buckets. Live calls are owned by the timeout wheel.
    {
        let volatile = volatile.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                volatile.sweep(clock.now()).await;
            }
        });
    }

    // Retention purger for the offline queues.
    {
        let router = router.clone();
        let retention_days = settings.limits.pending_retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match router.purge_expired(retention_days).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "dropped expired pending messages"),
                    Err(e) => error!(error = %e, "retention purge failed"),
                }
            }
        });
    }

    let core = Arc::new(AppCore {
        auth,
        router,
        groups,
        calls,
        limiter,
        presence,
        store,
        volatile,
        clock,
        notifier,
        limits: settings.limits.clone(),
    });
    (core, dispatch_addr)
}

/// Configure and run the server application.
pub fn run(
    listener: TcpListener,
    core: Arc<AppCore>,
    dispatch_addr: Addr<Dispatch>,
) -> Result<Server, std::io::Error> {
    let max_connections = core.limits.max_connections;
    let core_data = Data::new(core);
    let dispatch_data = Data::new(dispatch_addr);

    let local_addr = listener.local_addr()?;
    info!(%local_addr, "starting server");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(core_data.clone())
            .app_data(dispatch_data.clone())
            .route("/health", web::get().to(health_check))
            .route("/ws", web::get().to(ws::upgrade_connection))
    })
    .max_connections(max_connections)
    .listen(listener)?
    .run();
    Ok(server)
}
