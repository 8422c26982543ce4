// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::TcpListener;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use whisperbackend::store::memory::{MemDurableStore, MemVolatileStore};
use whisperbackend::store::postgres::PgDurableStore;
use whisperbackend::store::DurableStore;
use whisperserver::{
    build_core,
    configurations::get_configuration,
    push_notification_provider::ProductionPushProvider,
    run,
    telemetry::{get_subscriber, init_subscriber},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Configure logging/trace subscription.
    let subscriber = get_subscriber("whisperserver".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    // Load configuration.
    let configuration = get_configuration("server/").expect("Could not load configuration.");
    if configuration.application.domain.is_empty() {
        panic!("No domain name configured.");
    }

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(address).expect("Failed to bind to port.");
    info!(domain = configuration.application.domain, "Starting server");

    // Durable storage. An empty database host selects the in-memory
    // store for database-less local runs.
    let store: Arc<dyn DurableStore> = if configuration.database.host.is_empty() {
        info!("No database configured, using the in-memory store");
        Arc::new(MemDurableStore::new())
    } else {
        info!(
            host = configuration.database.host,
            "Connecting to postgres server",
        );
        // Try again for 10 times each second in case the postgres server
        // is coming up.
        let mut counter = 0;
        let pool = loop {
            match PgPoolOptions::new()
                .connect(&configuration.database.connection_string())
                .await
            {
                Ok(pool) => break pool,
                Err(e) => {
                    info!("Failed to connect to postgres server: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    counter += 1;
                    if counter > 10 {
                        panic!("Database not ready after 10 seconds.");
                    }
                }
            }
        };
        let store = PgDurableStore::new(pool);
        store
            .migrate()
            .await
            .expect("Failed to run database migrations.");
        Arc::new(store)
    };

    let volatile = Arc::new(MemVolatileStore::new());

    let push_provider =
        ProductionPushProvider::new(configuration.fcm.clone(), configuration.apns.clone())
            .map_err(|e| std::io::Error::other(e.to_string()))?;

    let (core, dispatch_addr) = build_core(&configuration, store, volatile, push_provider);

    // Start the server; actix handles SIGINT/SIGTERM for a graceful
    // shutdown.
    run(listener, core, dispatch_addr)?.await
}
