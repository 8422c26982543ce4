// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use tracing::{subscriber::set_global_default, Subscriber};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

/// Dependencies that flood the log below `info`. When the default level
/// is lowered to chase a protocol bug, their frames and poll events drown
/// the interesting lines, so they stay capped at `info` unless `RUST_LOG`
/// replaces the filter wholesale.
const CHATTY_MODULES: &[&str] = &[
    "actix_http",
    "actix_server",
    "actix_web_actors",
    "hyper",
    "mio",
    "sqlx",
    "tokio_tungstenite",
    "tungstenite",
];

/// The built-in filter: the requested default level, with the chatty
/// dependencies capped.
fn default_filter(default_directive: &str) -> EnvFilter {
    CHATTY_MODULES
        .iter()
        .fold(EnvFilter::new(default_directive), |filter, module| {
            filter.add_directive(
                format!("{module}=info")
                    .parse()
                    .expect("static directive is valid"),
            )
        })
}

/// Build the server's subscriber: env filter, then bunyan-formatted JSON
/// lines into `sink`. A `RUST_LOG` from the environment wins over the
/// built-in filter, chatty-module caps included.
pub fn get_subscriber<Sink>(
    name: String,
    default_directive: String,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&default_directive));
    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(name, sink))
}

/// Register a subscriber as global default to process span data. Also
/// routes `log` records from dependencies into tracing.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}
