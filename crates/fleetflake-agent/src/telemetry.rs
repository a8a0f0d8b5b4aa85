//! Log output for the agent.
//!
//! Everything goes through `tracing`. The filter comes from `RUST_LOG` and
//! defaults to `info`; `RUST_LOG=fleetflake=debug` shows lock, lease and
//! fingerprint details.

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(json: bool) -> anyhow::Result<()> {
    let pretty = (!json).then(|| {
        fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(fmt::time::ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });

    let json = json.then(|| {
        fmt::layer()
            .json()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .with_current_span(true)
            .flatten_event(true)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json)
        .try_init()
        .context("failed to install the log subscriber")
}
