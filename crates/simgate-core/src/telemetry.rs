//! Log output for the `simgate` binary.
//!
//! stdout belongs to the command's result: the run summary, the selected
//! suite path, the readiness listing. Everything from `tracing` goes to
//! stderr, including engine output forwarded at `debug`, so a pipeline can
//! capture the result without filtering log noise.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json`, each event is one JSON
/// object per line for CI log collectors. Only the first call in a process
/// takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}
