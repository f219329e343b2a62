use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

static INIT: Once = Once::new();

/// Install the global subscriber. Output goes to stderr: stdout carries the
/// response stream and must only ever contain protocol lines.
pub fn init(cfg: &Config) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(&cfg.log_filter)
            .unwrap_or_else(|_| EnvFilter::new("schoold=info"));
        if cfg.log_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    });
}
