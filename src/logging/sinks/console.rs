use std::io::{self, Stdout};

use tracing_subscriber::registry::LookupSpan;

use crate::logging::{formatter::build_formatter, formatter::BoxedLayer, LoggingConfig};

/// Слой вывода в stdout.
pub fn layer_with_config<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;
    build_formatter(
        config.console.format,
        &config.console,
        config.console.with_ansi,
        writer,
    )
}
