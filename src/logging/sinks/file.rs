use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::registry::LookupSpan;

use crate::logging::{
    formatter::{build_formatter, BoxedLayer},
    LoggingConfig, Rotation,
};

/// Слой записи в файл через неблокирующий writer.
///
/// Guard нужно держать до завершения программы, иначе хвост буфера
/// потеряется.
pub fn layer_with_config<S>(config: &LoggingConfig) -> (BoxedLayer<S>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let dir = &config.log_dir;
    let filename = &config.file.filename;
    let appender = match config.file.rotation {
        Rotation::Daily => rolling::daily(dir, filename),
        Rotation::Hourly => rolling::hourly(dir, filename),
        Rotation::Never => rolling::never(dir, filename),
    };
    let (writer, guard) = non_blocking(appender);

    let layer = build_formatter(config.file.format, &config.console, false, writer);
    (layer, guard)
}
