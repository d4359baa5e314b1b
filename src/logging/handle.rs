use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления жизненным циклом логирования.
///
/// Держит guard файлового writer-а: пока handle жив, буфер сбрасывается в
/// фоне.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self { file_guard }
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буфер файлового writer-а, ожидая не дольше `timeout`.
    pub async fn shutdown(
        mut self,
        timeout: Duration,
    ) {
        let Some(guard) = self.file_guard.take() else {
            return;
        };

        tracing::info!(target: "routex::logging", "flushing log file");
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || drop(guard))).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("logging shutdown task failed: {e}"),
            Err(_) => eprintln!(
                "logging shutdown exceeded timeout of {}ms",
                timeout.as_millis()
            ),
        }
    }
}
