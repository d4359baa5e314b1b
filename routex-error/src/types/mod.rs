pub mod router;
pub mod storage;
pub mod transport;
pub mod urim;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use router::*;
pub use storage::*;
pub use transport::*;
pub use urim::*;
