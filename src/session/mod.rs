//! Клиентская сессия: регистрации, подписки, вызовы и генераторы поверх
//! одного пира.

pub mod endpoint;
pub mod generator;
pub mod session;

pub use endpoint::*;
pub use generator::{GeneratorStep, RemoteGenerator};
pub use session::*;
