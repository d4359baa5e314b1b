pub mod peer;
pub mod pending;
pub mod transport;

pub use peer::*;
pub use pending::*;
pub use transport::*;
