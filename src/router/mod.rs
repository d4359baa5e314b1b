//! Маршрутизация: брокер publish/subscribe, дилер RPC, посредник
//! генераторов и мета-процедуры.

use std::sync::Arc;

use crate::peer::Peer;

pub mod broker;
pub mod dealer;
pub mod meta;
pub mod referee;
pub mod router;

pub use broker::*;
pub use dealer::*;
pub use referee::*;
pub use router::*;

/// Событие жизненного цикла пира.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Joined(Arc<Peer>),
    Left(String),
}
