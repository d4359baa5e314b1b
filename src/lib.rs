//! Routex: a message router for publish/subscribe and RPC over a dot-separated
//! URI namespace with `*` and `**` wildcards.
//!
//! Peers attach to a [`Router`] over a [`Transport`]. The [`Broker`] fans
//! published events out to matching subscribers, the [`Dealer`] picks one
//! executor per call (distance first, then round-robin) and hands multi-step
//! generator calls to a [`Referee`]. Registrations and subscriptions are
//! indexed by a [`Urim`] and persisted per author in a [`Storage`].

/// Server configuration loading.
pub mod config;
/// Flexible logging (filters, console and file sinks).
pub mod logging;
/// Peer plumbing: transports, pending correlation maps, inbound pump.
pub mod peer;
/// Wire events and resources.
pub mod protocol;
/// Broker, dealer, referee, router and meta-procedures.
pub mod router;
/// Client session: endpoints, calls, generators.
pub mod session;
/// Persistent key/value storage for resources.
pub mod storage;
/// URI matcher: wildcard trie with per-author persistence.
pub mod urim;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::{Settings, StorageKind, StorageSettings};
/// Peers and transports.
pub use peer::{duplex, LocalTransport, Offer, Peer, PeerDetails, Transport};
/// Events and resources.
pub use protocol::{
    CallEvent, CallFeatures, Event, Payload, PublishEvent, PublishFeatures, RegisterOptions,
    Registration, ReplyEvent, RolePolicy, SubscribeOptions, Subscription,
};
/// Router components.
pub use router::{Broker, Dealer, PeerEvent, Referee, Router, RouterConfig};
/// Errors.
pub use routex_error::{RouterError, StatusCode};
/// Client API.
pub use session::{
    call_endpoint, publish_endpoint, GeneratorSource, GeneratorStep, Outcome, PendingCall,
    RemoteGenerator, Session,
};
/// Storage backends.
pub use storage::{open_storage, FileStorage, InMemoryStorage, Storage, StorageExt};
/// URI matcher.
pub use urim::Urim;
