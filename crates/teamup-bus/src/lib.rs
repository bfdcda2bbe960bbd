//! Event fan-out for Teamup.
//!
//! Every connection registers one *listener* with the [`EventBus`] and
//! subscribes it to named channels ([`ChannelKey`](teamup_protocol::ChannelKey)).
//! Publishing an event on a channel copies it into the bounded queue of
//! every current subscriber, without ever waiting on a slow one.
//!
//! # Key types
//!
//! - [`EventBus`]: the channel registry and `publish`
//! - [`ListenerId`]: handle for one registered consumer
//! - [`Delivery`]: what a listener's receiver yields
//! - [`BusConfig`]: per-listener queue capacity

mod bus;
mod config;
mod error;

pub use bus::{Delivery, EventBus, ListenerId, ListenerReceiver};
pub use config::BusConfig;
pub use error::BusError;
