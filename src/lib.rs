//! Redis pub/sub listener for booking lifecycle events.
//!
//! [`broker::RedisSession`] owns the connection, [`subscriber::Subscriber`]
//! registers the [`model::BookingChannel`] set and runs the receive loop, and
//! [`router::EventRouter`] turns each decoded payload into a notification.
//! [`shutdown::Shutdown`] is the state shared with the signal task.

pub mod broker;
pub mod config;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod model;
pub mod router;
pub mod shutdown;
pub mod subscriber;
