use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::broker::BrokerSession;
use crate::decode::decode;
use crate::error::{HandlerError, SubscriberError};
use crate::metrics::Metrics;
use crate::model::{BookingChannel, InboundMessage, MessageKind};
use crate::router::{EventRouter, Routed};
use crate::shutdown::{Shutdown, StopReason};

/// Drives one broker session through subscribe, receive and release.
pub struct Subscriber<S> {
    session: S,
    router: EventRouter,
    shutdown: Arc<Shutdown>,
    metrics: Metrics,
}

impl<S: BrokerSession> Subscriber<S> {
    pub fn new(session: S, router: EventRouter, shutdown: Arc<Shutdown>, metrics: Metrics) -> Self {
        Subscriber {
            session,
            router,
            shutdown,
            metrics,
        }
    }

    /// Subscribes, listens until stopped, and always releases the session.
    pub async fn run(&mut self, channels: &[&str]) -> Result<(), SubscriberError> {
        let outcome = match self.subscribe(channels).await {
            Ok(()) if self.shutdown.mark_running() => {
                self.metrics.set_ready(true);
                self.listen().await
            }
            Ok(()) => {
                debug!(target: "booking_events", "stop requested during startup; not listening");
                Ok(())
            }
            Err(err) => Err(err),
        };
        self.stop().await;
        outcome
    }

    /// Registers every channel in order. Channels registered before a failure
    /// stay registered until the session is released.
    pub async fn subscribe(&mut self, channels: &[&str]) -> Result<(), SubscriberError> {
        for &channel in channels {
            if let Err(source) = self.session.subscribe(channel).await {
                error!(target: "booking_broker", channel, error = %source, "error subscribing to channel");
                return Err(SubscriberError::Subscription {
                    channel: channel.to_string(),
                    source,
                });
            }
            info!(target: "booking_broker", channel, "subscribed to channel");
        }
        Ok(())
    }

    /// Receive loop. Returns on shutdown, or with the fetch error that ended it.
    pub async fn listen(&mut self) -> Result<(), SubscriberError> {
        info!(target: "booking_events", "waiting for booking events");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                next = self.session.next_message() => next,
            };
            match next {
                Ok(msg) => {
                    if self.shutdown.stop_requested() {
                        debug!(target: "booking_events", channel = %msg.channel, "discarding message received during shutdown");
                        break;
                    }
                    self.process(msg);
                }
                Err(err) => {
                    self.metrics.inc_fetch_error();
                    error!(target: "booking_events", error = %err, "error in subscriber loop");
                    self.shutdown.request_stop(StopReason::LoopFailure);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Decodes and routes one message. Handler failures, including panics,
    /// are logged here and never escape.
    pub fn process(&self, msg: InboundMessage) {
        self.metrics.inc_received();
        if msg.kind != MessageKind::Message {
            self.metrics.inc_skipped();
            debug!(target: "booking_events", channel = %msg.channel, kind = ?msg.kind, "skipping non-message frame");
            return;
        }

        let channel = msg.channel;
        let payload = decode(msg.body);
        if !payload.is_structured() {
            self.metrics.inc_decode_fallback();
        }

        let envelope = payload.envelope().unwrap_or_default();
        info!(
            target: "booking_events",
            channel = %channel,
            event = envelope.event.as_deref().unwrap_or(""),
            sent_at = envelope.timestamp.as_deref().unwrap_or(""),
            "booking event received\n{}",
            payload.render_pretty()
        );

        let routed = panic::catch_unwind(AssertUnwindSafe(|| self.router.route(&channel, &payload)));
        match routed {
            Ok(Ok(Routed::Handled)) => self.metrics.inc_dispatched(),
            Ok(Ok(Routed::Unrouted)) => {
                self.metrics.inc_unrouted();
                debug!(
                    target: "booking_events",
                    channel = %channel,
                    known_channel = BookingChannel::from_name(&channel).is_some(),
                    "no handler for channel"
                );
            }
            Ok(Err(err)) => {
                self.metrics.inc_handler_error();
                error!(target: "booking_events", error = %err, "error processing message");
            }
            Err(panic) => {
                self.metrics.inc_handler_error();
                let err = HandlerError::Panicked {
                    channel,
                    message: panic_message(panic.as_ref()),
                };
                error!(target: "booking_events", error = %err, "error processing message");
            }
        }
    }

    /// Requests a stop and releases the session. Only the first call releases;
    /// release errors are logged, not returned.
    pub async fn stop(&mut self) {
        self.shutdown.request_stop(StopReason::Requested);
        if !self.shutdown.begin_cleanup() {
            debug!(target: "booking_shutdown", "cleanup already ran");
            return;
        }
        self.metrics.set_ready(false);
        if let Err(err) = self.session.close().await {
            error!(target: "booking_shutdown", error = %err, "error during cleanup");
        }
        self.shutdown.mark_stopped();
        info!(target: "booking_shutdown", "booking subscriber stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
