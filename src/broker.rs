use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::Client;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{BoxError, SubscriberError};
use crate::model::{InboundMessage, MessageKind, RawBody};

/// A live broker session: the connection plus its pub/sub registrations.
///
/// `next_message` is awaited from a `select!` against the shutdown
/// notification, so implementations must not lose messages when that future
/// is dropped before completion.
pub trait BrokerSession: Send {
    fn subscribe(&mut self, channel: &str) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Next inbound message. `Err` ends the receive loop.
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<InboundMessage, SubscriberError>> + Send;

    /// Releases the session. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<(), BoxError>> + Send;
}

pub struct RedisSession {
    conn: Option<MultiplexedConnection>,
    pubsub: Option<PubSub>,
    subscribed: Vec<String>,
    response_timeout: Duration,
}

impl RedisSession {
    /// Opens the command connection, checks it with `PING`, then opens the
    /// pub/sub connection. Each step is bounded; nothing is retried.
    pub async fn connect(cfg: &Config) -> Result<Self, SubscriberError> {
        info!(target: "booking_broker", addr = %cfg.redis_url, "connecting to redis");
        match open(cfg).await {
            Ok((conn, pubsub)) => {
                info!(target: "booking_broker", addr = %cfg.redis_url, "connected to redis");
                Ok(RedisSession {
                    conn: Some(conn),
                    pubsub: Some(pubsub),
                    subscribed: Vec::new(),
                    response_timeout: cfg.response_timeout,
                })
            }
            Err(source) => {
                error!(target: "booking_broker", addr = %cfg.redis_url, error = %source, "failed to connect to redis");
                Err(SubscriberError::Connection {
                    addr: cfg.redis_url.clone(),
                    source,
                })
            }
        }
    }
}

async fn open(cfg: &Config) -> Result<(MultiplexedConnection, PubSub), BoxError> {
    let client = Client::open(cfg.redis_url.as_str())?;

    let mut conn = timeout(cfg.connect_timeout, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| format!("connect timed out after {:?}", cfg.connect_timeout))??;

    let pong: String = timeout(cfg.response_timeout, redis::cmd("PING").query_async(&mut conn))
        .await
        .map_err(|_| format!("PING timed out after {:?}", cfg.response_timeout))??;
    if pong != "PONG" {
        return Err(format!("unexpected PING reply: {pong}").into());
    }

    let pubsub = timeout(cfg.connect_timeout, client.get_async_pubsub())
        .await
        .map_err(|_| format!("pub/sub connect timed out after {:?}", cfg.connect_timeout))??;

    Ok((conn, pubsub))
}

impl BrokerSession for RedisSession {
    async fn subscribe(&mut self, channel: &str) -> Result<(), BoxError> {
        let pubsub = self
            .pubsub
            .as_mut()
            .ok_or("pub/sub connection already released")?;
        pubsub.subscribe(channel).await?;
        self.subscribed.push(channel.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, SubscriberError> {
        let pubsub = self.pubsub.as_mut().ok_or(SubscriberError::StreamClosed)?;
        let stream = pubsub.on_message();
        tokio::pin!(stream);
        let msg = stream.next().await.ok_or(SubscriberError::StreamClosed)?;
        let kind = if msg.from_pattern() {
            MessageKind::Other
        } else {
            MessageKind::Message
        };
        Ok(InboundMessage {
            kind,
            channel: msg.get_channel_name().to_string(),
            body: RawBody::from_bytes(msg.get_payload_bytes()),
        })
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        let mut first_err: Option<BoxError> = None;

        if let Some(mut pubsub) = self.pubsub.take() {
            if !self.subscribed.is_empty() {
                let channels = std::mem::take(&mut self.subscribed);
                match timeout(self.response_timeout, pubsub.unsubscribe(channels)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => first_err = Some(err.into()),
                    Err(_) => first_err = Some("unsubscribe timed out".into()),
                }
            }
            drop(pubsub);
            info!(target: "booking_broker", "closed pub/sub connection");
        }

        if let Some(conn) = self.conn.take() {
            drop(conn);
            info!(target: "booking_broker", "closed broker connection");
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
