use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::shutdown::Shutdown;

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    messages_received_total: AtomicU64,
    dispatched_total: AtomicU64,
    unrouted_total: AtomicU64,
    skipped_total: AtomicU64,
    decode_fallbacks_total: AtomicU64,
    handler_errors_total: AtomicU64,
    fetch_errors_total: AtomicU64,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_received(&self) {
        self.inner.messages_received_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_dispatched(&self) {
        self.inner.dispatched_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_unrouted(&self) {
        self.inner.unrouted_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_skipped(&self) {
        self.inner.skipped_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_decode_fallback(&self) {
        self.inner.decode_fallbacks_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_handler_error(&self) {
        self.inner.handler_errors_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_fetch_error(&self) {
        self.inner.fetch_errors_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn set_ready(&self, v: bool) {
        self.inner.ready.store(v, Ordering::Relaxed);
    }
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from(self)
    }

    pub fn render_prometheus(&self) -> String {
        let mut s = Vec::with_capacity(512);
        let name = env!("CARGO_PKG_NAME");
        let version = env!("CARGO_PKG_VERSION");
        let _ = writeln!(&mut s, "# HELP booking_build_info Build information");
        let _ = writeln!(&mut s, "# TYPE booking_build_info gauge");
        let _ = writeln!(
            &mut s,
            "booking_build_info{{name=\"{}\",version=\"{}\"}} 1",
            name, version
        );

        let snap = self.snapshot();
        let counters: [(&str, &str, u64); 7] = [
            ("booking_messages_received_total", "Pub/sub messages received", snap.received),
            ("booking_dispatched_total", "Messages routed to a handler", snap.dispatched),
            ("booking_unrouted_total", "Messages on channels without a handler", snap.unrouted),
            ("booking_skipped_total", "Non-message frames discarded", snap.skipped),
            ("booking_decode_fallbacks_total", "Payloads passed through undecoded", snap.decode_fallbacks),
            ("booking_handler_errors_total", "Handler failures recovered by the loop", snap.handler_errors),
            ("booking_fetch_errors_total", "Failures fetching the next message", snap.fetch_errors),
        ];
        for (metric, help, value) in counters {
            let _ = writeln!(&mut s, "# HELP {} {}", metric, help);
            let _ = writeln!(&mut s, "# TYPE {} counter", metric);
            let _ = writeln!(&mut s, "{} {}", metric, value);
        }

        let _ = writeln!(&mut s, "# HELP booking_ready Subscribed and receiving");
        let _ = writeln!(&mut s, "# TYPE booking_ready gauge");
        let _ = writeln!(&mut s, "booking_ready {}", u8::from(self.is_ready()));

        String::from_utf8(s).unwrap_or_default()
    }
}

pub fn spawn_http_server(
    metrics: Metrics,
    addr: String,
    shutdown: Arc<Shutdown>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(target: "booking_metrics", addr = %addr, "listening for /metrics, /health and /ready");
                loop {
                    tokio::select! {
                        _ = shutdown.wait() => {
                            debug!(target: "booking_metrics", "shutting down metrics server");
                            break;
                        }
                        accept_res = listener.accept() => {
                            match accept_res {
                                Ok((socket, _peer)) => {
                                    let m = metrics.clone();
                                    tokio::spawn(async move {
                                        if let Err(e) = handle_conn(socket, m).await {
                                            debug!(target: "booking_metrics", error = %e, "metrics connection error");
                                        }
                                    });
                                }
                                Err(e) => {
                                    warn!(target: "booking_metrics", error = %e, "metrics accept error");
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!(target: "booking_metrics", addr = %addr, error = %e, "failed to bind metrics HTTP server");
            }
        }
    })
}

async fn handle_conn(
    mut socket: TcpStream,
    metrics: Metrics,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = [0u8; 1024];
    let n = socket.read(&mut buf).await?;
    let req = std::str::from_utf8(&buf[..n]).unwrap_or("");
    let (status, content_type, body) = respond(req, &metrics);
    let resp = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    socket.write_all(resp.as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}

fn respond(req: &str, metrics: &Metrics) -> (&'static str, &'static str, String) {
    let is = |path: &str| {
        req.starts_with(&format!("GET {} ", path)) || req.starts_with(&format!("GET {}\r", path))
    };
    if is("/metrics") {
        ("200 OK", "text/plain; version=0.0.4", metrics.render_prometheus())
    } else if is("/health") || is("/") {
        ("200 OK", "text/plain", "OK".to_string())
    } else if is("/ready") {
        if metrics.is_ready() {
            ("200 OK", "text/plain", "READY".to_string())
        } else {
            ("503 Service Unavailable", "text/plain", "NOT READY".to_string())
        }
    } else {
        ("404 Not Found", "text/plain", "Not Found".to_string())
    }
}

pub fn spawn_stats_logger(
    metrics: Metrics,
    shutdown: Arc<Shutdown>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = metrics.snapshot();
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tick.tick() => {
                    let now = metrics.snapshot();
                    info!(target: "booking_stats",
                        received = now.received - last.received,
                        dispatched = now.dispatched - last.dispatched,
                        unrouted = now.unrouted - last.unrouted,
                        decode_fallbacks = now.decode_fallbacks - last.decode_fallbacks,
                        handler_errors = now.handler_errors - last.handler_errors,
                        "stats"
                    );
                    last = now;
                }
            }
        }
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub received: u64,
    pub dispatched: u64,
    pub unrouted: u64,
    pub skipped: u64,
    pub decode_fallbacks: u64,
    pub handler_errors: u64,
    pub fetch_errors: u64,
}

impl From<&Metrics> for Snapshot {
    fn from(m: &Metrics) -> Self {
        use std::sync::atomic::Ordering::Relaxed;
        let c = &m.inner;
        Snapshot {
            received: c.messages_received_total.load(Relaxed),
            dispatched: c.dispatched_total.load(Relaxed),
            unrouted: c.unrouted_total.load(Relaxed),
            skipped: c.skipped_total.load(Relaxed),
            decode_fallbacks: c.decode_fallbacks_total.load(Relaxed),
            handler_errors: c.handler_errors_total.load(Relaxed),
            fetch_errors: c.fetch_errors_total.load(Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_counters_and_ready() {
        let m = Metrics::new();
        m.inc_received();
        m.inc_received();
        m.inc_dispatched();
        m.set_ready(true);
        let text = m.render_prometheus();
        assert!(text.contains("booking_messages_received_total 2"));
        assert!(text.contains("booking_dispatched_total 1"));
        assert!(text.contains("booking_handler_errors_total 0"));
        assert!(text.contains("booking_ready 1"));
    }

    #[test]
    fn routes_health_ready_and_metrics() {
        let m = Metrics::new();
        assert_eq!(respond("GET /health HTTP/1.1\r\n", &m).0, "200 OK");
        assert_eq!(respond("GET /ready HTTP/1.1\r\n", &m).0, "503 Service Unavailable");
        m.set_ready(true);
        assert_eq!(respond("GET /ready HTTP/1.1\r\n", &m).0, "200 OK");
        assert_eq!(respond("GET /metrics HTTP/1.1\r\n", &m).1, "text/plain; version=0.0.4");
        assert_eq!(respond("GET /nope HTTP/1.1\r\n", &m).0, "404 Not Found");
    }

    #[test]
    fn clones_share_counters() {
        let a = Metrics::new();
        let b = a.clone();
        b.inc_handler_error();
        assert_eq!(a.snapshot().handler_errors, 1);
    }
}
