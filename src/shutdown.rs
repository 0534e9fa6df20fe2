use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum State {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Starting,
            1 => State::Running,
            2 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal(&'static str),
    LoopFailure,
    Requested,
}

/// Process-wide lifecycle state shared by the receive loop and the signal task.
///
/// The state only moves forward: `Starting -> Running -> Stopping -> Stopped`
/// (`Starting -> Stopping` is allowed when a stop arrives during startup).
/// Signal context only calls [`Shutdown::request_stop`]; releasing the
/// connection is left to whoever wins [`Shutdown::begin_cleanup`].
pub struct Shutdown {
    state: AtomicU8,
    cleanup_started: AtomicBool,
    notify: Notify,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown {
            state: AtomicU8::new(State::Starting as u8),
            cleanup_started: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    pub fn stop_requested(&self) -> bool {
        self.state() >= State::Stopping
    }

    /// `Starting -> Running`. Fails if a stop was requested during startup.
    pub fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                State::Starting as u8,
                State::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Moves to `Stopping` and wakes the loop. Returns `false` if a stop was
    /// already in progress, in which case nothing happens.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current >= State::Stopping as u8 {
                debug!(target: "booking_shutdown", ?reason, "stop already in progress");
                return false;
            }
            match self.state.compare_exchange(
                current,
                State::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        match reason {
            StopReason::Signal(name) => info!(target: "booking_shutdown", signal = name, "received signal, shutting down"),
            StopReason::LoopFailure => warn!(target: "booking_shutdown", "receive loop failed, shutting down"),
            StopReason::Requested => info!(target: "booking_shutdown", "stop requested"),
        }
        self.notify.notify_waiters();
        true
    }

    /// One-shot guard for connection release. Only the first caller gets `true`.
    pub fn begin_cleanup(&self) -> bool {
        !self.cleanup_started.swap(true, Ordering::SeqCst)
    }

    pub fn mark_stopped(&self) {
        self.state.store(State::Stopped as u8, Ordering::SeqCst);
    }

    /// Resolves once a stop has been requested.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.stop_requested() {
            return;
        }
        notified.await;
    }
}

/// Turns SIGINT / SIGTERM into [`Shutdown::request_stop`]. Repeated signals are
/// no-ops once stopping.
pub fn spawn_signal_listener(shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match Signals::install() {
            Ok(s) => s,
            Err(err) => {
                error!(target: "booking_shutdown", error = %err, "failed to install signal handlers");
                return;
            }
        };
        loop {
            let name = signals.recv().await;
            if !shutdown.request_stop(StopReason::Signal(name)) {
                debug!(target: "booking_shutdown", signal = name, "ignoring repeated signal");
            }
        }
    })
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Signals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Signals)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: "booking_shutdown", error = %err, "failed to listen for Ctrl+C");
            futures::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lifecycle_moves_forward_only() {
        let s = Shutdown::new();
        assert_eq!(s.state(), State::Starting);
        assert!(s.mark_running());
        assert!(s.is_running());
        assert!(!s.mark_running());
        assert!(s.request_stop(StopReason::Requested));
        assert_eq!(s.state(), State::Stopping);
        s.mark_stopped();
        assert_eq!(s.state(), State::Stopped);
        assert!(!s.mark_running());
        assert!(!s.request_stop(StopReason::Requested));
        assert_eq!(s.state(), State::Stopped);
    }

    #[test]
    fn second_stop_request_is_noop() {
        let s = Shutdown::new();
        s.mark_running();
        assert!(s.request_stop(StopReason::Signal("SIGINT")));
        assert!(!s.request_stop(StopReason::Signal("SIGTERM")));
        assert!(!s.request_stop(StopReason::LoopFailure));
    }

    #[test]
    fn stop_during_startup_prevents_running() {
        let s = Shutdown::new();
        assert!(s.request_stop(StopReason::Signal("SIGTERM")));
        assert!(!s.mark_running());
        assert!(s.stop_requested());
    }

    #[test]
    fn cleanup_guard_fires_once() {
        let s = Shutdown::new();
        assert!(s.begin_cleanup());
        assert!(!s.begin_cleanup());
        assert!(!s.begin_cleanup());
    }

    #[tokio::test]
    async fn wait_returns_after_request() {
        let s = Arc::new(Shutdown::new());
        s.mark_running();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait().await })
        };
        tokio::task::yield_now().await;
        s.request_stop(StopReason::Requested);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_stopping() {
        let s = Shutdown::new();
        s.request_stop(StopReason::Requested);
        tokio::time::timeout(Duration::from_millis(100), s.wait())
            .await
            .expect("already stopping");
    }
}
