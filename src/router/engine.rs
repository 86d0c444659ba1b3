use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::config::Session;
use crate::protocol::{Event, Outbound, Outcome, ProtocolContext};
use crate::utils::error::{ContextError, RouterError};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Running,
    Stopped,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }
}

/// Router state shared between the loop and its handle.
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RouterState::Idle.as_u8())))
    }

    fn get(&self) -> RouterState {
        RouterState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: RouterState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Moves `from` to `to`; leaves any other state untouched.
    fn transition(&self, from: RouterState, to: RouterState) {
        let _ = self.0.compare_exchange(
            from.as_u8(),
            to.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// The single consumer of the internal queue.
///
/// Every event gets its own [`ProtocolContext`]. Exit events are forwarded to
/// the external queue and stop the loop; so does any error or panic escaping
/// a context. Rejected events are logged and skipped.
pub struct Router {
    session: Arc<Session>,
    events: UnboundedReceiver<Event>,
    state: StateCell,
}

impl Router {
    pub fn new(session: Arc<Session>, events: UnboundedReceiver<Event>) -> Self {
        Self {
            session,
            events,
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> RouterState {
        self.state.get()
    }

    /// Moves the router onto its own thread.
    pub fn start(self) -> Result<RouterHandle, RouterError> {
        let state = self.state.clone();
        state.transition(RouterState::Idle, RouterState::Running);
        let thread = thread::Builder::new()
            .name("router".to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                state.set(RouterState::Stopped);
                RouterError::Spawn(e)
            })?;
        Ok(RouterHandle {
            state,
            thread: Some(thread),
        })
    }

    /// Runs the loop on the current thread until stopped. A router already
    /// stopped through its handle exits without polling.
    pub fn run(mut self) {
        self.state.transition(RouterState::Idle, RouterState::Running);
        info!(uid = %self.session.uid, "router started");

        while self.state.get() == RouterState::Running {
            match self.events.try_recv() {
                Ok(event) => {
                    if !self.dispatch(event) {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(self.session.poll_interval),
                Err(TryRecvError::Disconnected) => {
                    warn!("internal queue closed");
                    break;
                }
            }
        }

        self.state.set(RouterState::Stopped);
        info!("router stopped");
    }

    /// Handles one event. Returns `false` when the loop must end.
    fn dispatch(&self, event: Event) -> bool {
        if event.is_exit() {
            info!("exit requested");
            if self.session.external.send(Outbound::Shutdown(event)).is_err() {
                debug!("external queue closed before shutdown");
            }
            return false;
        }

        let described = event.to_string();
        let session = &self.session;
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Outcome, ContextError> {
            ProtocolContext::new(session)?.manage(event)
        }));

        match result {
            Ok(Ok(outcome)) => {
                self.deliver(outcome);
                true
            }
            Ok(Err(e)) => {
                error!(event = %described, error = %e, "cannot handle event, stopping");
                false
            }
            Err(_) => {
                error!(event = %described, "event handler panicked, stopping");
                false
            }
        }
    }

    fn deliver(&self, outcome: Outcome) {
        match outcome {
            Outcome::Applied(record) | Outcome::Reloaded(record) => {
                if self.session.device_state.send(record).is_err() {
                    debug!("nobody listens for device state");
                }
            }
            other => debug!(outcome = ?other, "event handled"),
        }
    }
}

/// Controls a router started on its own thread.
#[derive(Debug)]
pub struct RouterHandle {
    state: StateCell,
    thread: Option<JoinHandle<()>>,
}

impl RouterHandle {
    pub fn state(&self) -> RouterState {
        self.state.get()
    }

    /// Asks the loop to end; it notices within one poll interval.
    pub fn stop(&self) {
        self.state.set(RouterState::Stopped);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits up to `timeout` for the router thread to exit.
    pub fn join(&mut self, timeout: Duration) -> Result<(), RouterError> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return Err(RouterError::JoinTimeout(timeout));
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RouterError::Panicked),
            None => Ok(()),
        }
    }
}
