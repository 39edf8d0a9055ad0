use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::hooks::EndReason;
use super::session::SessionManager;

/// How often the watchdog re-checks for inactivity.
/// One minute keeps the overshoot past the timeout under a minute.
pub const WATCHDOG_PERIOD_SECS: u64 = 60;

/// User input that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
}

impl ActivityEvent {
    pub const ALL: [ActivityEvent; 5] = [
        ActivityEvent::PointerDown,
        ActivityEvent::PointerMove,
        ActivityEvent::KeyPress,
        ActivityEvent::Scroll,
        ActivityEvent::TouchStart,
    ];
}

/// Feeds activity events to a running watchdog.
/// Clone is cheap; all clones go quiet once the watchdog is torn down.
#[derive(Debug, Clone)]
pub struct ActivityListener {
    tx: mpsc::UnboundedSender<ActivityEvent>,
}

impl ActivityListener {
    /// Report an event. Returns false when the watchdog is gone.
    pub fn notify(&self, event: ActivityEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Ends the session after sustained inactivity, even without navigation.
#[derive(Debug)]
pub struct InactivityWatchdog {
    session: Arc<SessionManager>,
    period: Duration,
}

impl InactivityWatchdog {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            period: Duration::from_secs(WATCHDOG_PERIOD_SECS),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Check once now, then keep checking every period in a background task.
    ///
    /// The timer and the activity listener live exactly as long as the
    /// returned handle. Must be called within a tokio runtime.
    pub fn spawn(self) -> WatchdogHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = ActivityListener { tx };

        if self.session.access_token().is_none() {
            debug!("No session at watchdog start");
            self.session.turn_away();
            return WatchdogHandle {
                task: None,
                listener,
            };
        }
        if check(&self.session) {
            debug!("Session already over at watchdog start");
            return WatchdogHandle {
                task: None,
                listener,
            };
        }

        debug!(period_secs = self.period.as_secs(), "Inactivity watchdog started");
        let task = tokio::spawn(run(self.session, self.period, rx));
        WatchdogHandle {
            task: Some(task),
            listener,
        }
    }
}

/// Owns the watchdog's timer and listener. Dropping it releases both.
#[derive(Debug)]
pub struct WatchdogHandle {
    task: Option<JoinHandle<()>>,
    listener: ActivityListener,
}

impl WatchdogHandle {
    pub fn listener(&self) -> ActivityListener {
        self.listener.clone()
    }

    /// Whether the watchdog is still watching.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait until the watchdog stops on its own, which happens once the
    /// session is over.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                warn!(error = %e, "Inactivity watchdog task failed");
            }
            self.task = None;
        }
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Inactivity watchdog released");
        }
    }
}

/// End the session if it is no longer authenticated. Returns true when there
/// is nothing left to watch.
fn check(session: &SessionManager) -> bool {
    if session.is_authenticated() {
        return false;
    }
    if session.is_session_expired() {
        session.end_session(EndReason::Inactivity);
    }
    true
}

async fn run(
    session: Arc<SessionManager>,
    period: Duration,
    mut rx: mpsc::UnboundedReceiver<ActivityEvent>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if check(&session) {
                    debug!("Inactivity watchdog stopping");
                    return;
                }
            }
            event = rx.recv() => match event {
                Some(event) => {
                    trace!(?event, "Activity");
                    session.record_activity();
                }
                None => return,
            },
        }
    }
}
