// ── Session state machine ──
//
// Gates the setup sequence: every step must follow the one before it
// (Configure may be skipped), a failed step parks the session in
// `Failed`, and `Closed` is terminal.
// State is published on a watch channel so consumers can follow it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CoreError;

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unopened,
    Opening,
    Open,
    Configuring,
    Started,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

// ── Step ─────────────────────────────────────────────────────────

/// One link of the setup chain, in the order it must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    #[strum(to_string = "discover")]
    Discover,
    #[strum(to_string = "open device")]
    OpenDevice,
    #[strum(to_string = "allocate client")]
    AllocateClient,
    #[strum(to_string = "register events")]
    RegisterEvents,
    #[strum(to_string = "configure")]
    Configure,
    #[strum(to_string = "start")]
    Start,
}

impl Step {
    /// The step that must have completed before this one may begin.
    pub const fn previous(self) -> Option<Self> {
        match self {
            Self::Discover => None,
            Self::OpenDevice => Some(Self::Discover),
            Self::AllocateClient => Some(Self::OpenDevice),
            Self::RegisterEvents => Some(Self::AllocateClient),
            Self::Configure => Some(Self::RegisterEvents),
            Self::Start => Some(Self::Configure),
        }
    }

    /// Whether this step may begin once `completed` is the last step done.
    /// Configure is optional, so Start also follows RegisterEvents.
    pub fn may_follow(self, completed: Option<Self>) -> bool {
        completed == self.previous()
            || (self == Self::Start && completed == Some(Self::RegisterEvents))
    }

    const fn running_state(self) -> SessionState {
        match self {
            Self::Discover | Self::OpenDevice | Self::AllocateClient => SessionState::Opening,
            Self::RegisterEvents | Self::Configure | Self::Start => SessionState::Configuring,
        }
    }

    const fn completed_state(self) -> SessionState {
        match self {
            Self::Discover | Self::OpenDevice => SessionState::Opening,
            Self::AllocateClient => SessionState::Open,
            Self::RegisterEvents | Self::Configure => SessionState::Configuring,
            Self::Start => SessionState::Started,
        }
    }
}

// ── SessionMachine ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct Progress {
    completed: Option<Step>,
    in_flight: Option<Step>,
}

#[derive(Debug)]
pub struct SessionMachine {
    state: watch::Sender<SessionState>,
    progress: Mutex<Progress>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unopened);
        Self {
            state,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn last_completed_step(&self) -> Option<Step> {
        self.progress().completed
    }

    /// Claim `step`. Fails with `InvalidState`, leaving the state
    /// untouched, when the step is out of order or another step is running.
    pub fn begin(&self, step: Step) -> Result<StepGuard<'_>, CoreError> {
        let mut progress = self.progress();
        let state = self.current();

        let allowed = progress.in_flight.is_none()
            && match step {
                Step::Discover => matches!(state, SessionState::Unopened | SessionState::Failed),
                _ => {
                    !matches!(state, SessionState::Failed | SessionState::Closed)
                        && step.may_follow(progress.completed)
                }
            };
        if !allowed {
            return Err(CoreError::InvalidState {
                operation: step.to_string(),
                state,
            });
        }

        if step == Step::Discover {
            progress.completed = None;
        }
        progress.in_flight = Some(step);
        self.state.send_replace(step.running_state());
        debug!(%step, "step started");

        Ok(StepGuard {
            machine: self,
            step,
            prior: state,
            armed: true,
        })
    }

    fn complete(&self, step: Step) {
        let mut progress = self.progress();
        progress.in_flight = None;
        if self.current().is_terminal() {
            return;
        }
        progress.completed = Some(step);
        self.state.send_replace(step.completed_state());
        debug!(%step, "step completed");
    }

    fn fail(&self, step: Step) {
        let mut progress = self.progress();
        progress.in_flight = None;
        if self.current().is_terminal() {
            return;
        }
        self.state.send_replace(SessionState::Failed);
        debug!(%step, "step failed");
    }

    /// Enter the terminal state. Any step still running is forgotten.
    pub fn close(&self) {
        let mut progress = self.progress();
        progress.in_flight = None;
        self.state.send_replace(SessionState::Closed);
    }
}

// ── StepGuard ────────────────────────────────────────────────────

/// A claimed step. Dropping it without [`finish`](Self::finish) (for
/// example when the caller's future is cancelled) fails the session.
#[derive(Debug)]
pub struct StepGuard<'a> {
    machine: &'a SessionMachine,
    step: Step,
    prior: SessionState,
    armed: bool,
}

impl StepGuard<'_> {
    pub fn step(&self) -> Step {
        self.step
    }

    /// State the session was in when this step was claimed.
    pub fn prior_state(&self) -> SessionState {
        self.prior
    }

    /// Record the step's outcome and pass it through.
    pub fn finish<T>(mut self, result: Result<T, CoreError>) -> Result<T, CoreError> {
        self.armed = false;
        match &result {
            Ok(_) => self.machine.complete(self.step),
            Err(err) => {
                warn!(step = %self.step, error = %err, "session step failed");
                self.machine.fail(self.step);
            }
        }
        result
    }
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(step = %self.step, "session step abandoned");
            self.machine.fail(self.step);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn run(machine: &SessionMachine, step: Step) {
        machine.begin(step).unwrap().finish(Ok(())).unwrap();
    }

    #[test]
    fn full_sequence_walks_every_state() {
        let machine = SessionMachine::new();
        let rx = machine.subscribe();
        assert_eq!(machine.current(), SessionState::Unopened);

        run(&machine, Step::Discover);
        run(&machine, Step::OpenDevice);
        assert_eq!(machine.current(), SessionState::Opening);
        run(&machine, Step::AllocateClient);
        assert_eq!(machine.current(), SessionState::Open);
        run(&machine, Step::RegisterEvents);
        run(&machine, Step::Configure);
        assert_eq!(machine.current(), SessionState::Configuring);
        run(&machine, Step::Start);

        assert_eq!(*rx.borrow(), SessionState::Started);
        assert_eq!(machine.last_completed_step(), Some(Step::Start));
    }

    #[test]
    fn out_of_order_step_is_rejected_without_state_change() {
        let machine = SessionMachine::new();
        let err = machine.begin(Step::RegisterEvents).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidState {
                state: SessionState::Unopened,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Cannot register events while session is unopened");
        assert_eq!(machine.current(), SessionState::Unopened);
    }

    #[test]
    fn steps_cannot_be_skipped_or_repeated() {
        let machine = SessionMachine::new();
        run(&machine, Step::Discover);
        run(&machine, Step::OpenDevice);
        run(&machine, Step::AllocateClient);

        assert!(machine.begin(Step::Start).is_err());
        run(&machine, Step::RegisterEvents);
        assert!(machine.begin(Step::RegisterEvents).is_err());
        assert_eq!(machine.current(), SessionState::Configuring);
    }

    #[test]
    fn start_may_skip_configure_but_configure_never_follows_start() {
        let machine = SessionMachine::new();
        for step in [
            Step::Discover,
            Step::OpenDevice,
            Step::AllocateClient,
            Step::RegisterEvents,
            Step::Start,
        ] {
            run(&machine, step);
        }
        assert_eq!(machine.current(), SessionState::Started);

        let err = machine.begin(Step::Configure).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidState {
                state: SessionState::Started,
                ..
            }
        ));
        assert!(machine.begin(Step::Start).is_err());
        assert_eq!(machine.current(), SessionState::Started);
    }

    #[test]
    fn start_order_table() {
        assert!(Step::Start.may_follow(Some(Step::Configure)));
        assert!(Step::Start.may_follow(Some(Step::RegisterEvents)));
        assert!(!Step::Start.may_follow(Some(Step::AllocateClient)));
        assert!(!Step::Start.may_follow(Some(Step::Start)));
        assert!(!Step::Configure.may_follow(Some(Step::Start)));
        assert!(Step::Configure.may_follow(Some(Step::RegisterEvents)));
    }

    #[test]
    fn concurrent_step_is_rejected() {
        let machine = SessionMachine::new();
        let guard = machine.begin(Step::Discover).unwrap();
        assert!(machine.begin(Step::Discover).is_err());
        guard.finish(Ok(())).unwrap();
        assert!(machine.begin(Step::OpenDevice).is_ok());
    }

    #[test]
    fn failure_blocks_everything_but_reopen() {
        let machine = SessionMachine::new();
        run(&machine, Step::Discover);
        let guard = machine.begin(Step::OpenDevice).unwrap();
        let _ = guard.finish::<()>(Err(CoreError::LoopStopped));
        assert_eq!(machine.current(), SessionState::Failed);

        assert!(machine.begin(Step::AllocateClient).is_err());
        let reopen = machine.begin(Step::Discover).unwrap();
        assert_eq!(reopen.prior_state(), SessionState::Failed);
        reopen.finish(Ok(())).unwrap();
        assert_eq!(machine.last_completed_step(), Some(Step::Discover));
    }

    #[test]
    fn abandoned_step_fails_the_session() {
        let machine = SessionMachine::new();
        drop(machine.begin(Step::Discover).unwrap());
        assert_eq!(machine.current(), SessionState::Failed);
    }

    #[test]
    fn closed_is_terminal() {
        let machine = SessionMachine::new();
        let guard = machine.begin(Step::Discover).unwrap();
        machine.close();
        guard.finish(Ok(())).unwrap();

        assert_eq!(machine.current(), SessionState::Closed);
        assert!(machine.begin(Step::Discover).is_err());
        assert_eq!(machine.last_completed_step(), None);
    }
}
