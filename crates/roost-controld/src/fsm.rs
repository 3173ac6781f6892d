// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The controller finite-state machine.
//!
//! One FSM per controller process. Inputs arrive from membership, the CIB,
//! elections, peer messages, and the transition executor; each accepted
//! transition yields exactly one action set, ordered by a fixed priority
//! table so that process exit always runs last. Input/state combinations
//! outside the table classify as errors and land in `Recovery`.

use std::fmt;

/// Controller states.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    /// Process bring-up.
    Starting,
    /// Waiting for the cluster layer before electing.
    Pending,
    /// DC election in progress.
    Election,
    /// Elected DC collecting join requests.
    Integration,
    /// DC finalizing the join round.
    FinalizeJoin,
    /// A non-DC member tracking the elected DC.
    NotDc,
    /// DC computing a transition graph.
    PolicyEngine,
    /// DC executing a transition graph.
    TransitionEngine,
    /// DC idle, waiting for change.
    Idle,
    /// Parked after a non-recoverable local condition; awaiting operator.
    Halt,
    /// Draining before exit.
    Stopping,
    /// Terminal.
    Terminate,
    /// Re-synchronizing after an error; next step is a fresh election.
    Recovery,
}

/// FSM inputs (cause classifications).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Input {
    /// Process started.
    Startup,
    /// A join offer arrived (non-DC side).
    JoinOffer,
    /// A join request arrived (DC side).
    JoinRequest,
    /// The join round completed.
    JoinResult,
    /// An election round must run.
    Election,
    /// This node won the election.
    ElectionDc,
    /// Another node is (or became) DC.
    NotDc,
    /// The CIB changed.
    CibUpdate,
    /// A policy computation is required.
    PeCalc,
    /// The policy engine produced a graph.
    PeSuccess,
    /// The transition engine completed the graph.
    TeSuccess,
    /// A node joined the membership.
    NodeJoin,
    /// A node left the membership.
    NodeLeft,
    /// A recoverable failure (action failed, graph aborted).
    Fail,
    /// An unclassifiable or invariant-breaking condition.
    Error,
    /// Graceful shutdown requested.
    Shutdown,
    /// Drain finished; stop now.
    Stop,
}

/// Side effects a transition requests, executed in priority order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FsmAction {
    /// Emit a structured log line for the transition.
    Log,
    /// Start an election round (broadcast our ballot).
    StartElection,
    /// Assume DC duties.
    DcTakeover,
    /// Release DC duties.
    DcRelease,
    /// Announce ourselves to the DC.
    JoinAnnounce,
    /// Offer joins to all members (DC).
    JoinOfferAll,
    /// Integrate a node's join request (DC).
    IntegrateJoin,
    /// Acknowledge the completed join round (DC).
    JoinAckAll,
    /// Invoke the policy engine.
    PeInvoke,
    /// Dispatch the computed graph.
    TeInvoke,
    /// Abort the in-flight graph.
    TeCancel,
    /// Ask peers to shut down cleanly and drain.
    ShutdownReq,
    /// Exit the process; always ordered last.
    Exit1,
}

/// Fixed execution priority; lower runs earlier, [`FsmAction::Exit1`]
/// always last.
fn action_priority(action: FsmAction) -> u8 {
    match action {
        FsmAction::Log => 0,
        FsmAction::TeCancel => 1,
        FsmAction::DcRelease => 2,
        FsmAction::DcTakeover => 3,
        FsmAction::StartElection => 4,
        FsmAction::JoinAnnounce => 5,
        FsmAction::JoinOfferAll => 6,
        FsmAction::IntegrateJoin => 7,
        FsmAction::JoinAckAll => 8,
        FsmAction::PeInvoke => 9,
        FsmAction::TeInvoke => 10,
        FsmAction::ShutdownReq => 11,
        FsmAction::Exit1 => u8::MAX,
    }
}

/// The outcome of feeding one input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// State before the input.
    pub from: State,
    /// State after the input.
    pub to: State,
    /// Ordered action set to execute.
    pub actions: Vec<FsmAction>,
}

/// The controller FSM.
#[derive(Debug)]
pub struct Fsm {
    state: State,
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Fsm {
    /// Creates the machine in [`State::Starting`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Starting,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// True once the machine reached its terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state == State::Terminate
    }

    /// Feeds one input, advancing the machine and returning the ordered
    /// action set of the fired transition.
    pub fn handle(&mut self, input: Input) -> TransitionOutcome {
        let from = self.state;
        let (to, mut actions) = transition(from, input);
        actions.sort_by_key(|a| action_priority(*a));
        if to == State::Recovery && from != State::Recovery {
            tracing::warn!(?from, ?input, event = "fsm-recovery", "unhandled input; entering recovery");
        } else {
            tracing::debug!(?from, ?input, ?to, "fsm transition");
        }
        self.state = to;
        TransitionOutcome { from, to, actions }
    }
}

/// The transition table. Unlisted combinations classify as `Error`.
#[allow(clippy::match_same_arms)]
fn transition(state: State, input: Input) -> (State, Vec<FsmAction>) {
    use FsmAction as A;
    use Input as I;
    use State as S;

    match (state, input) {
        // Global edges first: shutdown and hard errors outrank everything.
        (S::Terminate, _) => (S::Terminate, vec![]),
        (_, I::Shutdown) => (S::Stopping, vec![A::Log, A::TeCancel, A::ShutdownReq]),
        (S::Stopping, I::Stop) => (S::Terminate, vec![A::Log, A::Exit1]),
        (S::Stopping, I::Fail) => (S::Halt, vec![A::Log]),
        (S::Stopping, _) => (S::Stopping, vec![]),
        (_, I::Error) => (S::Recovery, vec![A::Log, A::DcRelease]),
        (S::Halt, _) => (S::Halt, vec![A::Log]),

        // Bring-up.
        (S::Starting, I::Startup) => (S::Pending, vec![A::Log]),
        (S::Pending, I::Election) => (S::Election, vec![A::StartElection]),
        (S::Pending, I::NodeJoin) => (S::Election, vec![A::StartElection]),
        (S::Pending, I::NotDc) => (S::NotDc, vec![A::JoinAnnounce]),

        // Election.
        (S::Election, I::ElectionDc) => (S::Integration, vec![A::DcTakeover, A::JoinOfferAll]),
        (S::Election, I::NotDc) => (S::NotDc, vec![A::DcRelease, A::JoinAnnounce]),
        (S::Election, I::Election) => (S::Election, vec![A::StartElection]),
        (S::Election, I::NodeJoin | I::NodeLeft) => (S::Election, vec![A::StartElection]),

        // DC join round.
        (S::Integration, I::JoinRequest) => (S::Integration, vec![A::IntegrateJoin]),
        (S::Integration, I::NodeJoin) => (S::Integration, vec![A::JoinOfferAll]),
        (S::Integration, I::JoinResult) => (S::FinalizeJoin, vec![A::JoinAckAll]),
        (S::Integration, I::NodeLeft | I::Election) => (S::Election, vec![A::StartElection]),
        (S::FinalizeJoin, I::PeCalc) => (S::PolicyEngine, vec![A::PeInvoke]),
        (S::FinalizeJoin, I::JoinRequest) => (S::FinalizeJoin, vec![A::IntegrateJoin]),
        (S::FinalizeJoin, I::NodeLeft | I::Election) => (S::Election, vec![A::StartElection]),

        // DC steady loop.
        (S::PolicyEngine, I::PeSuccess) => (S::TransitionEngine, vec![A::TeInvoke]),
        (S::PolicyEngine, I::CibUpdate) => (S::PolicyEngine, vec![A::PeInvoke]),
        (S::PolicyEngine, I::NodeLeft | I::NodeJoin) => (S::PolicyEngine, vec![A::PeInvoke]),
        (S::TransitionEngine, I::TeSuccess) => (S::Idle, vec![A::Log]),
        (S::TransitionEngine, I::Fail) => (S::PolicyEngine, vec![A::TeCancel, A::PeInvoke]),
        (S::TransitionEngine, I::CibUpdate) => {
            (S::PolicyEngine, vec![A::TeCancel, A::PeInvoke])
        }
        (S::TransitionEngine, I::NodeLeft | I::NodeJoin) => {
            (S::PolicyEngine, vec![A::TeCancel, A::PeInvoke])
        }
        (S::Idle, I::CibUpdate | I::PeCalc) => (S::PolicyEngine, vec![A::PeInvoke]),
        (S::Idle, I::NodeLeft | I::NodeJoin) => (S::PolicyEngine, vec![A::PeInvoke]),
        (S::Idle, I::Election) => (S::Election, vec![A::DcRelease, A::StartElection]),

        // Non-DC life.
        (S::NotDc, I::JoinOffer) => (S::NotDc, vec![A::Log]),
        (S::NotDc, I::CibUpdate | I::NodeJoin) => (S::NotDc, vec![]),
        (S::NotDc, I::Election | I::NodeLeft) => (S::Election, vec![A::StartElection]),
        (S::NotDc, I::NotDc) => (S::NotDc, vec![]),

        // Recovery re-elects.
        (S::Recovery, I::Election | I::Startup | I::NodeJoin | I::NodeLeft) => {
            (S::Election, vec![A::StartElection])
        }

        // Everything else is an invariant breach.
        _ => (S::Recovery, vec![A::Log, A::DcRelease]),
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Starting => "S_STARTING",
            State::Pending => "S_PENDING",
            State::Election => "S_ELECTION",
            State::Integration => "S_INTEGRATION",
            State::FinalizeJoin => "S_FINALIZE_JOIN",
            State::NotDc => "S_NOT_DC",
            State::PolicyEngine => "S_POLICY_ENGINE",
            State::TransitionEngine => "S_TRANSITION_ENGINE",
            State::Idle => "S_IDLE",
            State::Halt => "S_HALT",
            State::Stopping => "S_STOPPING",
            State::Terminate => "S_TERMINATE",
            State::Recovery => "S_RECOVERY",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(fsm: &mut Fsm, inputs: &[Input]) {
        for input in inputs {
            fsm.handle(*input);
        }
    }

    #[test]
    fn canonical_dc_path_reaches_idle() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinResult,
                Input::PeCalc,
                Input::PeSuccess,
                Input::TeSuccess,
            ],
        );
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn cib_change_in_idle_reinvokes_the_policy_engine() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinResult,
                Input::PeCalc,
                Input::PeSuccess,
                Input::TeSuccess,
            ],
        );
        let outcome = fsm.handle(Input::CibUpdate);
        assert_eq!(outcome.to, State::PolicyEngine);
        assert_eq!(outcome.actions, vec![FsmAction::PeInvoke]);
    }

    #[test]
    fn failure_mid_transition_cancels_and_replans() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinResult,
                Input::PeCalc,
                Input::PeSuccess,
            ],
        );
        assert_eq!(fsm.state(), State::TransitionEngine);
        let outcome = fsm.handle(Input::Fail);
        assert_eq!(outcome.to, State::PolicyEngine);
        assert_eq!(outcome.actions, vec![FsmAction::TeCancel, FsmAction::PeInvoke]);
    }

    #[test]
    fn unknown_combinations_enter_recovery() {
        let mut fsm = Fsm::new();
        fsm.handle(Input::Startup);
        let outcome = fsm.handle(Input::TeSuccess);
        assert_eq!(outcome.to, State::Recovery);
        let next = fsm.handle(Input::Election);
        assert_eq!(next.to, State::Election);
    }

    #[test]
    fn shutdown_drains_then_terminates_with_exit_last() {
        let mut fsm = Fsm::new();
        drive(&mut fsm, &[Input::Startup, Input::Election, Input::ElectionDc]);
        let drained = fsm.handle(Input::Shutdown);
        assert_eq!(drained.to, State::Stopping);
        let stopped = fsm.handle(Input::Stop);
        assert_eq!(stopped.to, State::Terminate);
        assert_eq!(
            stopped.actions.last(),
            Some(&FsmAction::Exit1),
            "exit is always the last action of its set"
        );
        assert!(fsm.is_terminal());
        // Terminal state swallows further input.
        assert_eq!(fsm.handle(Input::CibUpdate).to, State::Terminate);
    }

    #[test]
    fn action_sets_are_ordered_by_the_priority_table() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinResult,
                Input::PeCalc,
                Input::PeSuccess,
            ],
        );
        let outcome = fsm.handle(Input::CibUpdate);
        assert_eq!(
            outcome.actions,
            vec![FsmAction::TeCancel, FsmAction::PeInvoke],
            "cancel strictly precedes the re-plan"
        );
    }
}
