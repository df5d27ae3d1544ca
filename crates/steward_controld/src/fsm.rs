//! The controller finite-state machine.
//!
//! The transition table is data: `(state, input) → (next state,
//! action set)`. Action sets run in a fixed priority order so that,
//! for example, a transition-engine cancel always precedes the policy
//! engine invocation that replaces it, and process exit always runs
//! last. Inputs with no row classify as errors and land in recovery.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Process starting up
    Starting,
    /// Waiting to hear about the cluster
    Pending,
    /// Electing a DC
    Election,
    /// DC: collecting join announcements
    Integration,
    /// DC: finalizing the join round
    FinalizeJoin,
    /// Follower of a remote DC
    NotDc,
    /// DC: policy engine computing
    PolicyEngine,
    /// DC: dispatching a transition graph
    TransitionEngine,
    /// DC: nothing to do
    Idle,
    /// Frozen after an unrecoverable-but-not-fatal condition
    Halt,
    /// Draining before exit
    Stopping,
    /// Final state
    Terminate,
    /// Recovering from an internal error
    Recovery,
}

/// FSM inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Input {
    /// Process came up
    Startup,
    /// An election round should start
    Election,
    /// This node won the election
    ElectionDc,
    /// Another node is (or became) the DC
    NotDc,
    /// A join request arrived (DC)
    JoinRequest,
    /// The join round completed (DC)
    JoinComplete,
    /// The CIB changed
    CibUpdate,
    /// A scheduler run is wanted
    PeCalc,
    /// The scheduler produced a graph
    PeSuccess,
    /// The transition completed
    TeSuccess,
    /// A node joined the membership
    NodeJoin,
    /// A node left the membership
    NodeLeft,
    /// Something failed mid-transition
    Fail,
    /// Internal error
    Error,
    /// Shutdown requested
    Shutdown,
    /// Final stop
    Stop,
}

/// Side-effect bundles triggered by transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Log the transition
    Log,
    /// Announce candidacy and process election messages
    ElectionVote,
    /// Take over the DC role
    DcTakeover,
    /// Release the DC role
    DcRelease,
    /// Announce ourselves to the DC
    ClJoinAnnounce,
    /// Offer joins to all members (DC)
    ClJoinOffer,
    /// Integrate a join request and ack it (DC)
    ClJoinResult,
    /// Invoke the policy engine
    PeInvoke,
    /// Dispatch the current graph
    TeInvoke,
    /// Abort the current graph
    TeCancel,
    /// Ask peers to let us shut down
    ShutdownReq,
    /// Attempt recovery
    Recover,
    /// Exit cleanly
    Exit0,
    /// Exit with an error code
    Exit1,
}

impl ActionKind {
    /// Fixed ordering of actions within one transition; lower runs
    /// first, the exits always run last
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Log => 0,
            Self::TeCancel => 1,
            Self::DcRelease => 2,
            Self::ElectionVote => 3,
            Self::DcTakeover => 4,
            Self::ClJoinAnnounce => 5,
            Self::ClJoinOffer => 6,
            Self::ClJoinResult => 7,
            Self::PeInvoke => 8,
            Self::TeInvoke => 9,
            Self::ShutdownReq => 10,
            Self::Recover => 11,
            Self::Exit0 => 254,
            Self::Exit1 => 255,
        }
    }
}

/// One applied transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State before
    pub from: State,
    /// Input that fired
    pub input: Input,
    /// State after
    pub next: State,
    /// Actions, already sorted by priority
    pub actions: Vec<ActionKind>,
}

/// The controller FSM
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
    /// Create an FSM in the starting state
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Starting,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the FSM reached its terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state == State::Terminate
    }

    /// Apply an input, returning the transition taken
    pub fn apply(&mut self, input: Input) -> Transition {
        let from = self.state;
        let (next, mut actions) = Self::table(from, input);
        actions.sort_by_key(ActionKind::priority);
        if next == State::Recovery && input != Input::Error {
            warn!(?from, ?input, "unhandled input classified as error");
        }
        self.state = next;
        Transition {
            from,
            input,
            next,
            actions,
        }
    }

    /// The transition table
    #[allow(clippy::too_many_lines)]
    fn table(state: State, input: Input) -> (State, Vec<ActionKind>) {
        use ActionKind as A;
        use Input as I;
        use State as S;

        match (state, input) {
            // Startup path; early membership and CIB traffic is
            // normal while waiting to hear about the cluster
            (S::Starting, I::Startup) => (S::Pending, vec![A::Log]),
            (S::Pending, I::Election) => (S::Election, vec![A::ElectionVote]),
            (S::Pending, I::NotDc) => (S::NotDc, vec![A::ClJoinAnnounce]),
            (S::Pending, I::NodeJoin | I::NodeLeft | I::CibUpdate) => {
                (S::Pending, vec![A::Log])
            }

            // Election
            (S::Election, I::Election) => (S::Election, vec![A::ElectionVote]),
            (S::Election, I::ElectionDc) => {
                (S::Integration, vec![A::DcTakeover, A::ClJoinOffer])
            }
            (S::Election, I::NotDc) => (S::NotDc, vec![A::ClJoinAnnounce]),
            (S::Election, I::NodeJoin | I::NodeLeft | I::CibUpdate) => {
                (S::Election, vec![A::Log])
            }

            // DC: integration and join finalization
            (S::Integration, I::NodeJoin) => (S::Integration, vec![A::ClJoinOffer]),
            (S::Integration, I::JoinRequest) => (S::Integration, vec![A::ClJoinResult]),
            (S::Integration, I::JoinComplete) => (S::FinalizeJoin, vec![A::Log]),
            (S::Integration, I::NodeLeft) => (S::Election, vec![A::DcRelease, A::ElectionVote]),
            (S::Integration, I::Election) => (S::Election, vec![A::DcRelease, A::ElectionVote]),
            (S::FinalizeJoin, I::PeCalc) => (S::PolicyEngine, vec![A::PeInvoke]),
            (S::FinalizeJoin, I::NodeJoin) => (S::Integration, vec![A::ClJoinOffer]),
            (S::FinalizeJoin, I::NodeLeft) => (S::Election, vec![A::DcRelease, A::ElectionVote]),

            // DC: the scheduling cycle
            (S::PolicyEngine, I::PeSuccess) => (S::TransitionEngine, vec![A::TeInvoke]),
            (S::PolicyEngine, I::CibUpdate) => (S::PolicyEngine, vec![A::PeInvoke]),
            (S::PolicyEngine, I::NodeJoin) => (S::Integration, vec![A::ClJoinOffer]),
            (S::PolicyEngine, I::NodeLeft) => (S::PolicyEngine, vec![A::PeInvoke]),
            (S::TransitionEngine, I::TeSuccess) => (S::Idle, vec![A::Log]),
            (S::TransitionEngine, I::Fail) => {
                (S::PolicyEngine, vec![A::TeCancel, A::PeInvoke])
            }
            (S::TransitionEngine, I::CibUpdate) => {
                (S::PolicyEngine, vec![A::TeCancel, A::PeInvoke])
            }
            (S::TransitionEngine, I::NodeLeft) => {
                (S::PolicyEngine, vec![A::TeCancel, A::PeInvoke])
            }
            (S::TransitionEngine, I::NodeJoin) => {
                (S::Integration, vec![A::TeCancel, A::ClJoinOffer])
            }
            (S::Idle, I::CibUpdate) => (S::PolicyEngine, vec![A::PeInvoke]),
            (S::Idle, I::PeCalc) => (S::PolicyEngine, vec![A::PeInvoke]),
            (S::Idle, I::NodeJoin) => (S::Integration, vec![A::ClJoinOffer]),
            (S::Idle, I::NodeLeft) => (S::PolicyEngine, vec![A::PeInvoke]),
            (S::Idle, I::Election) => (S::Election, vec![A::DcRelease, A::ElectionVote]),
            (S::Idle, I::NotDc) => (S::NotDc, vec![A::DcRelease, A::ClJoinAnnounce]),

            // Follower path
            (S::NotDc, I::CibUpdate) => (S::NotDc, vec![A::Log]),
            (S::NotDc, I::Election) => (S::Election, vec![A::ElectionVote]),
            (S::NotDc, I::NodeLeft) => (S::Election, vec![A::ElectionVote]),
            (S::NotDc, I::NodeJoin) => (S::NotDc, vec![A::Log]),

            // Shutdown from anywhere; a draining node no longer
            // reacts to cluster churn
            (S::Stopping, I::Stop) => (S::Terminate, vec![A::Exit0]),
            (S::Stopping, I::Error) => (S::Halt, vec![A::Log]),
            (S::Halt, I::Stop) => (S::Terminate, vec![A::Exit1]),
            (_, I::Shutdown) => (S::Stopping, vec![A::ShutdownReq]),
            (S::Stopping, _) => (S::Stopping, vec![A::Log]),

            // Recovery
            (S::Recovery, I::Election) => (S::Election, vec![A::ElectionVote]),
            (S::Recovery, I::Stop) => (S::Terminate, vec![A::Exit1]),
            (_, I::Error) => (S::Recovery, vec![A::Recover]),

            // Anything else is an internal inconsistency
            _ => (S::Recovery, vec![A::Recover]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(fsm: &mut Fsm, inputs: &[Input]) -> Vec<State> {
        inputs.iter().map(|i| fsm.apply(*i).next).collect()
    }

    #[test]
    fn test_canonical_dc_path() {
        let mut fsm = Fsm::new();
        let states = drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinComplete,
                Input::PeCalc,
                Input::PeSuccess,
                Input::TeSuccess,
            ],
        );
        assert_eq!(
            states,
            vec![
                State::Pending,
                State::Election,
                State::Integration,
                State::FinalizeJoin,
                State::PolicyEngine,
                State::TransitionEngine,
                State::Idle,
            ]
        );
    }

    #[test]
    fn test_idle_cib_change_replans() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinComplete,
                Input::PeCalc,
                Input::PeSuccess,
                Input::TeSuccess,
            ],
        );
        let transition = fsm.apply(Input::CibUpdate);
        assert_eq!(transition.next, State::PolicyEngine);
        assert_eq!(transition.actions, vec![ActionKind::PeInvoke]);
    }

    #[test]
    fn test_fail_mid_transition_cancels_then_replans() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinComplete,
                Input::PeCalc,
                Input::PeSuccess,
            ],
        );
        let transition = fsm.apply(Input::Fail);
        assert_eq!(transition.next, State::PolicyEngine);
        // Cancel is ordered before the new policy run
        assert_eq!(transition.actions, vec![ActionKind::TeCancel, ActionKind::PeInvoke]);
    }

    #[test]
    fn test_follower_path() {
        let mut fsm = Fsm::new();
        let states = drive(&mut fsm, &[Input::Startup, Input::NotDc]);
        assert_eq!(states, vec![State::Pending, State::NotDc]);

        // DC loss sends a follower back to election
        let transition = fsm.apply(Input::NodeLeft);
        assert_eq!(transition.next, State::Election);
    }

    #[test]
    fn test_early_membership_traffic_is_benign() {
        let mut fsm = Fsm::new();
        fsm.apply(Input::Startup);
        assert_eq!(fsm.apply(Input::NodeJoin).next, State::Pending);
        assert_eq!(fsm.apply(Input::CibUpdate).next, State::Pending);
        assert_eq!(fsm.apply(Input::NodeLeft).next, State::Pending);
        // The node can still proceed to election afterwards
        assert_eq!(fsm.apply(Input::Election).next, State::Election);
    }

    #[test]
    fn test_draining_node_ignores_churn() {
        let mut fsm = Fsm::new();
        fsm.apply(Input::Startup);
        fsm.apply(Input::Shutdown);
        assert_eq!(fsm.apply(Input::CibUpdate).next, State::Stopping);
        assert_eq!(fsm.apply(Input::NodeLeft).next, State::Stopping);
        assert_eq!(fsm.apply(Input::Stop).next, State::Terminate);
    }

    #[test]
    fn test_error_classifies_to_recovery() {
        let mut fsm = Fsm::new();
        fsm.apply(Input::Startup);
        let transition = fsm.apply(Input::Error);
        assert_eq!(transition.next, State::Recovery);
        assert_eq!(transition.actions, vec![ActionKind::Recover]);
    }

    #[test]
    fn test_unhandled_input_is_error() {
        let mut fsm = Fsm::new();
        // TeSuccess while Starting makes no sense
        let transition = fsm.apply(Input::TeSuccess);
        assert_eq!(transition.next, State::Recovery);
    }

    #[test]
    fn test_shutdown_drains_then_terminates() {
        let mut fsm = Fsm::new();
        drive(&mut fsm, &[Input::Startup, Input::Election, Input::ElectionDc]);
        let transition = fsm.apply(Input::Shutdown);
        assert_eq!(transition.next, State::Stopping);
        assert_eq!(transition.actions, vec![ActionKind::ShutdownReq]);

        let transition = fsm.apply(Input::Stop);
        assert_eq!(transition.next, State::Terminate);
        assert_eq!(transition.actions, vec![ActionKind::Exit0]);
        assert!(fsm.is_terminal());
    }

    #[test]
    fn test_exit_runs_last() {
        // Priority table invariant: the exits outrank everything
        for action in [
            ActionKind::Log,
            ActionKind::TeCancel,
            ActionKind::PeInvoke,
            ActionKind::ShutdownReq,
            ActionKind::Recover,
        ] {
            assert!(action.priority() < ActionKind::Exit0.priority());
            assert!(action.priority() < ActionKind::Exit1.priority());
        }
    }

    #[test]
    fn test_transition_engine_cib_change_aborts() {
        let mut fsm = Fsm::new();
        drive(
            &mut fsm,
            &[
                Input::Startup,
                Input::Election,
                Input::ElectionDc,
                Input::JoinComplete,
                Input::PeCalc,
                Input::PeSuccess,
            ],
        );
        assert_eq!(fsm.state(), State::TransitionEngine);
        let transition = fsm.apply(Input::CibUpdate);
        assert_eq!(transition.next, State::PolicyEngine);
        assert!(transition.actions.contains(&ActionKind::TeCancel));
    }
}
