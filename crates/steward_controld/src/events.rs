//! Event-loop inputs.
//!
//! Every collaborator (membership, CIB notifications, peer messages,
//! timers, the executor) feeds the single event loop with these
//! values; the loop maps them onto FSM inputs. There is no hidden
//! stack: a callback-style collaborator becomes a message producer.

use steward_cluster::PeerMessage;
use steward_core::NodeUuid;
use steward_exec::AbortReason;
use steward_state::CibVersion;

use crate::fsm::Input;

/// An event delivered to the controller loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Process startup complete
    Startup,
    /// A node joined the cluster membership
    MembershipJoin {
        /// The node
        uuid: NodeUuid,
        /// Its name
        name: String,
    },
    /// A node left the cluster membership
    MembershipLeave {
        /// The node
        uuid: NodeUuid,
        /// Its name
        name: String,
    },
    /// The CIB changed
    CibUpdated {
        /// New version
        version: CibVersion,
    },
    /// An election round should start (cold start, DC loss)
    ElectionStart,
    /// A framed message arrived from a peer
    Peer(PeerMessage),
    /// This node won the election
    ElectionWon,
    /// Another node won the election
    ElectionLost {
        /// The winner
        dc: NodeUuid,
    },
    /// Every joiner completed the handshake
    JoinsComplete,
    /// A join request is ready for integration
    JoinRequested {
        /// The joining node
        node: NodeUuid,
    },
    /// A scheduler run is wanted
    PolicyWanted,
    /// The scheduler produced a graph
    PolicySucceeded,
    /// The dispatched transition completed
    TransitionComplete,
    /// The dispatched transition aborted
    TransitionAborted {
        /// Why
        reason: AbortReason,
    },
    /// A dispatched action finished
    ActionResult {
        /// Synapse that completed
        synapse: u32,
        /// Whether the agent reported success
        ok: bool,
    },
    /// Periodic timer
    Tick {
        /// Current time (unix millis)
        now: u64,
    },
    /// Operator requested shutdown
    ShutdownRequest,
    /// Final stop after draining
    Stop,
    /// Internal error
    InternalError {
        /// Description for the log
        message: String,
    },
}

impl Event {
    /// The FSM input this event maps to, if it drives the FSM at all
    ///
    /// Protocol bookkeeping events (ticks, peer messages, action
    /// results) are handled by the loop itself and only reach the FSM
    /// through the events they generate.
    #[must_use]
    pub fn input(&self) -> Option<Input> {
        match self {
            Self::Startup => Some(Input::Startup),
            Self::MembershipJoin { .. } => Some(Input::NodeJoin),
            Self::MembershipLeave { .. } => Some(Input::NodeLeft),
            Self::CibUpdated { .. } => Some(Input::CibUpdate),
            Self::ElectionStart => Some(Input::Election),
            Self::ElectionWon => Some(Input::ElectionDc),
            Self::ElectionLost { .. } => Some(Input::NotDc),
            Self::JoinsComplete => Some(Input::JoinComplete),
            Self::JoinRequested { .. } => Some(Input::JoinRequest),
            Self::PolicyWanted => Some(Input::PeCalc),
            Self::PolicySucceeded => Some(Input::PeSuccess),
            Self::TransitionComplete => Some(Input::TeSuccess),
            Self::TransitionAborted { .. } => Some(Input::Fail),
            Self::ShutdownRequest => Some(Input::Shutdown),
            Self::Stop => Some(Input::Stop),
            Self::InternalError { .. } => Some(Input::Error),
            Self::Peer(_) | Self::ActionResult { .. } | Self::Tick { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_inputs() {
        assert_eq!(Event::Startup.input(), Some(Input::Startup));
        assert_eq!(Event::ElectionStart.input(), Some(Input::Election));
        assert_eq!(Event::PolicySucceeded.input(), Some(Input::PeSuccess));
        assert_eq!(Event::Stop.input(), Some(Input::Stop));
    }

    #[test]
    fn test_bookkeeping_events_skip_fsm() {
        assert_eq!(Event::Tick { now: 0 }.input(), None);
        assert_eq!(
            Event::ActionResult {
                synapse: 0,
                ok: true
            }
            .input(),
            None
        );
    }
}
