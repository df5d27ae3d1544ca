//! The controller: one node's event loop and collaborator wiring.
//!
//! Single-threaded cooperative: events are consumed one at a time and
//! each is fully processed (FSM transition plus its action set)
//! before the next. A graph is only ever dispatched from the
//! transition-engine state, so overlapping transitions cannot happen.

use std::collections::VecDeque;

use steward_cluster::{
    DcJoin, Deduper, Election, ElectionConfig, ElectionMsg, ElectionState, Joiner, Membership,
    MessageKind, PeerMessage,
};
use steward_core::{ExitStatus, NodeUuid, TransitionId};
use steward_exec::{ActionDispatcher, ExecutorOutcome, TransitionExecutor};
use steward_graph::TransitionGraph;
use tracing::{debug, error, info};

use crate::cib::CibClient;
use crate::events::Event;
use crate::fsm::{ActionKind, Fsm, State, Transition};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Local node name
    pub node_name: String,
    /// Local node uuid
    pub node_uuid: NodeUuid,
    /// Election window
    pub election_window_ms: u64,
}

impl ControllerConfig {
    /// Config for a named node
    #[must_use]
    pub fn new(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            node_uuid: NodeUuid::from_name(node_name),
            election_window_ms: 1000,
        }
    }
}

/// One node's controller
pub struct Controller {
    config: ControllerConfig,
    fsm: Fsm,
    election: Election,
    membership: Membership,
    dc_join: Option<DcJoin>,
    joiner: Option<Joiner>,
    cib: Box<dyn CibClient>,
    dispatcher: Box<dyn ActionDispatcher + Send>,
    executor: Option<TransitionExecutor>,
    graph: Option<TransitionGraph>,
    transition_id: TransitionId,
    last_join_request: Option<NodeUuid>,
    outbox: Vec<PeerMessage>,
    pending: VecDeque<Event>,
    deduper: Deduper,
    exit: Option<ExitStatus>,
}

impl Controller {
    /// Wire up a controller
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        cib: Box<dyn CibClient>,
        dispatcher: Box<dyn ActionDispatcher + Send>,
    ) -> Self {
        let mut election_config = ElectionConfig::new(config.node_uuid);
        election_config.window_ms = config.election_window_ms;
        Self {
            election: Election::new(election_config),
            membership: Membership::new(config.node_uuid),
            fsm: Fsm::new(),
            dc_join: None,
            joiner: None,
            cib,
            dispatcher,
            executor: None,
            graph: None,
            transition_id: TransitionId::zero(),
            last_join_request: None,
            outbox: Vec::new(),
            pending: VecDeque::new(),
            deduper: Deduper::new(1024),
            config,
            exit: None,
        }
    }

    /// Current FSM state
    #[must_use]
    pub fn state(&self) -> State {
        self.fsm.state()
    }

    /// Whether this node holds the DC role
    #[must_use]
    pub fn is_dc(&self) -> bool {
        self.election.is_dc()
    }

    /// The exit status set by a terminal transition
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Messages queued for peers; caller drains and delivers
    pub fn take_outbox(&mut self) -> Vec<PeerMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// The last emitted graph, if any
    #[must_use]
    pub fn graph(&self) -> Option<&TransitionGraph> {
        self.graph.as_ref()
    }

    /// Feed one event and everything it cascades into
    pub async fn handle_event(&mut self, event: Event, now: u64) {
        self.pending.push_back(event);
        while let Some(event) = self.pending.pop_front() {
            self.process(event, now).await;
            if self.fsm.is_terminal() {
                break;
            }
        }
    }

    async fn process(&mut self, event: Event, now: u64) {
        debug!(?event, state = ?self.fsm.state(), "event");
        match &event {
            Event::Peer(message) => {
                let message = message.clone();
                self.handle_peer(message, now);
            }
            Event::Tick { now } => {
                self.handle_tick(*now);
            }
            Event::ActionResult { synapse, ok } => {
                self.handle_action_result(*synapse, *ok);
            }
            Event::MembershipJoin { uuid, name } => {
                self.membership.peer_joined(*uuid, name, now).await;
            }
            Event::MembershipLeave { uuid, name } => {
                self.membership.peer_lost(*uuid).await;
                let aborted = self
                    .executor
                    .as_mut()
                    .map(|e| matches!(e.on_peer_lost(name), ExecutorOutcome::Aborted(_)))
                    .unwrap_or(false);
                if aborted {
                    self.executor = None;
                }
            }
            Event::JoinRequested { node } => {
                self.last_join_request = Some(*node);
            }
            Event::InternalError { message } => {
                error!(%message, "internal error");
            }
            _ => {}
        }

        if let Some(input) = event.input() {
            let transition = self.fsm.apply(input);
            self.run_actions(&transition, now);
        }

        // A draining shutdown completes once nothing is in flight
        if self.fsm.state() == State::Stopping
            && self.executor.is_none()
            && !self.pending.contains(&Event::Stop)
        {
            self.pending.push_back(Event::Stop);
        }
    }

    fn run_actions(&mut self, transition: &Transition, now: u64) {
        for action in &transition.actions {
            match action {
                ActionKind::Log => {
                    info!(
                        from = ?transition.from,
                        input = ?transition.input,
                        next = ?transition.next,
                        "fsm transition"
                    );
                }
                ActionKind::ElectionVote => {
                    let msg = self.election.start(now);
                    self.broadcast_election(&msg);
                }
                ActionKind::DcTakeover => {
                    match self.cib.version() {
                        Ok(version) => {
                            info!(node = %self.config.node_name, "taking over as DC");
                            self.dc_join = Some(DcJoin::new(version));
                        }
                        Err(e) => {
                            self.pending.push_back(Event::InternalError {
                                message: format!("DC takeover failed: {e}"),
                            });
                        }
                    }
                }
                ActionKind::DcRelease => {
                    self.dc_join = None;
                    self.graph = None;
                    self.executor = None;
                }
                ActionKind::ClJoinAnnounce => {
                    self.joiner = Some(Joiner::announce(now));
                    self.send_controller(None, "join_announce");
                }
                ActionKind::ClJoinOffer => {
                    self.send_controller(None, "join_offer");
                }
                ActionKind::ClJoinResult => {
                    self.integrate_join(now);
                }
                ActionKind::PeInvoke => {
                    self.invoke_policy_engine(now);
                }
                ActionKind::TeInvoke => {
                    self.invoke_transition_engine(now);
                }
                ActionKind::TeCancel => {
                    if let Some(executor) = &mut self.executor {
                        executor.abort(steward_exec::AbortReason::CibChanged);
                    }
                    self.executor = None;
                }
                ActionKind::ShutdownReq => {
                    self.send_controller(None, "shutdown_request");
                }
                ActionKind::Recover => {
                    self.election.reset();
                    self.executor = None;
                    self.graph = None;
                    self.dc_join = None;
                    self.pending.push_back(Event::Stop);
                }
                ActionKind::Exit0 => {
                    self.exit = Some(ExitStatus::Ok);
                }
                ActionKind::Exit1 => {
                    self.exit = Some(ExitStatus::Software);
                }
            }
        }
    }

    fn broadcast_election(&mut self, msg: &ElectionMsg) {
        let subtype = match msg {
            ElectionMsg::Candidacy { .. } => "vote",
            ElectionMsg::NoVote { .. } => "no-vote",
            ElectionMsg::Takeover { .. } => "takeover",
        };
        self.send_controller(None, subtype);
    }

    fn send_controller(&mut self, to: Option<NodeUuid>, subtype: &str) {
        self.outbox.push(PeerMessage::new(
            self.config.node_uuid,
            to,
            MessageKind::Controller,
            subtype,
        ));
    }

    fn handle_peer(&mut self, message: PeerMessage, now: u64) {
        if !self.deduper.insert(&message.reference) {
            debug!(reference = %message.reference, "duplicate message dropped");
            return;
        }
        match message.subtype.as_str() {
            "vote" => {
                if let Some(reply) = self.election.on_candidacy(message.from) {
                    self.broadcast_election(&reply);
                }
            }
            "no-vote" => {
                self.election.on_no_vote(message.from);
            }
            "takeover" => {
                self.election.on_takeover(message.from);
                self.pending.push_back(Event::ElectionLost { dc: message.from });
            }
            "join_announce" => {
                if let Some(dc_join) = &mut self.dc_join {
                    dc_join.on_announce(message.from, now);
                    self.outbox.push(message.reply(self.config.node_uuid, "join_offer"));
                }
            }
            "join_offer" => {
                if let Some(joiner) = &mut self.joiner {
                    if joiner.on_offer(steward_state::CibVersion::default(), now).is_ok() {
                        self.outbox.push(message.reply(self.config.node_uuid, "join_request"));
                    }
                }
            }
            "join_request" => {
                self.pending.push_back(Event::JoinRequested { node: message.from });
            }
            "join_ack" => {
                if let Some(joiner) = &mut self.joiner {
                    let _ = joiner.on_ack();
                }
            }
            other => {
                debug!(subtype = other, "unhandled peer message");
            }
        }
    }

    fn integrate_join(&mut self, now: u64) {
        let Some(node) = self.last_join_request.take() else {
            return;
        };
        let Some(dc_join) = &mut self.dc_join else {
            return;
        };
        match dc_join.on_request(node, now) {
            Ok(all_joined) => {
                self.send_controller(Some(node), "join_ack");
                if all_joined {
                    self.pending.push_back(Event::JoinsComplete);
                }
            }
            Err(e) => {
                debug!(error = %e, "join integration rejected");
            }
        }
    }

    fn handle_tick(&mut self, now: u64) {
        if let Some(msg) = self.election.tick(now) {
            self.broadcast_election(&msg);
            self.pending.push_back(Event::ElectionWon);
        } else if let ElectionState::Lost(dc) = self.election.state() {
            if self.fsm.state() == State::Election {
                self.pending.push_back(Event::ElectionLost { dc });
            }
        }

        if let Some(executor) = &mut self.executor {
            if let ExecutorOutcome::Aborted(reason) = executor.check_timeouts(now) {
                self.executor = None;
                self.pending.push_back(Event::TransitionAborted { reason });
            }
        }

        // A stalled join step, on either side, re-enters election
        if let Some(dc_join) = &mut self.dc_join {
            let stalled = dc_join.check_timeouts(now);
            if !stalled.is_empty() && self.fsm.state() == State::Integration {
                self.pending.push_back(Event::ElectionStart);
            }
        }
        let join_stalled = self
            .joiner
            .as_ref()
            .is_some_and(|joiner| joiner.timed_out(now))
            && self.fsm.state() == State::NotDc;
        if join_stalled {
            self.joiner = None;
            self.pending.push_back(Event::ElectionStart);
        }
    }

    fn handle_action_result(&mut self, synapse: u32, ok: bool) {
        self.record_op_history(synapse, ok);
        let outcome = match &mut self.executor {
            Some(executor) => executor.on_action_result(synapse, ok),
            None => return,
        };
        match outcome {
            ExecutorOutcome::Complete => {
                self.executor = None;
                self.pending.push_back(Event::TransitionComplete);
            }
            ExecutorOutcome::Aborted(reason) => {
                self.executor = None;
                self.pending.push_back(Event::TransitionAborted { reason });
            }
            ExecutorOutcome::InProgress => {
                // Completions may unlock further synapses
                let complete = if let Some(executor) = &mut self.executor {
                    let _ = executor.dispatch_ready(0, self.dispatcher.as_mut());
                    executor.outcome() == ExecutorOutcome::Complete
                } else {
                    false
                };
                if complete {
                    self.executor = None;
                    self.pending.push_back(Event::TransitionComplete);
                }
            }
        }
    }

    /// Write an operation outcome into CIB status
    ///
    /// Writes go through the CIB collaborator, which serializes them;
    /// a conflicting write here just means another status update
    /// landed first, and the next scheduler run reads the merged
    /// truth either way.
    fn record_op_history(&mut self, synapse: u32, ok: bool) {
        let Some(executor) = &self.executor else { return };
        let Some(synapse) = executor.graph().synapse(synapse) else {
            return;
        };
        let action = &synapse.action;
        if action.is_pseudo() {
            return;
        }
        let (Some(rsc), Some(node)) = (&action.rsc, &action.node) else {
            return;
        };
        let rc = if ok { ExitStatus::Ok } else { ExitStatus::Error };

        let updated = self.cib.read().and_then(|xml| {
            steward_state::cib::record_op_result(&xml, node, rsc, action.task.as_str(), rc.code())
                .map_err(|e| crate::cib::CibError::Rejected(e.to_string()))
        });
        match updated {
            Ok(xml) => {
                let result = self
                    .cib
                    .version()
                    .and_then(|version| self.cib.write(&xml, version));
                if let Err(e) = result {
                    debug!(error = %e, "op history write lost a race");
                }
            }
            Err(e) => {
                debug!(error = %e, "op history update skipped");
            }
        }
    }

    fn invoke_policy_engine(&mut self, now: u64) {
        let xml = match self.cib.read() {
            Ok(xml) => xml,
            Err(e) => {
                self.pending.push_back(Event::InternalError {
                    message: format!("CIB read failed: {e}"),
                });
                return;
            }
        };
        let mut ws = match steward_state::cib::parse(&xml, now) {
            Ok(ws) => ws,
            Err(e) => {
                self.pending.push_back(Event::InternalError {
                    message: format!("CIB ingest failed: {e}"),
                });
                return;
            }
        };
        match steward_sched::schedule(&mut ws, self.transition_id) {
            Ok(graph) => {
                info!(
                    transition = %self.transition_id,
                    synapses = graph.len(),
                    "policy engine produced graph"
                );
                self.transition_id = self.transition_id.next();
                self.graph = Some(graph);
                self.pending.push_back(Event::PolicySucceeded);
            }
            Err(e) => {
                self.pending.push_back(Event::InternalError {
                    message: format!("scheduler failed: {e}"),
                });
            }
        }
    }

    fn invoke_transition_engine(&mut self, now: u64) {
        let Some(graph) = self.graph.clone() else {
            self.pending.push_back(Event::InternalError {
                message: "transition engine invoked without a graph".to_string(),
            });
            return;
        };
        let mut executor = TransitionExecutor::new(graph, &self.config.node_name);
        match executor.dispatch_ready(now, self.dispatcher.as_mut()) {
            Ok(_) => {
                if executor.outcome() == ExecutorOutcome::Complete {
                    self.pending.push_back(Event::TransitionComplete);
                } else {
                    self.executor = Some(executor);
                }
            }
            Err(e) => {
                self.pending.push_back(Event::TransitionAborted {
                    reason: steward_exec::AbortReason::ActionFailed { key: e.to_string() },
                });
            }
        }
    }
}

/// Run the scheduler against a canned single-node document to prove
/// the process can do useful work; used by the `-s` CLI flag
///
/// # Errors
///
/// Returns a description of the first stage that failed
pub fn sanity_check() -> Result<(), String> {
    const CIB: &str = r#"
<cib admin_epoch="0" epoch="1" num_updates="0">
  <configuration>
    <nodes>
      <node id="00000000-0000-0000-0000-000000000001" uname="sanity-node"/>
    </nodes>
    <resources>
      <primitive id="sanity-rsc" class="ocf" provider="heartbeat" type="Dummy"/>
    </resources>
    <constraints/>
  </configuration>
  <status>
    <node_state id="00000000-0000-0000-0000-000000000001" uname="sanity-node" in_ccm="true" crmd="online"/>
  </status>
</cib>"#;

    let mut ws = steward_state::cib::parse(CIB, 0).map_err(|e| format!("ingest: {e}"))?;
    let graph = steward_sched::schedule(&mut ws, TransitionId::zero())
        .map_err(|e| format!("schedule: {e}"))?;
    let xml = steward_graph::xml::to_xml(&graph).map_err(|e| format!("serialize: {e}"))?;
    let parsed = steward_graph::xml::from_xml(&xml).map_err(|e| format!("parse: {e}"))?;
    if parsed != graph {
        return Err("graph round-trip mismatch".to_string());
    }
    Ok(())
}
