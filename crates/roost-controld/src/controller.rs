// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The controller context: one value threading the FSM, election, join,
//! executor, and CIB seam together.
//!
//! [`Controller::handle_event`] is the whole control flow: an event in,
//! a list of [`Effect`]s out. The surrounding event loop owns every
//! side-effecting collaborator (sockets, the local executor, the policy
//! task) and interprets the effects; the controller itself stays
//! deterministic and directly testable.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use roost_core::{EpochTriple, GraphActionKind, OpRecord, TransitionGraph};
use roost_proto::{DedupeWindow, PeerMessage, PeerSubtype};

use crate::cib::CibStore;
use crate::election::{Election, JoinCoordinator, VoteReaction};
use crate::executor::{
    AbortReason, Dispatch, DispatchTarget, Progress, SynapseState, TransitionExecutor,
};
use crate::events::Event;
use crate::fsm::{Fsm, FsmAction, Input, State};

/// Static controller identity and tunables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// This node's uuid (election identity).
    pub node_uuid: String,
    /// This node's name (dispatch identity).
    pub node_name: String,
    /// Exit instead of recovering on internal errors.
    pub fail_fast: bool,
    /// Election settle window and join phase timeout.
    pub election_timeout: Duration,
}

impl ControllerConfig {
    /// Reasonable defaults for the given identity.
    #[must_use]
    pub fn new(node_uuid: &str, node_name: &str) -> Self {
        Self {
            node_uuid: node_uuid.to_string(),
            node_name: node_name.to_string(),
            fail_fast: false,
            election_timeout: Duration::from_secs(5),
        }
    }
}

/// Side effects the event loop must carry out, in order.
#[derive(Debug)]
pub enum Effect {
    /// Deliver a message to a peer (or broadcast when `to` is `None`).
    Send(PeerMessage),
    /// Hand an action to the local resource executor.
    LocalDispatch(Dispatch),
    /// Run the policy engine against the current CIB and feed
    /// [`Event::PolicyComputed`] back.
    ComputePolicy {
        /// Epoch the computation is based on.
        epoch: EpochTriple,
        /// Transition counter for the resulting graph.
        transition_id: u64,
    },
    /// Persist settled operation outcomes into `/cib/status` through a
    /// read-compute-write cycle.
    PersistCib {
        /// Outcome rows to append as operation history.
        records: Vec<OpRecord>,
    },
    /// Exit the process with the given code.
    Exit {
        /// Process exit code.
        code: i32,
    },
}

/// The per-node controller.
pub struct Controller {
    config: ControllerConfig,
    cib: Arc<dyn CibStore>,
    fsm: Fsm,
    election: Election,
    join: JoinCoordinator,
    executor: Option<TransitionExecutor>,
    pending_graph: Option<TransitionGraph>,
    dedupe: DedupeWindow,
    /// uuid → name of known peers.
    peers: BTreeMap<String, String>,
    election_deadline: Option<Instant>,
    abort_reason: AbortReason,
    transition_counter: u64,
    reference_counter: u64,
    queued_inputs: VecDeque<Input>,
}

impl Controller {
    /// Creates a controller around the given CIB seam.
    #[must_use]
    pub fn new(config: ControllerConfig, cib: Arc<dyn CibStore>) -> Self {
        Self {
            config,
            cib,
            fsm: Fsm::new(),
            election: Election::new(""),
            join: JoinCoordinator::new(Duration::from_secs(5)),
            executor: None,
            pending_graph: None,
            dedupe: DedupeWindow::new(1024),
            peers: BTreeMap::new(),
            election_deadline: None,
            abort_reason: AbortReason::OperatorRequest,
            transition_counter: 0,
            reference_counter: 0,
            queued_inputs: VecDeque::new(),
        }
    }

    /// Current FSM state.
    #[must_use]
    pub fn state(&self) -> State {
        self.fsm.state()
    }

    /// True while this node carries DC duties.
    #[must_use]
    pub fn is_dc(&self) -> bool {
        matches!(
            self.fsm.state(),
            State::Integration
                | State::FinalizeJoin
                | State::PolicyEngine
                | State::TransitionEngine
                | State::Idle
        )
    }

    /// The executor of the in-flight transition, if one is running.
    #[must_use]
    pub fn executor(&self) -> Option<&TransitionExecutor> {
        self.executor.as_ref()
    }

    /// Consumes one event and returns the effects to carry out.
    pub fn handle_event(&mut self, event: Event, now: Instant) -> Vec<Effect> {
        match event {
            Event::Startup => {
                self.election = Election::new(&self.config.node_uuid);
                let mut effects = self.feed(Input::Startup, now);
                effects.extend(self.feed(Input::Election, now));
                effects
            }
            Event::NodeJoin { uuid, name } => {
                self.peers.insert(uuid, name);
                self.feed(Input::NodeJoin, now)
            }
            Event::NodeLeft { uuid } => {
                self.peers.remove(&uuid);
                self.abort_reason = AbortReason::MembershipChanged;
                self.feed(Input::NodeLeft, now)
            }
            Event::CibUpdated { epoch } => {
                tracing::debug!(?epoch, "cib updated");
                self.abort_reason = AbortReason::CibChanged;
                self.feed(Input::CibUpdate, now)
            }
            Event::PolicyComputed { graph } => {
                self.pending_graph = Some(*graph);
                self.feed(Input::PeSuccess, now)
            }
            Event::PolicyFailed { error } => {
                tracing::error!(%error, event = "policy-failure", "policy engine failed; recovering");
                let mut effects = self.feed(Input::Error, now);
                // Recovery re-synchronizes through a fresh election
                // (unless fail-fast already asked for the exit).
                if !self.config.fail_fast {
                    effects.extend(self.feed(Input::Election, now));
                }
                effects
            }
            Event::ActionResult { synapse, ok } => self.on_action_result(synapse, ok, now),
            Event::Tick => self.on_tick(now),
            Event::Shutdown => {
                let mut effects = self.feed(Input::Shutdown, now);
                if self.drained() {
                    effects.extend(self.feed(Input::Stop, now));
                }
                effects
            }
            Event::Peer(msg) => self.on_peer(msg, now),
        }
    }

    fn drained(&self) -> bool {
        self.executor.as_ref().is_none_or(TransitionExecutor::is_settled)
    }

    fn on_action_result(&mut self, synapse: u32, ok: bool, now: Instant) -> Vec<Effect> {
        let Some(executor) = self.executor.as_mut() else {
            tracing::warn!(synapse, event = "orphan-action-result", "no transition in flight");
            return Vec::new();
        };
        match executor.record_result(synapse, ok) {
            Progress::Complete => {
                let records = self
                    .executor
                    .take()
                    .map(|exec| op_records(&exec))
                    .unwrap_or_default();
                let mut effects = Vec::new();
                if !records.is_empty() {
                    effects.push(Effect::PersistCib { records });
                }
                effects.extend(self.feed(Input::TeSuccess, now));
                effects
            }
            Progress::Abort(reason) => {
                executor.abort(reason);
                self.abort_reason = reason;
                let mut effects = self.persist_outcomes();
                effects.extend(self.feed(Input::Fail, now));
                effects
            }
            Progress::Continue => {
                let dispatches = executor.pump(now);
                let mut effects = self.dispatch_effects(dispatches);
                if self.fsm.state() == State::Stopping && self.drained() {
                    effects.extend(self.feed(Input::Stop, now));
                }
                effects
            }
        }
    }

    /// Effects persisting whatever the current executor has settled so
    /// far; empty when there is nothing to record.
    fn persist_outcomes(&self) -> Vec<Effect> {
        let records = self
            .executor
            .as_ref()
            .map(op_records)
            .unwrap_or_default();
        if records.is_empty() {
            Vec::new()
        } else {
            vec![Effect::PersistCib { records }]
        }
    }

    fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        // Settle an open election once the window closes.
        if let Some(deadline) = self.election_deadline {
            if now >= deadline && self.fsm.state() == State::Election {
                self.election_deadline = None;
                let input = if self.election.settle() {
                    Input::ElectionDc
                } else {
                    Input::NotDc
                };
                effects.extend(self.feed(input, now));
            }
        }
        // Join phases that expired re-enter election.
        if self.is_dc() && !self.join.expired(now).is_empty() {
            effects.extend(self.feed(Input::Election, now));
        }
        // Executor deadlines.
        if let Some(executor) = self.executor.as_mut() {
            if let Progress::Abort(reason) = executor.poll_timeouts(now) {
                executor.abort(reason);
                self.abort_reason = reason;
                effects.extend(self.persist_outcomes());
                effects.extend(self.feed(Input::Fail, now));
            }
        }
        effects
    }

    fn on_peer(&mut self, msg: PeerMessage, now: Instant) -> Vec<Effect> {
        if !self.dedupe.accept(&msg.reference) {
            tracing::debug!(reference = %msg.reference, "duplicate peer message dropped");
            return Vec::new();
        }
        match msg.subtype {
            PeerSubtype::Vote => match self.election.consider_ballot(&msg.from) {
                VoteReaction::Veto => {
                    vec![Effect::Send(self.message(
                        Some(&msg.from),
                        PeerSubtype::NoVote,
                        String::new(),
                    ))]
                }
                VoteReaction::Concede => self.feed(Input::NotDc, now),
            },
            PeerSubtype::NoVote => {
                self.election.record_veto(&msg.from);
                self.feed(Input::NotDc, now)
            }
            PeerSubtype::JoinAnnounce => {
                if self.is_dc() {
                    self.join.offered(&msg.from, now);
                    let (epoch, _) = self.cib.snapshot();
                    let payload = format!(
                        r#"<join_offer admin_epoch="{}" epoch="{}" num_updates="{}"/>"#,
                        epoch.admin_epoch, epoch.epoch, epoch.num_updates
                    );
                    vec![Effect::Send(self.message(
                        Some(&msg.from),
                        PeerSubtype::JoinOffer,
                        payload,
                    ))]
                } else {
                    Vec::new()
                }
            }
            PeerSubtype::JoinOffer => {
                let mut effects = self.feed(Input::JoinOffer, now);
                effects.push(Effect::Send(self.message(
                    Some(&msg.from),
                    PeerSubtype::JoinRequest,
                    "<local_state/>".to_string(),
                )));
                effects
            }
            PeerSubtype::JoinRequest => {
                if self.is_dc() {
                    self.join.requested(&msg.from, now);
                    let mut effects = self.feed(Input::JoinRequest, now);
                    if self.join.integrated() {
                        effects.extend(self.feed(Input::JoinResult, now));
                        effects.extend(self.feed(Input::PeCalc, now));
                    }
                    effects
                } else {
                    Vec::new()
                }
            }
            PeerSubtype::JoinAck => {
                tracing::info!(from = %msg.from, "join acknowledged");
                Vec::new()
            }
            PeerSubtype::RscOpResult => {
                let ok = msg.payload_xml.contains(r#"rc-code="0""#);
                match parse_reference(&msg.reference) {
                    Some((transition, synapse)) if transition == self.transition_counter => {
                        self.on_action_result(synapse, ok, now)
                    }
                    Some((transition, _)) => {
                        tracing::debug!(
                            transition,
                            current = self.transition_counter,
                            "result for a superseded transition dropped"
                        );
                        Vec::new()
                    }
                    None => {
                        tracing::warn!(reference = %msg.reference, "unparsable result reference");
                        Vec::new()
                    }
                }
            }
            PeerSubtype::ShutdownRequest => self.feed(Input::Shutdown, now),
            PeerSubtype::RscOpRequest | PeerSubtype::Ping => Vec::new(),
        }
    }

    /// Feeds one FSM input (plus any follow-ups it queues) and executes
    /// the resulting action sets.
    fn feed(&mut self, input: Input, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.queued_inputs.push_back(input);
        while let Some(next) = self.queued_inputs.pop_front() {
            let outcome = self.fsm.handle(next);
            if outcome.to == State::Recovery && self.config.fail_fast {
                tracing::error!(event = "fail-fast", "recovery suppressed by PCMK_fail_fast");
                effects.push(Effect::Exit { code: 70 });
                return effects;
            }
            for action in outcome.actions.clone() {
                effects.extend(self.run_action(action, now));
            }
        }
        effects
    }

    #[allow(clippy::too_many_lines)]
    fn run_action(&mut self, action: FsmAction, now: Instant) -> Vec<Effect> {
        match action {
            FsmAction::Log => {
                tracing::info!(state = %self.fsm.state(), "transition action set");
                Vec::new()
            }
            FsmAction::StartElection => {
                let round = self.election.open_round();
                self.election_deadline = Some(now + self.config.election_timeout);
                let payload = format!(r#"<vote round="{round}"/>"#);
                vec![Effect::Send(self.message(None, PeerSubtype::Vote, payload))]
            }
            FsmAction::DcTakeover => {
                tracing::info!(uuid = %self.config.node_uuid, event = "dc-takeover", "assumed DC duties");
                self.join = JoinCoordinator::new(self.config.election_timeout);
                // A single-node cluster has nobody to integrate; proceed
                // straight to the policy engine.
                if self.peers.is_empty() {
                    self.queued_inputs.push_back(Input::JoinResult);
                    self.queued_inputs.push_back(Input::PeCalc);
                }
                Vec::new()
            }
            FsmAction::DcRelease => {
                self.pending_graph = None;
                Vec::new()
            }
            FsmAction::JoinAnnounce => {
                vec![Effect::Send(self.message(
                    None,
                    PeerSubtype::JoinAnnounce,
                    String::new(),
                ))]
            }
            FsmAction::JoinOfferAll => {
                let (epoch, _) = self.cib.snapshot();
                let payload = format!(
                    r#"<join_offer admin_epoch="{}" epoch="{}" num_updates="{}"/>"#,
                    epoch.admin_epoch, epoch.epoch, epoch.num_updates
                );
                let peers: Vec<String> = self.peers.keys().cloned().collect();
                peers
                    .into_iter()
                    .map(|uuid| {
                        self.join.offered(&uuid, now);
                        Effect::Send(self.message(
                            Some(&uuid),
                            PeerSubtype::JoinOffer,
                            payload.clone(),
                        ))
                    })
                    .collect()
            }
            FsmAction::IntegrateJoin => Vec::new(),
            FsmAction::JoinAckAll => {
                self.join.ack_all(now);
                vec![Effect::Send(self.message(
                    None,
                    PeerSubtype::JoinAck,
                    String::new(),
                ))]
            }
            FsmAction::PeInvoke => {
                let (epoch, _) = self.cib.snapshot();
                self.transition_counter += 1;
                vec![Effect::ComputePolicy {
                    epoch,
                    transition_id: self.transition_counter,
                }]
            }
            FsmAction::TeInvoke => {
                let Some(graph) = self.pending_graph.take() else {
                    tracing::warn!(event = "te-invoke-without-graph", "nothing to execute");
                    self.queued_inputs.push_back(Input::TeSuccess);
                    return Vec::new();
                };
                let mut executor = TransitionExecutor::new(graph, &self.config.node_name);
                let dispatches = executor.pump(now);
                if executor.succeeded() {
                    // Graph of pure pseudo-events (nothing to do).
                    self.queued_inputs.push_back(Input::TeSuccess);
                    return Vec::new();
                }
                self.executor = Some(executor);
                self.dispatch_effects(dispatches)
            }
            FsmAction::TeCancel => {
                let mut effects = Vec::new();
                if let Some(executor) = self.executor.as_mut() {
                    executor.abort(self.abort_reason);
                    effects = self.persist_outcomes();
                    // In-flight actions have no cancel; keep the executor
                    // around until they drain.
                    if self
                        .executor
                        .as_ref()
                        .is_some_and(TransitionExecutor::is_settled)
                    {
                        self.executor = None;
                    }
                }
                effects
            }
            FsmAction::ShutdownReq => {
                vec![Effect::Send(self.message(
                    None,
                    PeerSubtype::ShutdownRequest,
                    String::new(),
                ))]
            }
            FsmAction::Exit1 => vec![Effect::Exit { code: 0 }],
        }
    }

    fn dispatch_effects(&mut self, dispatches: Vec<Dispatch>) -> Vec<Effect> {
        dispatches
            .into_iter()
            .map(|dispatch| match &dispatch.target {
                DispatchTarget::Local => Effect::LocalDispatch(dispatch),
                DispatchTarget::Peer(node_name) => {
                    let uuid = self
                        .peers
                        .iter()
                        .find(|(_, name)| *name == node_name)
                        .map(|(uuid, _)| uuid.clone());
                    let reference = synapse_reference(
                        self.transition_counter,
                        dispatch.synapse,
                    );
                    let payload = format!(
                        r#"<rsc_op operation_key="{}" on_node="{}"/>"#,
                        dispatch.action.uuid,
                        dispatch.action.on_node.as_deref().unwrap_or_default()
                    );
                    let mut msg = PeerMessage::crmd(
                        &self.config.node_uuid,
                        uuid.as_deref(),
                        PeerSubtype::RscOpRequest,
                        &reference,
                    );
                    msg.payload_xml = payload;
                    Effect::Send(msg)
                }
            })
            .collect()
    }

    fn message(&mut self, to: Option<&str>, subtype: PeerSubtype, payload: String) -> PeerMessage {
        self.reference_counter += 1;
        let reference = format!("{}-{}", self.config.node_uuid, self.reference_counter);
        PeerMessage::crmd(&self.config.node_uuid, to, subtype, &reference)
            .with_payload(&payload)
    }
}

/// Terminal outcomes of a transition's concrete actions, as operation
/// history rows for `/cib/status`. Pending and discarded synapses never
/// ran, so they leave no history.
fn op_records(executor: &TransitionExecutor) -> Vec<OpRecord> {
    executor
        .graph()
        .synapses
        .iter()
        .filter_map(|syn| {
            if syn.action.kind != GraphActionKind::RscOp {
                return None;
            }
            let rc_code = match executor.state(syn.id) {
                SynapseState::Confirmed => 0,
                SynapseState::Failed | SynapseState::TimedOut => 1,
                _ => return None,
            };
            Some(OpRecord {
                node: syn.action.on_node.clone()?,
                rsc: syn.action.rsc.clone()?,
                operation: syn.action.task.clone(),
                rc_code,
            })
        })
        .collect()
}

/// Formats the reference of a remote action request: `t<id>-s<synapse>`.
#[must_use]
pub fn synapse_reference(transition_id: u64, synapse: u32) -> String {
    format!("t{transition_id}-s{synapse}")
}

/// Parses `(transition_id, synapse)` out of a `t<id>-s<synapse>` reference.
#[must_use]
pub fn parse_reference(reference: &str) -> Option<(u64, u32)> {
    let (head, tail) = reference.rsplit_once("-s")?;
    let transition = head.strip_prefix('t')?.parse().ok()?;
    Some((transition, tail.parse().ok()?))
}
