//! Action synthesis.
//!
//! Translates the allocator's decisions into concrete actions, the
//! pseudo-action milestones that wrap collectives, and the structural
//! ordering edges between them. Configuration-driven edges are added
//! afterwards by the ordering pass.

use indexmap::IndexMap;
use steward_core::{ActionTask, NodeUuid, ResourceId};
use steward_graph::{Action, NotifyPhase};
use steward_state::{OrderKind, Resource, RscRole, Variant, WorkingSet};
use tracing::{debug, warn};

/// An ordering edge between two synthesized actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderEdge {
    /// Action that must complete first
    pub first: u32,
    /// Action gated on it
    pub then: u32,
    /// Propagation semantics
    pub kind: OrderKind,
}

/// The scheduler run's action arena plus its ordering edges
#[derive(Debug, Default)]
pub struct ActionSet {
    /// Actions; `Action.id` is the arena index
    pub actions: Vec<Action>,
    /// Ordering edges
    pub edges: Vec<OrderEdge>,
    index: IndexMap<String, u32>,
    by_rsc: IndexMap<String, Vec<u32>>,
}

impl ActionSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action, assigning its arena id
    pub fn add(&mut self, mut action: Action) -> u32 {
        let id = self.actions.len() as u32;
        action.id = id;
        self.index.insert(action.key.clone(), id);
        if let Some(rsc) = &action.rsc {
            self.by_rsc.entry(rsc.clone()).or_default().push(id);
        }
        self.actions.push(action);
        id
    }

    /// Action by arena id
    ///
    /// # Panics
    ///
    /// Panics if the id is not from this arena
    #[must_use]
    pub fn get(&self, id: u32) -> &Action {
        &self.actions[id as usize]
    }

    /// Mutable action by arena id
    ///
    /// # Panics
    ///
    /// Panics if the id is not from this arena
    pub fn get_mut(&mut self, id: u32) -> &mut Action {
        &mut self.actions[id as usize]
    }

    /// Action id by key
    #[must_use]
    pub fn find(&self, key: &str) -> Option<u32> {
        self.index.get(key).copied()
    }

    /// First action for a resource with the given task
    #[must_use]
    pub fn find_task(&self, rsc: &str, task: ActionTask) -> Option<u32> {
        self.by_rsc.get(rsc).and_then(|ids| {
            ids.iter()
                .find(|id| self.actions[**id as usize].task == task)
                .copied()
        })
    }

    /// All action ids for a resource
    #[must_use]
    pub fn actions_for(&self, rsc: &str) -> &[u32] {
        self.by_rsc.get(rsc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add an ordering edge
    pub fn order(&mut self, first: u32, then: u32, kind: OrderKind) {
        self.edges.push(OrderEdge { first, then, kind });
    }
}

/// Per-child activity summary used to seed collective pseudo flags
#[derive(Debug, Default, Clone, Copy)]
struct ChildState {
    starting: bool,
    stopping: bool,
    restarting: bool,
    active: bool,
    any_start_runnable: bool,
    any_stop_runnable: bool,
}

/// Synthesize the action set for an assigned working set
#[must_use]
pub fn synthesize(ws: &WorkingSet) -> ActionSet {
    let mut set = ActionSet::new();

    // Concrete actions for every primitive first
    for index in 0..ws.resources.len() {
        let id = ResourceId::new(index as u32);
        if ws.resource(id).as_primitive().is_some() {
            primitive_actions(ws, id, &mut set);
        }
    }

    // Milestones and structure for collectives afterwards, so child
    // actions exist to be summarized
    for index in 0..ws.resources.len() {
        let id = ResourceId::new(index as u32);
        if ws.resource(id).is_collective() {
            collective_actions(ws, id, &mut set);
        }
    }

    set
}

fn node_name(ws: &WorkingSet, uuid: NodeUuid) -> String {
    ws.node(uuid)
        .map(|n| n.name.clone())
        .unwrap_or_else(|| uuid.to_string())
}

fn op_timeout(rsc: &Resource, task: ActionTask) -> u64 {
    rsc.as_primitive()
        .and_then(|p| {
            p.operations
                .iter()
                .find(|op| op.task == task && op.interval_ms == 0)
                .map(|op| op.timeout_ms)
        })
        .unwrap_or(Action::DEFAULT_TIMEOUT_MS)
}

fn primitive_actions(ws: &WorkingSet, rsc_id: ResourceId, set: &mut ActionSet) {
    let rsc = ws.resource(rsc_id);
    let Some(prim) = rsc.as_primitive() else { return };

    if !rsc.flags.managed {
        debug!(resource = %rsc.id, "unmanaged, leaving as-is");
        return;
    }
    if rsc.flags.blocked {
        warn!(resource = %rsc.id, event = "resource-blocked", "blocked by failure policy");
        return;
    }

    let next_role = prim.next_role.unwrap_or(RscRole::Stopped);
    let next = prim.next_node;
    let current = prim.current_node();
    let active = prim.role.is_active() && current.is_some();

    let moving = active && next.is_some() && next != current;
    let stopping =
        active && (next_role == RscRole::Stopped || next.is_none() || moving || rsc.flags.failed);
    let starting =
        next_role.is_active() && next.is_some() && (!active || moving || rsc.flags.failed);

    let allow_migrate = rsc.meta.get("allow-migrate").map(String::as_str) == Some("true");

    // Demote precedes any teardown of a promoted instance
    let mut demote = None;
    if prim.role == RscRole::Promoted && (stopping || next_role != RscRole::Promoted) {
        if let Some(node) = current {
            let action = Action::new(0, &rsc.id, ActionTask::Demote, 0)
                .on_node(&node_name(ws, node), node)
                .with_timeout(op_timeout(rsc, ActionTask::Demote));
            demote = Some(set.add(action));
        }
    }

    let mut stops = Vec::new();
    if stopping {
        for node in &prim.running_on {
            let action = Action::new(0, &rsc.id, ActionTask::Stop, 0)
                .on_node(&node_name(ws, *node), *node)
                .with_timeout(op_timeout(rsc, ActionTask::Stop));
            let stop = set.add(action);
            if let Some(demote) = demote {
                set.order(demote, stop, OrderKind::mandatory());
            }
            stops.push(stop);
        }
    }

    let mut start = None;
    if starting {
        if let Some(node) = next {
            let mut action = Action::new(0, &rsc.id, ActionTask::Start, 0)
                .on_node(&node_name(ws, node), node)
                .with_timeout(op_timeout(rsc, ActionTask::Start));
            action.flags.migrate_runnable = allow_migrate && moving && !rsc.flags.failed;
            let start_id = set.add(action);
            for stop in &stops {
                set.order(*stop, start_id, OrderKind::mandatory());
            }
            start = Some(start_id);
        }
    }

    if next_role == RscRole::Promoted && (starting || prim.role == RscRole::Unpromoted) {
        if let Some(node) = next.or(current) {
            let action = Action::new(0, &rsc.id, ActionTask::Promote, 0)
                .on_node(&node_name(ws, node), node)
                .with_timeout(op_timeout(rsc, ActionTask::Promote));
            let promote = set.add(action);
            if let Some(start) = start {
                set.order(start, promote, OrderKind::mandatory());
            }
        }
    }

    // Recurring monitors accompany a fresh placement
    if starting {
        if let Some(node) = next {
            for op in &prim.operations {
                if op.interval_ms == 0 {
                    continue;
                }
                let action = Action::new(0, &rsc.id, op.task, op.interval_ms)
                    .on_node(&node_name(ws, node), node)
                    .with_timeout(op.timeout_ms);
                let monitor = set.add(action);
                if let Some(start) = start {
                    set.order(start, monitor, OrderKind::mandatory());
                }
            }
        }
    }
}

fn child_state(ws: &WorkingSet, children: &[ResourceId], set: &ActionSet) -> ChildState {
    let mut state = ChildState::default();
    for child in children {
        let rsc = ws.resource(*child);
        let mut child_starting = false;
        let mut child_stopping = false;
        if let Some(prim) = rsc.as_primitive() {
            if !prim.running_on.is_empty() {
                state.active = true;
            }
        }
        for id in set.actions_for(&rsc.id) {
            let action = set.get(*id);
            if action.flags.optional {
                continue;
            }
            match action.task {
                ActionTask::Start => {
                    child_starting = true;
                    state.any_start_runnable |= action.flags.runnable;
                }
                ActionTask::Stop => {
                    child_stopping = true;
                    state.any_stop_runnable |= action.flags.runnable;
                }
                _ => {}
            }
        }
        state.starting |= child_starting;
        state.stopping |= child_stopping;
        state.restarting |= child_starting && child_stopping;
    }
    state
}

fn collective_actions(ws: &WorkingSet, rsc_id: ResourceId, set: &mut ActionSet) {
    let rsc = ws.resource(rsc_id);
    let children: Vec<ResourceId> = rsc.children().to_vec();
    if children.is_empty() {
        return;
    }
    let state = child_state(ws, &children, set);

    let mut start0 = Action::pseudo(0, &rsc.id, ActionTask::Start);
    start0.flags.optional = !state.starting;
    start0.flags.runnable = !state.starting || state.any_start_runnable;
    let start0 = set.add(start0);

    let mut running0 = Action::pseudo(0, &rsc.id, ActionTask::Started);
    running0.priority = Action::MILESTONE_PRIORITY;
    running0.flags.optional = !state.starting;
    running0.flags.runnable = state.active || state.any_start_runnable;
    let running0 = set.add(running0);

    let mut stop0 = Action::pseudo(0, &rsc.id, ActionTask::Stop);
    stop0.flags.optional = !state.stopping;
    stop0.flags.runnable = !state.stopping || state.any_stop_runnable;
    stop0.flags.migrate_runnable = !state.restarting;
    let stop0 = set.add(stop0);

    let mut stopped0 = Action::pseudo(0, &rsc.id, ActionTask::Stopped);
    stopped0.priority = Action::MILESTONE_PRIORITY;
    stopped0.flags.optional = !state.stopping;
    stopped0.flags.runnable = !state.stopping || state.any_stop_runnable;
    let stopped0 = set.add(stopped0);

    set.order(start0, running0, OrderKind::OPTIONAL);
    set.order(stop0, stopped0, OrderKind::OPTIONAL);
    if state.stopping && state.starting {
        // Teardown completes before any rebuild begins
        set.order(stopped0, start0, OrderKind::OPTIONAL);
    }

    // Hub edges between milestones and child actions
    let ordered_group = matches!(rsc.variant, Variant::Group(_));
    let mut previous_start: Option<u32> = None;
    let mut previous_stop: Option<u32> = None;
    for child in &children {
        let child_id = ws.resource(*child).id.clone();
        if let Some(start) = set.find_task(&child_id, ActionTask::Start) {
            set.order(start0, start, OrderKind::mandatory());
            set.order(start, running0, OrderKind::OPTIONAL);
            if ordered_group {
                if let Some(previous) = previous_start {
                    set.order(previous, start, OrderKind::mandatory());
                }
                previous_start = Some(start);
            }
        }
        if let Some(stop) = set.find_task(&child_id, ActionTask::Stop) {
            set.order(stop0, stop, OrderKind::mandatory());
            set.order(stop, stopped0, OrderKind::OPTIONAL);
            if ordered_group {
                // Members stop in reverse order: this stop precedes
                // the previous (earlier) member's stop
                if let Some(previous) = previous_stop {
                    set.order(stop, previous, OrderKind::mandatory());
                }
                previous_stop = Some(stop);
            }
        }
    }

    if rsc.flags.notify {
        notify_chain(ws, rsc_id, set, &state, stop0, stopped0, start0, running0);
    }
}

#[allow(clippy::too_many_arguments)]
fn notify_chain(
    ws: &WorkingSet,
    rsc_id: ResourceId,
    set: &mut ActionSet,
    state: &ChildState,
    stop0: u32,
    stopped0: u32,
    start0: u32,
    running0: u32,
) {
    let rsc = ws.resource(rsc_id);
    let children: Vec<ResourceId> = rsc.children().to_vec();
    let meta = notify_meta(ws, &children, set);

    let mut stop_confirmed_post = None;
    if state.stopping {
        let chain = add_notify_phase(
            ws,
            set,
            &rsc.id,
            &children,
            &meta,
            ActionTask::Stop,
            ActionTask::Stopped,
        );
        // pre ... confirmed-pre precede the stop milestone; the post
        // wave follows completion
        set.order(chain.confirmed_pre, stop0, OrderKind::OPTIONAL);
        set.order(stopped0, chain.post, OrderKind::OPTIONAL);
        stop_confirmed_post = Some(chain.confirmed_post);
    }

    if state.starting {
        let chain = add_notify_phase(
            ws,
            set,
            &rsc.id,
            &children,
            &meta,
            ActionTask::Start,
            ActionTask::Started,
        );
        set.order(chain.confirmed_pre, start0, OrderKind::OPTIONAL);
        set.order(running0, chain.post, OrderKind::OPTIONAL);
        if let Some(previous) = stop_confirmed_post {
            set.order(previous, chain.pre, OrderKind::OPTIONAL);
        }
    }
}

struct NotifyChain {
    pre: u32,
    confirmed_pre: u32,
    post: u32,
    confirmed_post: u32,
}

fn add_notify_phase(
    ws: &WorkingSet,
    set: &mut ActionSet,
    collective: &str,
    children: &[ResourceId],
    meta: &IndexMap<String, String>,
    op: ActionTask,
    milestone: ActionTask,
) -> NotifyChain {
    let make_pseudo = |set: &mut ActionSet, phase: NotifyPhase, key_op: ActionTask, confirmed: bool| {
        let mut action = Action::notify(0, collective, phase, key_op, confirmed);
        action.flags.pseudo = true;
        action.meta = meta.clone();
        action
            .meta
            .insert("CRM_meta_notify_type".to_string(), phase.as_str().to_string());
        action
            .meta
            .insert("CRM_meta_notify_operation".to_string(), op.as_str().to_string());
        set.add(action)
    };

    let pre = make_pseudo(set, NotifyPhase::Pre, op, false);
    let confirmed_pre = make_pseudo(set, NotifyPhase::Pre, op, true);
    let post = make_pseudo(set, NotifyPhase::Post, milestone, false);
    let confirmed_post = make_pseudo(set, NotifyPhase::Post, milestone, true);

    set.order(pre, confirmed_pre, OrderKind::OPTIONAL);
    set.order(post, confirmed_post, OrderKind::OPTIONAL);

    // Concrete notifications run on every active instance
    for child in children {
        let child_rsc = ws.resource(*child);
        let Some(prim) = child_rsc.as_primitive() else {
            continue;
        };
        for node in &prim.running_on {
            let name = node_name(ws, *node);
            let mut pre_action =
                Action::notify(0, &child_rsc.id, NotifyPhase::Pre, op, false).on_node(&name, *node);
            pre_action.meta = set.get(pre).meta.clone();
            let pre_instance = set.add(pre_action);
            set.order(pre, pre_instance, OrderKind::OPTIONAL);
            set.order(pre_instance, confirmed_pre, OrderKind::OPTIONAL);

            // The post wave only notifies instances that survive a
            // teardown
            if op == ActionTask::Stop && stop_planned(set, &child_rsc.id) {
                continue;
            }
            let mut post_action = Action::notify(0, &child_rsc.id, NotifyPhase::Post, milestone, false)
                .on_node(&name, *node);
            post_action.meta = set.get(post).meta.clone();
            let post_instance = set.add(post_action);
            set.order(post, post_instance, OrderKind::OPTIONAL);
            set.order(post_instance, confirmed_post, OrderKind::OPTIONAL);
        }
    }

    NotifyChain {
        pre,
        confirmed_pre,
        post,
        confirmed_post,
    }
}

fn stop_planned(set: &ActionSet, rsc: &str) -> bool {
    set.find_task(rsc, ActionTask::Stop).is_some()
}

fn notify_meta(
    ws: &WorkingSet,
    children: &[ResourceId],
    set: &ActionSet,
) -> IndexMap<String, String> {
    let mut active_rsc = Vec::new();
    let mut active_uname = Vec::new();
    let mut stop_rsc = Vec::new();
    let mut stop_uname = Vec::new();
    let mut start_rsc = Vec::new();
    let mut start_uname = Vec::new();

    for child in children {
        let rsc = ws.resource(*child);
        let Some(prim) = rsc.as_primitive() else { continue };
        for node in &prim.running_on {
            active_rsc.push(rsc.id.clone());
            active_uname.push(node_name(ws, *node));
        }
        if let Some(stop) = set.find_task(&rsc.id, ActionTask::Stop) {
            stop_rsc.push(rsc.id.clone());
            if let Some(node) = &set.get(stop).node {
                stop_uname.push(node.clone());
            }
        }
        if let Some(start) = set.find_task(&rsc.id, ActionTask::Start) {
            start_rsc.push(rsc.id.clone());
            if let Some(node) = &set.get(start).node {
                start_uname.push(node.clone());
            }
        }
    }

    let mut meta = IndexMap::new();
    meta.insert("CRM_meta_notify_active_resource".to_string(), active_rsc.join(" "));
    meta.insert("CRM_meta_notify_active_uname".to_string(), active_uname.join(" "));
    meta.insert("CRM_meta_notify_stop_resource".to_string(), stop_rsc.join(" "));
    meta.insert("CRM_meta_notify_stop_uname".to_string(), stop_uname.join(" "));
    meta.insert("CRM_meta_notify_start_resource".to_string(), start_rsc.join(" "));
    meta.insert("CRM_meta_notify_start_uname".to_string(), start_uname.join(" "));
    meta
}
