//! Wire-compatible XML encoding of transition graphs.
//!
//! Root element `<transition_graph>`, one `<synapse>` per vertex,
//! each with exactly one `<action_set>` holding a `<rsc_op>`,
//! `<pseudo_event>` or `<crm_event>`, and at most one `<inputs>`
//! block of `<trigger>` references. Attribute order within an
//! element is not significant.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::io::Cursor;
use steward_core::{ActionTask, NodeUuid, TransitionId};
use steward_state::cib::{parse_tree, Element};

use crate::action::{Action, ActionFlags};
use crate::graph::TransitionGraph;

/// Encoding or decoding failure
#[derive(Debug, thiserror::Error)]
pub enum GraphXmlError {
    /// Malformed XML or unexpected structure
    #[error("graph XML parse error: {0}")]
    Parse(String),

    /// Serialization failure
    #[error("graph XML write error: {0}")]
    Write(String),

    /// A required attribute was absent
    #[error("missing attribute {attr} on <{element}>")]
    MissingAttr {
        /// Element the attribute was expected on
        element: String,
        /// The missing attribute
        attr: String,
    },
}

/// Implicit `CRM_meta_*` keys derived from action fields rather than
/// the free-form meta map
const IMPLICIT_META: [&str; 6] = [
    "CRM_meta_on_node",
    "CRM_meta_on_node_uuid",
    "CRM_meta_timeout",
    "CRM_meta_interval",
    "CRM_meta_name",
    "CRM_meta_migrate_runnable",
];

fn action_element_name(action: &Action) -> &'static str {
    if action.flags.pseudo {
        "pseudo_event"
    } else if action.task == ActionTask::Fence {
        "crm_event"
    } else {
        "rsc_op"
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), GraphXmlError> {
    writer
        .write_event(event)
        .map_err(|e| GraphXmlError::Write(e.to_string()))
}

fn write_action(writer: &mut XmlWriter, action: &Action) -> Result<(), GraphXmlError> {
    let name = action_element_name(action);
    let mut start = BytesStart::new(name);
    start.push_attribute(("id", action.id.to_string().as_str()));
    start.push_attribute(("operation", action.task.as_str()));
    start.push_attribute(("operation_key", action.key.as_str()));
    if let Some(rsc) = &action.rsc {
        start.push_attribute(("rsc", rsc.as_str()));
    }
    if let Some(node) = &action.node {
        start.push_attribute(("on_node", node.as_str()));
    }
    if let Some(uuid) = &action.node_uuid {
        start.push_attribute(("on_node_uuid", uuid.to_string().as_str()));
    }
    emit(writer, Event::Start(start))?;

    let mut attributes = BytesStart::new("attributes");
    let mut wire = action.wire_meta();
    if action.flags.migrate_runnable {
        wire.insert("CRM_meta_migrate_runnable".to_string(), "true".to_string());
    }
    for (key, value) in &wire {
        attributes.push_attribute((key.as_str(), value.as_str()));
    }
    emit(writer, Event::Empty(attributes))?;

    emit(writer, Event::End(BytesEnd::new(name)))
}

fn write_trigger(writer: &mut XmlWriter, action: &Action) -> Result<(), GraphXmlError> {
    let name = action_element_name(action);
    let mut start = BytesStart::new(name);
    start.push_attribute(("id", action.id.to_string().as_str()));
    start.push_attribute(("operation", action.task.as_str()));
    start.push_attribute(("operation_key", action.key.as_str()));
    emit(writer, Event::Empty(start))
}

/// Serialize a graph to its wire XML
///
/// # Errors
///
/// Returns error if a trigger references an action no synapse
/// produces
pub fn to_xml(graph: &TransitionGraph) -> Result<String, GraphXmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("transition_graph");
    root.push_attribute(("cluster-delay", graph.cluster_delay_ms.to_string().as_str()));
    root.push_attribute((
        "stonith-timeout",
        graph.stonith_timeout_ms.to_string().as_str(),
    ));
    root.push_attribute(("failed-stop-offset", graph.failed_stop_offset.as_str()));
    root.push_attribute(("failed-start-offset", graph.failed_start_offset.as_str()));
    root.push_attribute(("transition_id", graph.transition_id.to_string().as_str()));
    emit(&mut writer, Event::Start(root))?;

    for synapse in &graph.synapses {
        let mut syn = BytesStart::new("synapse");
        syn.push_attribute(("id", synapse.id.to_string().as_str()));
        syn.push_attribute(("priority", synapse.priority.to_string().as_str()));
        emit(&mut writer, Event::Start(syn))?;

        emit(&mut writer, Event::Start(BytesStart::new("action_set")))?;
        write_action(&mut writer, &synapse.action)?;
        emit(&mut writer, Event::End(BytesEnd::new("action_set")))?;

        if !synapse.inputs.is_empty() {
            emit(&mut writer, Event::Start(BytesStart::new("inputs")))?;
            for input in &synapse.inputs {
                let producer = graph.synapse_for_action(*input).ok_or_else(|| {
                    GraphXmlError::Write(format!("trigger references unknown action {input}"))
                })?;
                emit(&mut writer, Event::Start(BytesStart::new("trigger")))?;
                write_trigger(&mut writer, &producer.action)?;
                emit(&mut writer, Event::End(BytesEnd::new("trigger")))?;
            }
            emit(&mut writer, Event::End(BytesEnd::new("inputs")))?;
        }

        emit(&mut writer, Event::End(BytesEnd::new("synapse")))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("transition_graph")))?;
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| GraphXmlError::Write(e.to_string()))
}

fn require<'a>(element: &'a Element, attr: &str) -> Result<&'a str, GraphXmlError> {
    element.attr(attr).ok_or_else(|| GraphXmlError::MissingAttr {
        element: element.name.clone(),
        attr: attr.to_string(),
    })
}

fn parse_action(element: &Element, priority: i32) -> Result<Action, GraphXmlError> {
    let id: u32 = require(element, "id")?
        .parse()
        .map_err(|_| GraphXmlError::Parse("bad action id".to_string()))?;
    let task = ActionTask::parse(require(element, "operation")?)
        .map_err(|e| GraphXmlError::Parse(e.to_string()))?;
    let key = require(element, "operation_key")?.to_string();

    let mut action = Action::new(id, "placeholder", task, 0);
    action.key = key;
    action.rsc = element.attr("rsc").map(str::to_string);
    action.node = element.attr("on_node").map(str::to_string);
    action.node_uuid = element
        .attr("on_node_uuid")
        .and_then(|v| NodeUuid::parse(v).ok());
    action.priority = priority;
    action.flags = ActionFlags {
        pseudo: element.name == "pseudo_event",
        ..ActionFlags::default()
    };

    if let Some(attributes) = element.child("attributes") {
        for (name, value) in &attributes.attrs {
            match name.as_str() {
                "CRM_meta_timeout" => {
                    action.timeout_ms = value.parse().unwrap_or(Action::DEFAULT_TIMEOUT_MS);
                }
                "CRM_meta_interval" => {
                    action.interval_ms = value.parse().unwrap_or(0);
                }
                "CRM_meta_migrate_runnable" => {
                    action.flags.migrate_runnable = value == "true";
                }
                _ if IMPLICIT_META.contains(&name.as_str()) => {}
                _ => {
                    action.meta.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Ok(action)
}

/// Parse a graph from its wire XML
///
/// # Errors
///
/// Returns error on malformed XML or schema violations
pub fn from_xml(xml: &str) -> Result<TransitionGraph, GraphXmlError> {
    let root = parse_tree(xml).map_err(|e| GraphXmlError::Parse(e.to_string()))?;
    if root.name != "transition_graph" {
        return Err(GraphXmlError::Parse(format!(
            "expected <transition_graph>, got <{}>",
            root.name
        )));
    }

    let mut graph = TransitionGraph::new(TransitionId::from_u64(
        root.attr("transition_id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    ));
    graph.cluster_delay_ms = root
        .attr("cluster-delay")
        .and_then(|v| v.parse().ok())
        .unwrap_or(60_000);
    graph.stonith_timeout_ms = root
        .attr("stonith-timeout")
        .and_then(|v| v.parse().ok())
        .unwrap_or(60_000);
    if let Some(v) = root.attr("failed-stop-offset") {
        graph.failed_stop_offset = v.to_string();
    }
    if let Some(v) = root.attr("failed-start-offset") {
        graph.failed_start_offset = v.to_string();
    }

    for synapse_el in root.children_named("synapse") {
        let priority: i32 = synapse_el
            .attr("priority")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let action_set = synapse_el.child("action_set").ok_or_else(|| {
            GraphXmlError::Parse("synapse without action_set".to_string())
        })?;
        let action_el = action_set.children.first().ok_or_else(|| {
            GraphXmlError::Parse("empty action_set".to_string())
        })?;
        let action = parse_action(action_el, priority)?;

        let mut inputs = Vec::new();
        if let Some(inputs_el) = synapse_el.child("inputs") {
            for trigger in inputs_el.children_named("trigger") {
                let reference = trigger.children.first().ok_or_else(|| {
                    GraphXmlError::Parse("empty trigger".to_string())
                })?;
                let id: u32 = require(reference, "id")?
                    .parse()
                    .map_err(|_| GraphXmlError::Parse("bad trigger id".to_string()))?;
                inputs.push(id);
            }
        }
        graph.add_synapse(action, inputs);
    }
    Ok(graph)
}
