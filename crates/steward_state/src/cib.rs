//! CIB snapshot ingestion.
//!
//! Parses a CIB XML document into a [`WorkingSet`]. The CIB schema is
//! a fixed compatibility surface; only the subtrees the scheduler
//! consumes are interpreted: `/cib/configuration/{crm_config,nodes,
//! resources,constraints}` and `/cib/status`.

use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use steward_core::{ActionTask, CoreError, ExitStatus, NodeUuid, Score};
use tracing::warn;

use crate::constraint::{Colocation, LocationRule, OrderKind, OrderingConstraint};
use crate::node::{MembershipState, Node, NodeRole};
use crate::resource::{CloneData, OnFail, RecurringOp, Resource, RscRole, Variant};
use crate::resource::BundleData;
use crate::ticket::Ticket;
use crate::working_set::WorkingSet;

/// The optimistic-concurrency version triple of a CIB document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct CibVersion {
    /// Bumped only by administrative replacement
    pub admin_epoch: u32,
    /// Bumped on configuration change
    pub epoch: u32,
    /// Bumped on every status update
    pub num_updates: u32,
}

impl std::fmt::Display for CibVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.admin_epoch, self.epoch, self.num_updates)
    }
}

/// Ingestion failure
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed XML
    #[error("XML parse error: {0}")]
    Xml(String),

    /// A required attribute was absent
    #[error("missing attribute {attr} on <{element}>")]
    MissingAttr {
        /// Element the attribute was expected on
        element: String,
        /// The missing attribute
        attr: String,
    },

    /// A constraint or status entry referenced a nonexistent entity
    #[error("unknown {kind} reference: {id}")]
    UnknownRef {
        /// Entity kind
        kind: &'static str,
        /// The dangling id
        id: String,
    },

    /// Core validation failure
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// A parsed XML element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Tag name
    pub name: String,
    /// Attributes in document order
    pub attrs: IndexMap<String, String>,
    /// Child elements in document order
    pub children: Vec<Element>,
}

impl Element {
    /// First child with the given tag name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given tag name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Attribute value
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute value or an error naming the element
    fn require(&self, name: &str) -> Result<&str, IngestError> {
        self.attr(name).ok_or_else(|| IngestError::MissingAttr {
            element: self.name.clone(),
            attr: name.to_string(),
        })
    }
}

/// Parse an XML document into an element tree
///
/// # Errors
///
/// Returns error on malformed XML or multiple roots
pub fn parse_tree(xml: &str) -> Result<Element, IngestError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(element_from_start(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    IngestError::Xml("unbalanced end tag".to_string())
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::Xml(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(IngestError::Xml("unclosed element".to_string()));
    }
    root.ok_or_else(|| IngestError::Xml("empty document".to_string()))
}

fn element_from_start(
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<Element, IngestError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = IndexMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| IngestError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| IngestError::Xml(e.to_string()))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), IngestError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(IngestError::Xml("multiple root elements".to_string()))
    }
}

/// Parse an interval/timeout value: `10s`, `500ms`, `2m`, or bare
/// seconds
#[must_use]
pub fn parse_duration_ms(value: &str) -> u64 {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse().unwrap_or(0);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.trim().parse::<u64>().unwrap_or(0) * 1000;
    }
    if let Some(m) = value.strip_suffix('m') {
        return m.trim().parse::<u64>().unwrap_or(0) * 60_000;
    }
    value.parse::<u64>().unwrap_or(0) * 1000
}

/// Serialize an element tree back to XML
///
/// # Errors
///
/// Returns error if the writer fails
pub fn write_tree(root: &Element) -> Result<String, IngestError> {
    use quick_xml::events::{BytesEnd, BytesStart};
    use quick_xml::Writer;
    use std::io::Cursor;

    fn write_element(
        writer: &mut Writer<Cursor<Vec<u8>>>,
        element: &Element,
    ) -> Result<(), IngestError> {
        let mut start = BytesStart::new(element.name.as_str());
        for (name, value) in &element.attrs {
            start.push_attribute((name.as_str(), value.as_str()));
        }
        if element.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .map_err(|e| IngestError::Xml(e.to_string()))?;
            return Ok(());
        }
        writer
            .write_event(Event::Start(start))
            .map_err(|e| IngestError::Xml(e.to_string()))?;
        for child in &element.children {
            write_element(writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(element.name.as_str())))
            .map_err(|e| IngestError::Xml(e.to_string()))
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_element(&mut writer, root)?;
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| IngestError::Xml(e.to_string()))
}

fn ensure_child<'a>(parent: &'a mut Element, name: &str) -> &'a mut Element {
    if let Some(position) = parent.children.iter().position(|c| c.name == name) {
        return &mut parent.children[position];
    }
    parent.children.push(Element {
        name: name.to_string(),
        ..Element::default()
    });
    let index = parent.children.len() - 1;
    &mut parent.children[index]
}

fn ensure_child_with_attr<'a>(
    parent: &'a mut Element,
    name: &str,
    attr: &str,
    value: &str,
) -> &'a mut Element {
    if let Some(position) = parent
        .children
        .iter()
        .position(|c| c.name == name && c.attr(attr) == Some(value))
    {
        return &mut parent.children[position];
    }
    let mut element = Element {
        name: name.to_string(),
        ..Element::default()
    };
    element.attrs.insert(attr.to_string(), value.to_string());
    parent.children.push(element);
    let index = parent.children.len() - 1;
    &mut parent.children[index]
}

/// Record an operation outcome into a CIB document's status section
///
/// Bumps `num_updates` and appends an `lrm_rsc_op` history entry
/// under the executing node, creating the enclosing status elements
/// as needed. Returns the updated document.
///
/// # Errors
///
/// Returns error on malformed input XML
pub fn record_op_result(
    xml: &str,
    node_name: &str,
    rsc_id: &str,
    operation: &str,
    rc_code: i32,
) -> Result<String, IngestError> {
    let mut root = parse_tree(xml)?;
    let num_updates: u32 = root
        .attr("num_updates")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    root.attrs
        .insert("num_updates".to_string(), (num_updates + 1).to_string());

    let status = ensure_child(&mut root, "status");
    let node_state = ensure_child_with_attr(status, "node_state", "uname", node_name);
    let lrm = ensure_child(node_state, "lrm");
    let lrm_resources = ensure_child(lrm, "lrm_resources");
    let lrm_resource = ensure_child_with_attr(lrm_resources, "lrm_resource", "id", rsc_id);

    let op_index = lrm_resource.children.len();
    let mut op = Element {
        name: "lrm_rsc_op".to_string(),
        ..Element::default()
    };
    op.attrs.insert(
        "id".to_string(),
        format!("{rsc_id}_{operation}_{op_index}"),
    );
    op.attrs.insert("operation".to_string(), operation.to_string());
    op.attrs.insert("rc-code".to_string(), rc_code.to_string());
    lrm_resource.children.push(op);

    write_tree(&root)
}

fn nvpairs(parent: &Element, set_name: &str) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for set in parent.children_named(set_name) {
        for pair in set.children_named("nvpair") {
            if let (Some(name), Some(value)) = (pair.attr("name"), pair.attr("value")) {
                out.insert(name.to_string(), value.to_string());
            }
        }
    }
    out
}

/// Build a [`WorkingSet`] from a CIB XML document
///
/// # Errors
///
/// Returns error on malformed XML, schema violations, or dangling
/// references
pub fn parse(xml: &str, now_ms: u64) -> Result<WorkingSet, IngestError> {
    let root = parse_tree(xml)?;
    if root.name != "cib" {
        return Err(IngestError::Xml(format!("expected <cib>, got <{}>", root.name)));
    }

    let mut ws = WorkingSet::new();
    ws.now_ms = now_ms;
    ws.version = CibVersion {
        admin_epoch: root.attr("admin_epoch").and_then(|v| v.parse().ok()).unwrap_or(0),
        epoch: root.attr("epoch").and_then(|v| v.parse().ok()).unwrap_or(0),
        num_updates: root.attr("num_updates").and_then(|v| v.parse().ok()).unwrap_or(0),
    };

    let configuration = root
        .child("configuration")
        .ok_or_else(|| IngestError::Xml("missing <configuration>".to_string()))?;

    read_options(configuration, &mut ws);
    read_nodes(configuration, &mut ws)?;
    read_resources(configuration, &mut ws)?;
    ws.materialize_instances();
    read_constraints(configuration, &mut ws)?;
    read_tickets(configuration, &mut ws);

    if let Some(status) = root.child("status") {
        read_status(status, &mut ws)?;
    }

    ws.seed_allowed_maps();
    ws.validate()?;
    Ok(ws)
}

fn read_options(configuration: &Element, ws: &mut WorkingSet) {
    let Some(crm_config) = configuration.child("crm_config") else {
        return;
    };
    let options = nvpairs(crm_config, "cluster_property_set");
    if let Some(v) = options.get("cluster-delay") {
        ws.options.cluster_delay_ms = parse_duration_ms(v);
    }
    if let Some(v) = options.get("stonith-timeout") {
        ws.options.stonith_timeout_ms = parse_duration_ms(v);
    }
    if let Some(v) = options.get("stonith-enabled") {
        ws.options.stonith_enabled = v == "true";
    }
    if let Some(v) = options.get("default-resource-stickiness") {
        ws.options.default_stickiness = Score::parse(v).unwrap_or(Score::ZERO);
    }
}

fn read_nodes(configuration: &Element, ws: &mut WorkingSet) -> Result<(), IngestError> {
    let Some(nodes) = configuration.child("nodes") else {
        return Ok(());
    };
    for node_el in nodes.children_named("node") {
        let uname = node_el.require("uname")?;
        let mut node = Node::new(uname);
        if let Some(id) = node_el.attr("id") {
            if let Ok(uuid) = NodeUuid::parse(id) {
                node.uuid = uuid;
            }
        }
        if let Some(kind) = node_el.attr("type") {
            node.role = match kind {
                "remote" => NodeRole::Remote,
                "guest" => NodeRole::Guest,
                _ => NodeRole::Cluster,
            };
        }
        for (name, value) in nvpairs(node_el, "instance_attributes") {
            if name == "standby" {
                node.standby = value == "on" || value == "true";
            } else {
                node.attributes.insert(name, value);
            }
        }
        ws.add_node(node);
    }
    Ok(())
}

fn read_resources(configuration: &Element, ws: &mut WorkingSet) -> Result<(), IngestError> {
    let Some(resources) = configuration.child("resources") else {
        return Ok(());
    };
    for child in &resources.children {
        read_resource(child, None, ws)?;
    }
    Ok(())
}

fn read_resource(
    element: &Element,
    parent: Option<steward_core::ResourceId>,
    ws: &mut WorkingSet,
) -> Result<Option<steward_core::ResourceId>, IngestError> {
    match element.name.as_str() {
        "primitive" => {
            let id = element.require("id")?;
            let class = element.require("class")?;
            let agent_type = element.require("type")?;
            let provider = element.attr("provider");
            let mut rsc = Resource::primitive(id, class, provider, agent_type);
            rsc.parent = parent;
            rsc.meta = nvpairs(element, "meta_attributes");
            apply_primitive_meta(&mut rsc);
            if let Some(operations) = element.child("operations") {
                let ops = read_operations(operations);
                if let Some(prim) = rsc.as_primitive_mut() {
                    prim.operations = ops;
                }
            }
            Ok(Some(ws.add_resource(rsc)))
        }
        "group" => {
            let id = element.require("id")?;
            let mut rsc = Resource::new(id, Variant::Group(crate::resource::GroupData::default()));
            rsc.parent = parent;
            rsc.meta = nvpairs(element, "meta_attributes");
            let group_id = ws.add_resource(rsc);
            let mut children = Vec::new();
            for child in &element.children {
                if child.name == "primitive" {
                    if let Some(child_id) = read_resource(child, Some(group_id), ws)? {
                        children.push(child_id);
                    }
                }
            }
            if let Variant::Group(data) = &mut ws.resource_mut(group_id).variant {
                data.children = children;
            }
            Ok(Some(group_id))
        }
        "clone" | "master" => {
            let id = element.require("id")?;
            let meta = nvpairs(element, "meta_attributes");
            let mut data = CloneData::new(
                meta.get("clone-max").and_then(|v| v.parse().ok()).unwrap_or(0),
            );
            data.max_per_node = meta
                .get("clone-node-max")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            data.promotable = element.name == "master"
                || meta.get("promotable").map(String::as_str) == Some("true");
            data.promoted_max = meta
                .get("promoted-max")
                .or_else(|| meta.get("master-max"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            data.interleave = meta.get("interleave").map(String::as_str) == Some("true");
            let notify = meta.get("notify").map(String::as_str) == Some("true");

            let mut rsc = Resource::new(id, Variant::Clone(data));
            rsc.meta = meta;
            rsc.parent = parent;
            rsc.flags.notify = notify;
            let clone_id = ws.add_resource(rsc);
            for child in &element.children {
                if child.name == "primitive" || child.name == "group" {
                    read_resource(child, Some(clone_id), ws)?;
                }
            }
            Ok(Some(clone_id))
        }
        "bundle" => {
            let id = element.require("id")?;
            let meta = nvpairs(element, "meta_attributes");
            let container = element
                .child("docker")
                .or_else(|| element.child("podman"))
                .ok_or_else(|| IngestError::MissingAttr {
                    element: "bundle".to_string(),
                    attr: "docker".to_string(),
                })?;
            let data = BundleData {
                replicas: Vec::new(),
                image: container.require("image")?.to_string(),
                replica_count: container
                    .attr("replicas")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
                max_per_node: container
                    .attr("replicas-per-host")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
                interleave: meta.get("interleave").map(String::as_str) != Some("false"),
            };
            let mut rsc = Resource::new(id, Variant::Bundle(data));
            rsc.meta = meta;
            rsc.parent = parent;
            Ok(Some(ws.add_resource(rsc)))
        }
        _ => Ok(None),
    }
}

fn apply_primitive_meta(rsc: &mut Resource) {
    let stickiness = rsc
        .meta
        .get("resource-stickiness")
        .and_then(|v| Score::parse(v).ok());
    let managed = rsc.meta.get("is-managed").map(String::as_str) != Some("false");
    let on_fail = rsc.meta.get("on-fail").map(|v| OnFail::parse(v));
    rsc.flags.managed = managed;
    if let Some(prim) = rsc.as_primitive_mut() {
        if let Some(s) = stickiness {
            prim.stickiness = s;
        }
        if let Some(policy) = on_fail {
            prim.on_fail = policy;
        }
    }
}

fn read_operations(operations: &Element) -> Vec<RecurringOp> {
    let mut out = Vec::new();
    for op in operations.children_named("op") {
        let Some(name) = op.attr("name") else { continue };
        let Ok(task) = ActionTask::parse(name) else {
            continue;
        };
        out.push(RecurringOp {
            task,
            interval_ms: op.attr("interval").map(parse_duration_ms).unwrap_or(0),
            timeout_ms: op.attr("timeout").map(parse_duration_ms).unwrap_or(20_000),
            on_fail: op.attr("on-fail").map(OnFail::parse).unwrap_or_default(),
        });
    }
    out
}

fn read_constraints(configuration: &Element, ws: &mut WorkingSet) -> Result<(), IngestError> {
    let Some(constraints) = configuration.child("constraints") else {
        return Ok(());
    };
    for element in &constraints.children {
        match element.name.as_str() {
            "rsc_colocation" => {
                let id = element.require("id")?;
                let dependent = resolve_rsc(ws, element.require("rsc")?)?;
                let primary = resolve_rsc(ws, element.require("with-rsc")?)?;
                let score = Score::parse(element.attr("score").unwrap_or("0"))
                    .map_err(IngestError::Core)?;
                let mut colocation = Colocation::new(id, dependent, primary, score);
                colocation.dependent_role =
                    element.attr("rsc-role").map(RscRole::parse).filter(|r| *r != RscRole::Unknown);
                colocation.primary_role = element
                    .attr("with-rsc-role")
                    .map(RscRole::parse)
                    .filter(|r| *r != RscRole::Unknown);
                colocation.influence =
                    element.attr("influence").map(|v| v == "true").unwrap_or(true);
                ws.add_colocation(colocation).map_err(IngestError::Core)?;
            }
            "rsc_order" => {
                let id = element.require("id")?;
                let first = resolve_rsc(ws, element.require("first")?)?;
                let then = resolve_rsc(ws, element.require("then")?)?;
                let first_task = element
                    .attr("first-action")
                    .map(ActionTask::parse)
                    .transpose()
                    .map_err(IngestError::Core)?
                    .unwrap_or(ActionTask::Start);
                let then_task = element
                    .attr("then-action")
                    .map(ActionTask::parse)
                    .transpose()
                    .map_err(IngestError::Core)?
                    .unwrap_or(ActionTask::Start);
                let kind = match element.attr("kind") {
                    Some("Optional") => OrderKind::OPTIONAL,
                    Some("Serialize") => OrderKind::SERIALIZE | OrderKind::mandatory(),
                    _ => OrderKind::mandatory(),
                };
                ws.add_ordering(OrderingConstraint {
                    id: id.to_string(),
                    first,
                    first_task,
                    then,
                    then_task,
                    kind,
                })
                .map_err(IngestError::Core)?;
            }
            "rsc_location" => {
                let id = element.require("id")?;
                let rsc = resolve_rsc(ws, element.require("rsc")?)?;
                let node_name = element.require("node")?;
                let node = ws
                    .node_by_name(node_name)
                    .map(|n| n.uuid)
                    .ok_or_else(|| IngestError::UnknownRef {
                        kind: "node",
                        id: node_name.to_string(),
                    })?;
                let score = Score::parse(element.attr("score").unwrap_or("0"))
                    .map_err(IngestError::Core)?;
                ws.locations.push(LocationRule {
                    id: id.to_string(),
                    rsc,
                    node,
                    score,
                });
            }
            other => {
                warn!(constraint = other, "ignoring unsupported constraint type");
            }
        }
    }
    Ok(())
}

fn read_tickets(configuration: &Element, ws: &mut WorkingSet) {
    let Some(tickets) = configuration.child("tickets") else {
        return;
    };
    for ticket_el in tickets.children_named("ticket_state") {
        let Some(id) = ticket_el.attr("id") else { continue };
        let mut ticket = Ticket::new(id);
        ticket.granted = ticket_el.attr("granted") == Some("true");
        ticket.standby = ticket_el.attr("standby") == Some("true");
        ticket.last_granted = ticket_el.attr("last-granted").and_then(|v| v.parse().ok());
        ws.tickets.insert(id.to_string(), ticket);
    }
}

fn resolve_rsc(ws: &WorkingSet, id: &str) -> Result<steward_core::ResourceId, IngestError> {
    ws.find_resource(id).ok_or_else(|| IngestError::UnknownRef {
        kind: "resource",
        id: id.to_string(),
    })
}

fn read_status(status: &Element, ws: &mut WorkingSet) -> Result<(), IngestError> {
    for node_state in status.children_named("node_state") {
        let uname = node_state.require("uname")?;
        let Some(node) = ws.node_by_name(uname) else {
            return Err(IngestError::UnknownRef {
                kind: "node",
                id: uname.to_string(),
            });
        };
        let uuid = node.uuid;
        if let Some(node) = ws.node_mut(uuid) {
            node.membership = if node_state.attr("in_ccm") == Some("true") {
                MembershipState::Member
            } else {
                MembershipState::Lost
            };
            node.online = node_state.attr("crmd") == Some("online");
            for (name, value) in nvpairs(node_state, "transient_attributes") {
                node.attributes.insert(name, value);
            }
        }

        let Some(lrm) = node_state.child("lrm") else { continue };
        let Some(lrm_resources) = lrm.child("lrm_resources") else {
            continue;
        };
        for lrm_resource in lrm_resources.children_named("lrm_resource") {
            let rsc_id = lrm_resource.require("id")?;
            let Some(rsc) = ws.find_resource(rsc_id) else {
                // Present in status, gone from configuration
                warn!(resource = rsc_id, "status for unconfigured resource (orphan)");
                continue;
            };
            for op in lrm_resource.children_named("lrm_rsc_op") {
                apply_op_history(ws, rsc, uuid, op)?;
            }
        }
    }
    Ok(())
}

fn apply_op_history(
    ws: &mut WorkingSet,
    rsc: steward_core::ResourceId,
    node: NodeUuid,
    op: &Element,
) -> Result<(), IngestError> {
    let operation = op.require("operation")?;
    let rc = op
        .attr("rc-code")
        .and_then(|v| v.parse::<i32>().ok())
        .map(ExitStatus::from_code)
        .unwrap_or(ExitStatus::Error);

    let resource = ws.resource_mut(rsc);
    let mut failed = false;
    let on_fail = resource.as_primitive().map(|p| p.on_fail).unwrap_or_default();
    if let Some(prim) = resource.as_primitive_mut() {
        match operation {
            "start" | "monitor" => {
                if rc.is_ok() {
                    if !prim.running_on.contains(&node) {
                        prim.running_on.push(node);
                    }
                    if rc == ExitStatus::Promoted || rc == ExitStatus::DegradedPromoted {
                        prim.role = RscRole::Promoted;
                    } else if prim.role != RscRole::Promoted {
                        prim.role = RscRole::Started;
                    }
                } else if rc == ExitStatus::NotRunning {
                    prim.running_on.retain(|n| *n != node);
                    if prim.running_on.is_empty() {
                        prim.role = RscRole::Stopped;
                    }
                } else {
                    failed = true;
                }
            }
            "stop" => {
                if rc.is_ok() {
                    prim.running_on.retain(|n| *n != node);
                    if prim.running_on.is_empty() {
                        prim.role = RscRole::Stopped;
                    }
                } else {
                    failed = true;
                }
            }
            "promote" => {
                if rc.is_ok() {
                    prim.role = RscRole::Promoted;
                } else {
                    failed = true;
                }
            }
            "demote" => {
                if rc.is_ok() && prim.role == RscRole::Promoted {
                    prim.role = RscRole::Unpromoted;
                }
            }
            _ => {}
        }
    }
    if failed {
        resource.flags.failed = true;
        match on_fail {
            OnFail::Block => resource.flags.blocked = true,
            OnFail::Stop => {
                resource
                    .meta
                    .insert("target-role".to_string(), "Stopped".to_string());
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_CIB: &str = r#"
<cib admin_epoch="0" epoch="4" num_updates="12">
  <configuration>
    <crm_config>
      <cluster_property_set id="opts">
        <nvpair id="opts-delay" name="cluster-delay" value="60s"/>
        <nvpair id="opts-stonith" name="stonith-enabled" value="false"/>
      </cluster_property_set>
    </crm_config>
    <nodes>
      <node id="00000000-0000-0000-0000-000000000001" uname="rhel7-4" type="member"/>
      <node id="00000000-0000-0000-0000-000000000002" uname="rhel7-5" type="member"/>
    </nodes>
    <resources>
      <primitive id="dummy" class="ocf" provider="heartbeat" type="Dummy">
        <meta_attributes id="dummy-meta">
          <nvpair id="dummy-stick" name="resource-stickiness" value="100"/>
        </meta_attributes>
        <operations>
          <op id="dummy-mon" name="monitor" interval="10s" timeout="20s"/>
        </operations>
      </primitive>
      <group id="group2">
        <primitive id="dummy2a" class="ocf" provider="heartbeat" type="Dummy"/>
        <primitive id="dummy2b" class="ocf" provider="heartbeat" type="Dummy"/>
      </group>
    </resources>
    <constraints>
      <rsc_colocation id="c1" rsc="dummy" with-rsc="group2" score="50"/>
      <rsc_order id="o1" first="dummy" then="group2" kind="Mandatory"/>
      <rsc_location id="l1" rsc="dummy" node="rhel7-4" score="200"/>
    </constraints>
  </configuration>
  <status>
    <node_state id="00000000-0000-0000-0000-000000000001" uname="rhel7-4" in_ccm="true" crmd="online">
      <lrm id="lrm-1">
        <lrm_resources>
          <lrm_resource id="dummy">
            <lrm_rsc_op id="dummy_start_0" operation="start" rc-code="0"/>
          </lrm_resource>
        </lrm_resources>
      </lrm>
    </node_state>
    <node_state id="00000000-0000-0000-0000-000000000002" uname="rhel7-5" in_ccm="true" crmd="online"/>
  </status>
</cib>
"#;

    #[test]
    fn test_parse_tree_basic() {
        let tree = parse_tree("<a x=\"1\"><b/><b y=\"2\"/></a>").unwrap();
        assert_eq!(tree.name, "a");
        assert_eq!(tree.attr("x"), Some("1"));
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[1].attr("y"), Some("2"));
    }

    #[test]
    fn test_parse_tree_rejects_garbage() {
        assert!(parse_tree("<a><b></a>").is_err());
        assert!(parse_tree("").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_ms("10s"), 10_000);
        assert_eq!(parse_duration_ms("500ms"), 500);
        assert_eq!(parse_duration_ms("2m"), 120_000);
        assert_eq!(parse_duration_ms("7"), 7_000);
    }

    #[test]
    fn test_parse_cib_versions() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        assert_eq!(
            ws.version,
            CibVersion {
                admin_epoch: 0,
                epoch: 4,
                num_updates: 12
            }
        );
    }

    #[test]
    fn test_parse_cib_nodes_and_status() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        assert_eq!(ws.nodes.len(), 2);
        let node = ws.node_by_name("rhel7-4").unwrap();
        assert!(node.online);
        assert!(node.is_available());
    }

    #[test]
    fn test_parse_cib_resources() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        let dummy = ws.find_resource("dummy").unwrap();
        let prim = ws.resource(dummy).as_primitive().unwrap();
        assert_eq!(prim.stickiness, Score::new(100));
        assert_eq!(prim.operations.len(), 1);
        assert_eq!(prim.operations[0].interval_ms, 10_000);

        let group = ws.find_resource("group2").unwrap();
        assert_eq!(ws.resource(group).children().len(), 2);
    }

    #[test]
    fn test_parse_cib_running_on() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        let dummy = ws.find_resource("dummy").unwrap();
        let prim = ws.resource(dummy).as_primitive().unwrap();
        let rhel74 = ws.node_by_name("rhel7-4").unwrap().uuid;
        assert_eq!(prim.running_on, vec![rhel74]);
        assert_eq!(prim.role, RscRole::Started);
    }

    #[test]
    fn test_parse_cib_constraints() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        assert_eq!(ws.colocations.len(), 1);
        assert_eq!(ws.orderings.len(), 1);
        assert_eq!(ws.locations.len(), 1);

        let dummy = ws.find_resource("dummy").unwrap();
        assert_eq!(ws.resource(dummy).this_with.len(), 1);
    }

    #[test]
    fn test_parse_cib_location_folded_into_allowed() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        let dummy = ws.find_resource("dummy").unwrap();
        let rhel74 = ws.node_by_name("rhel7-4").unwrap().uuid;
        let prim = ws.resource(dummy).as_primitive().unwrap();
        assert_eq!(prim.allowed[&rhel74], Score::new(200));
    }

    #[test]
    fn test_parse_cib_options() {
        let ws = parse(SMALL_CIB, 0).unwrap();
        assert_eq!(ws.options.cluster_delay_ms, 60_000);
        assert!(!ws.options.stonith_enabled);
    }

    #[test]
    fn test_unknown_constraint_reference_fails() {
        let xml = r#"
<cib><configuration>
  <nodes><node id="00000000-0000-0000-0000-000000000001" uname="n1"/></nodes>
  <resources><primitive id="r" class="ocf" type="Dummy"/></resources>
  <constraints><rsc_colocation id="c" rsc="r" with-rsc="ghost" score="50"/></constraints>
</configuration></cib>"#;
        assert!(matches!(
            parse(xml, 0),
            Err(IngestError::UnknownRef { kind: "resource", .. })
        ));
    }

    #[test]
    fn test_write_tree_round_trips() {
        let tree = parse_tree("<a x=\"1\"><b y=\"2\"/><c/></a>").unwrap();
        let xml = write_tree(&tree).unwrap();
        assert_eq!(parse_tree(&xml).unwrap(), tree);
    }

    #[test]
    fn test_record_op_result_appends_history() {
        let updated = record_op_result(SMALL_CIB, "rhel7-5", "dummy", "start", 0).unwrap();
        let ws = parse(&updated, 0).unwrap();

        // num_updates bumped
        assert_eq!(ws.version.num_updates, 13);

        // The start is now visible as running state on rhel7-5
        let dummy = ws.find_resource("dummy").unwrap();
        let rhel75 = ws.node_by_name("rhel7-5").unwrap().uuid;
        assert!(ws
            .resource(dummy)
            .as_primitive()
            .unwrap()
            .running_on
            .contains(&rhel75));
    }

    #[test]
    fn test_record_op_result_creates_missing_status() {
        let bare = r#"
<cib admin_epoch="0" epoch="1" num_updates="0"><configuration>
  <nodes><node id="1" uname="n1"/></nodes>
  <resources><primitive id="r" class="ocf" type="Dummy"/></resources>
</configuration></cib>"#;
        let updated = record_op_result(bare, "n1", "r", "start", 0).unwrap();
        assert!(updated.contains("lrm_rsc_op"));
        assert!(updated.contains("node_state"));
    }

    #[test]
    fn test_failed_op_applies_on_fail_policy() {
        let xml = r#"
<cib><configuration>
  <nodes><node id="1" uname="n1"/></nodes>
  <resources>
    <primitive id="frail" class="ocf" type="Dummy">
      <meta_attributes id="fm">
        <nvpair id="fm-1" name="on-fail" value="block"/>
      </meta_attributes>
    </primitive>
  </resources>
</configuration>
<status>
  <node_state id="1" uname="n1" in_ccm="true" crmd="online">
    <lrm id="l"><lrm_resources>
      <lrm_resource id="frail">
        <lrm_rsc_op id="f-start" operation="start" rc-code="1"/>
      </lrm_resource>
    </lrm_resources></lrm>
  </node_state>
</status></cib>"#;
        let ws = parse(xml, 0).unwrap();
        let frail = ws.find_resource("frail").unwrap();
        assert!(ws.resource(frail).flags.failed);
        assert!(ws.resource(frail).flags.blocked);
    }

    #[test]
    fn test_clone_materialized_at_ingest() {
        let xml = r#"
<cib><configuration>
  <nodes>
    <node id="00000000-0000-0000-0000-000000000001" uname="n1"/>
    <node id="00000000-0000-0000-0000-000000000002" uname="n2"/>
  </nodes>
  <resources>
    <clone id="cl">
      <meta_attributes id="cl-meta">
        <nvpair id="cl-max" name="clone-max" value="3"/>
        <nvpair id="cl-notify" name="notify" value="true"/>
      </meta_attributes>
      <primitive id="web" class="ocf" provider="heartbeat" type="apache"/>
    </clone>
  </resources>
</configuration></cib>"#;
        let ws = parse(xml, 0).unwrap();
        let clone = ws.find_resource("cl").unwrap();
        assert!(ws.resource(clone).flags.notify);
        assert_eq!(ws.resource(clone).children().len(), 3);
        assert!(ws.find_resource("web:0").is_some());
        assert!(ws.find_resource("web:2").is_some());
    }
}
