//! The per-run snapshot arena.
//!
//! Resources and nodes live in flat vectors; cross-references are
//! arena indices, never pointers. A working set is built once per
//! scheduler run and discarded afterwards; nothing survives between
//! runs except the CIB itself.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use steward_core::{CoreError, CoreResult, NodeUuid, ResourceId, Score};

use crate::cib::CibVersion;
use crate::constraint::{Colocation, LocationRule, OrderingConstraint};
use crate::node::Node;
use crate::resource::{Primitive, Resource, RscRole, Variant};
use crate::ticket::Ticket;

/// Cluster-wide options relevant to scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Grace period added to remote action completion
    pub cluster_delay_ms: u64,
    /// Fencing action timeout
    pub stonith_timeout_ms: u64,
    /// Whether fencing is enabled at all
    pub stonith_enabled: bool,
    /// Stickiness applied when a resource does not set its own
    pub default_stickiness: Score,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            cluster_delay_ms: 60_000,
            stonith_timeout_ms: 60_000,
            stonith_enabled: true,
            default_stickiness: Score::ZERO,
        }
    }
}

/// Snapshot of cluster configuration and observed state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkingSet {
    /// All known nodes
    pub nodes: Vec<Node>,
    /// Resource arena; collectives reference children by index
    pub resources: Vec<Resource>,
    /// Colocation table; endpoints hold index lists into it
    pub colocations: Vec<Colocation>,
    /// Ordering constraints from configuration
    pub orderings: Vec<OrderingConstraint>,
    /// Location rules from configuration
    pub locations: Vec<LocationRule>,
    /// Tickets by id
    pub tickets: IndexMap<String, Ticket>,
    /// CIB version this snapshot was built from
    pub version: CibVersion,
    /// Cluster options
    pub options: ClusterOptions,
    /// Snapshot time (unix millis)
    pub now_ms: u64,
}

impl WorkingSet {
    /// Create an empty working set
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            resources: Vec::new(),
            colocations: Vec::new(),
            orderings: Vec::new(),
            locations: Vec::new(),
            tickets: IndexMap::new(),
            version: CibVersion::default(),
            options: ClusterOptions::default(),
            now_ms: 0,
        }
    }

    /// Add a node
    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Look up a node by uuid
    #[must_use]
    pub fn node(&self, uuid: NodeUuid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.uuid == uuid)
    }

    /// Mutable node lookup by uuid
    pub fn node_mut(&mut self, uuid: NodeUuid) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.uuid == uuid)
    }

    /// Look up a node by name
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Nodes currently able to run resources
    #[must_use]
    pub fn available_nodes(&self) -> Vec<NodeUuid> {
        self.nodes
            .iter()
            .filter(|n| n.is_available())
            .map(|n| n.uuid)
            .collect()
    }

    /// Add a resource, returning its arena id
    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        let id = ResourceId::new(self.resources.len() as u32);
        self.resources.push(resource);
        id
    }

    /// Resource by arena id
    ///
    /// # Panics
    ///
    /// Panics if the id is not from this arena
    #[must_use]
    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.index()]
    }

    /// Mutable resource by arena id
    ///
    /// # Panics
    ///
    /// Panics if the id is not from this arena
    pub fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.index()]
    }

    /// Find a resource by configuration id
    #[must_use]
    pub fn find_resource(&self, id: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.id == id)
            .map(|i| ResourceId::new(i as u32))
    }

    /// Top-level resources (no parent), in configuration order
    #[must_use]
    pub fn top_level_resources(&self) -> Vec<ResourceId> {
        self.resources
            .iter()
            .enumerate()
            .filter(|(_, r)| r.parent.is_none())
            .map(|(i, _)| ResourceId::new(i as u32))
            .collect()
    }

    /// Add a colocation, wiring both endpoint adjacency lists
    ///
    /// # Errors
    ///
    /// Returns error if either endpoint is out of range
    pub fn add_colocation(&mut self, colocation: Colocation) -> CoreResult<()> {
        let n = self.resources.len();
        if colocation.dependent.index() >= n || colocation.primary.index() >= n {
            return Err(CoreError::NotFound {
                kind: "Resource".to_string(),
                id: colocation.id.clone(),
            });
        }
        let index = self.colocations.len();
        self.resources[colocation.dependent.index()].this_with.push(index);
        self.resources[colocation.primary.index()].with_this.push(index);
        self.colocations.push(colocation);
        Ok(())
    }

    /// Add an ordering constraint
    ///
    /// # Errors
    ///
    /// Returns error if either endpoint is out of range
    pub fn add_ordering(&mut self, ordering: OrderingConstraint) -> CoreResult<()> {
        let n = self.resources.len();
        if ordering.first.index() >= n || ordering.then.index() >= n {
            return Err(CoreError::NotFound {
                kind: "Resource".to_string(),
                id: ordering.id.clone(),
            });
        }
        self.orderings.push(ordering);
        Ok(())
    }

    /// Seed every primitive's allowed map with all nodes at zero,
    /// then fold in location rules
    pub fn seed_allowed_maps(&mut self) {
        let node_ids: Vec<NodeUuid> = self.nodes.iter().map(|n| n.uuid).collect();
        for rsc in &mut self.resources {
            if let Some(prim) = rsc.as_primitive_mut() {
                for uuid in &node_ids {
                    prim.allowed.entry(*uuid).or_insert(Score::ZERO);
                }
            }
        }
        let rules = self.locations.clone();
        for rule in rules {
            // A rule on a collective applies to every instance below it
            let targets = self.expand_to_primitives(rule.rsc);
            for target in targets {
                if let Some(prim) = self.resources[target.index()].as_primitive_mut() {
                    let entry = prim.allowed.entry(rule.node).or_insert(Score::ZERO);
                    *entry = entry.plus(rule.score);
                }
            }
        }
    }

    /// All primitive descendants of a resource (itself if primitive)
    #[must_use]
    pub fn expand_to_primitives(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let rsc = &self.resources[current.index()];
            if rsc.is_collective() {
                for child in rsc.children().iter().rev() {
                    stack.push(*child);
                }
            } else {
                out.push(current);
            }
        }
        out
    }

    /// Zero every node's per-run assignment count
    pub fn reset_counts(&mut self) {
        for node in &mut self.nodes {
            node.count = 0;
        }
    }

    /// Validate referential integrity of the snapshot
    ///
    /// # Errors
    ///
    /// Returns error on the first dangling reference found
    pub fn validate(&self) -> CoreResult<()> {
        for rsc in &self.resources {
            if let Some(prim) = rsc.as_primitive() {
                for node in &prim.running_on {
                    if self.node(*node).is_none() {
                        return Err(CoreError::Validation {
                            field: rsc.id.clone(),
                            reason: format!("running on unknown node {node}"),
                        });
                    }
                }
            }
            for child in rsc.children() {
                if child.index() >= self.resources.len() {
                    return Err(CoreError::Validation {
                        field: rsc.id.clone(),
                        reason: format!("dangling child {child}"),
                    });
                }
            }
        }
        for colocation in &self.colocations {
            if colocation.dependent.index() >= self.resources.len()
                || colocation.primary.index() >= self.resources.len()
            {
                return Err(CoreError::Validation {
                    field: colocation.id.clone(),
                    reason: "colocation references unknown resource".to_string(),
                });
            }
        }
        for ordering in &self.orderings {
            if ordering.first.index() >= self.resources.len()
                || ordering.then.index() >= self.resources.len()
            {
                return Err(CoreError::Validation {
                    field: ordering.id.clone(),
                    reason: "ordering references unknown resource".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Materialize clone instances and bundle replicas from their
    /// templates
    ///
    /// A clone configured with template `T` and `clone-max = N` gets
    /// instances `T:0 .. T:N-1`, each a copy of the template
    /// primitive parented to the clone. Bundles get one container
    /// replica per count.
    pub fn materialize_instances(&mut self) {
        let collective_count = self.resources.len();
        for index in 0..collective_count {
            let id = ResourceId::new(index as u32);
            match &self.resources[index].variant {
                Variant::Clone(data) if data.instances.is_empty() => {
                    let max_total = if data.max_total == 0 {
                        self.nodes.len() as u32
                    } else {
                        data.max_total
                    };
                    let template = self.clone_template(id);
                    let Some((template_id, template_prim)) = template else {
                        continue;
                    };
                    // The template itself is a configuration artifact,
                    // never assigned
                    if let Some(template_rsc) = self
                        .resources
                        .iter_mut()
                        .find(|r| r.parent == Some(id) && r.id == template_id)
                    {
                        template_rsc.flags.provisional = false;
                        if let Some(p) = template_rsc.as_primitive_mut() {
                            p.next_role = Some(RscRole::Stopped);
                        }
                    }
                    let mut instances = Vec::new();
                    for i in 0..max_total {
                        let instance_id = format!("{}:{}", template_id, i);
                        let mut rsc = Resource::new(
                            &instance_id,
                            Variant::Primitive(template_prim.clone()),
                        );
                        rsc.parent = Some(id);
                        instances.push(self.add_resource(rsc));
                    }
                    if let Variant::Clone(data) = &mut self.resources[index].variant {
                        data.instances = instances;
                        data.max_total = max_total;
                    }
                }
                Variant::Bundle(data) if data.replicas.is_empty() => {
                    let image = data.image.clone();
                    let count = data.replica_count;
                    let bundle_id = self.resources[index].id.clone();
                    let mut replicas = Vec::new();
                    for i in 0..count {
                        let replica_id = format!("{}-{}", bundle_id, i);
                        let mut prim = Primitive::new("container", None, &image);
                        prim.role = RscRole::Stopped;
                        let mut rsc = Resource::new(&replica_id, Variant::Primitive(prim));
                        rsc.parent = Some(id);
                        replicas.push(self.add_resource(rsc));
                    }
                    if let Variant::Bundle(data) = &mut self.resources[index].variant {
                        data.replicas = replicas;
                    }
                }
                _ => {}
            }
        }
    }

    /// The template id and primitive payload of a clone
    fn clone_template(&self, id: ResourceId) -> Option<(String, Primitive)> {
        // The template is the configured (non-instance) child
        let rsc = &self.resources[id.index()];
        let Variant::Clone(_) = &rsc.variant else {
            return None;
        };
        self.resources
            .iter()
            .find(|r| r.parent == Some(id))
            .and_then(|r| r.as_primitive().map(|p| (r.id.clone(), p.clone())))
    }
}
