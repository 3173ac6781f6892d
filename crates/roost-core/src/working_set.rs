// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Working-set snapshot and CIB ingestion.
//!
//! [`WorkingSet::build`] turns one CIB XML document plus its embedded status
//! section into the flat arenas the policy engine runs over. Nothing here is
//! persisted across scheduler runs; the CIB remains the only durable state.

use std::collections::BTreeMap;
use std::time::SystemTime;

use roxmltree::{Document, Node as XmlNode};
use thiserror::Error;

use crate::action::{Action, ActionEdge};
use crate::constraint::{
    Colocation, OrderKind, OrderingSpec, TaskKind, Ticket, TicketState,
};
use crate::ident::{ActionId, ConstraintId, NodeId, ResourceId};
use crate::node::{MembershipState, Node, NodeKind};
use crate::resource::{
    BundleSpec, CloneSpec, Primitive, PromotableSpec, RecurringOp, Resource, ResourceVariant,
    RscRole,
};
use crate::score::{Score, ScoreParseError};

/// CIB version triple used for optimistic concurrency.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct EpochTriple {
    /// Administrative epoch; bumped on disruptive schema changes.
    pub admin_epoch: u32,
    /// Configuration epoch; bumped on every configuration write.
    pub epoch: u32,
    /// Status update counter within an epoch.
    pub num_updates: u32,
}

/// A configured location preference, applied when allowed maps are seeded.
#[derive(Clone, Debug)]
pub struct LocationPref {
    /// Resource (or collective ancestor) the preference applies to.
    pub rsc: ResourceId,
    /// Target node.
    pub node: NodeId,
    /// Additive score.
    pub score: Score,
}

/// Observed runtime state of one resource instance, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct Observed {
    /// Nodes the instance was seen running on.
    pub running_on: Vec<NodeId>,
    /// Role derived from the operation history.
    pub role: Option<RscRole>,
    /// A non-success operation result was recorded.
    pub failed: bool,
}

/// Errors raised while ingesting a CIB document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is not well-formed XML.
    #[error("malformed CIB document: {0}")]
    Xml(#[from] roxmltree::Error),
    /// A required attribute is missing.
    #[error("element <{element}> is missing attribute {attribute:?}")]
    MissingAttribute {
        /// Element tag name.
        element: &'static str,
        /// Missing attribute name.
        attribute: &'static str,
    },
    /// A constraint references a resource that does not exist.
    #[error("constraint {constraint:?} references unknown resource {resource:?}")]
    UnknownResource {
        /// Constraint id.
        constraint: String,
        /// Unresolvable resource id.
        resource: String,
    },
    /// A status entry references a node absent from the membership.
    #[error("status references unknown node {0:?}")]
    UnknownNode(String),
    /// A resource element tag is not a known variant.
    #[error("unknown resource variant <{0}>")]
    UnknownVariant(String),
    /// A score attribute failed to parse.
    #[error("bad score on {element}: {source}")]
    BadScore {
        /// Element tag name.
        element: &'static str,
        /// Underlying parse failure.
        #[source]
        source: ScoreParseError,
    },
    /// An ordering constraint names an unknown task.
    #[error("constraint {constraint:?} references unknown task {task:?}")]
    UnknownTask {
        /// Constraint id.
        constraint: String,
        /// Unresolvable task name.
        task: String,
    },
}

/// The immutable-ingest, allocator-mutated snapshot the scheduler runs over.
#[derive(Clone, Debug, Default)]
pub struct WorkingSet {
    /// Node arena.
    pub nodes: Vec<Node>,
    /// Resource arena. Clone/bundle instances are appended during expansion.
    pub resources: Vec<Resource>,
    /// Colocation rows.
    pub colocations: Vec<Colocation>,
    /// Configured ordering rows (late-bound to actions).
    pub orderings: Vec<OrderingSpec>,
    /// Location preferences, applied when allowed maps are seeded.
    pub locations: Vec<LocationPref>,
    /// Cluster-wide tickets.
    pub tickets: Vec<Ticket>,
    /// Action arena, filled by action synthesis.
    pub actions: Vec<Action>,
    /// Ordering edges between actions.
    pub edges: Vec<ActionEdge>,
    /// CIB version the snapshot was built from.
    pub epoch: EpochTriple,
    /// Wall-clock reference of the snapshot, seconds since the epoch.
    /// Used to expire recorded failures past their `failure-timeout`.
    pub now_secs: u64,
    /// Ids of top-level (parentless) resources in configuration order.
    pub top_level: Vec<ResourceId>,
    node_by_name: BTreeMap<String, NodeId>,
    rsc_by_name: BTreeMap<String, ResourceId>,
    observed: BTreeMap<String, Observed>,
}

impl WorkingSet {
    /// Returns the node with the given arena id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Mutable access to a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Returns the resource with the given arena id.
    #[must_use]
    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.index()]
    }

    /// Mutable access to a resource.
    pub fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.index()]
    }

    /// Returns the action with the given arena id.
    #[must_use]
    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.index()]
    }

    /// Mutable access to an action.
    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id.index()]
    }

    /// Looks up a node by `uname`.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.node_by_name.get(name).copied()
    }

    /// Looks up a resource by configuration id.
    #[must_use]
    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.rsc_by_name.get(name).copied()
    }

    /// Observed runtime state for a resource or instance name.
    #[must_use]
    pub fn observed(&self, name: &str) -> Option<&Observed> {
        self.observed.get(name)
    }

    /// Appends a resource to the arena, registering its name.
    pub fn push_resource(&mut self, mut rsc: Resource) -> ResourceId {
        let id = ResourceId(u32::try_from(self.resources.len()).unwrap_or(u32::MAX));
        rsc.id = id;
        self.rsc_by_name.insert(rsc.name.clone(), id);
        self.resources.push(rsc);
        id
    }

    /// Appends an action to the arena.
    pub fn push_action(&mut self, mut action: Action) -> ActionId {
        let id = ActionId(u32::try_from(self.actions.len()).unwrap_or(u32::MAX));
        action.id = id;
        self.actions.push(action);
        id
    }

    /// Appends an ordering edge.
    pub fn push_edge(&mut self, first: ActionId, then: ActionId, kind: OrderKind) {
        self.edges.push(ActionEdge { first, then, kind });
    }

    /// Finds an action by resource and task, if one was synthesized.
    #[must_use]
    pub fn find_action(&self, rsc: ResourceId, task: TaskKind) -> Option<ActionId> {
        self.actions
            .iter()
            .find(|a| a.rsc == Some(rsc) && a.task == task && a.interval_ms == 0)
            .map(|a| a.id)
    }

    /// Clears per-run allocator scratch: node counts and provisional flags.
    pub fn reset_run_state(&mut self) {
        for node in &mut self.nodes {
            node.count = 0;
        }
        for rsc in &mut self.resources {
            rsc.provisional = true;
            rsc.allocating = false;
        }
    }

    /// Builds a working set from a CIB XML document taken at `now`.
    ///
    /// Ingest-time invariants: every observed `running_on` node exists in
    /// the membership, and every constraint references configured
    /// resources. Ordering targets are late-bound and resolved after
    /// action synthesis.
    pub fn build(cib_xml: &str, now: SystemTime) -> Result<WorkingSet, SchemaError> {
        let doc = Document::parse(cib_xml)?;
        let root = doc.root_element();
        let mut ws = WorkingSet {
            epoch: EpochTriple {
                admin_epoch: attr_u32(root, "admin_epoch"),
                epoch: attr_u32(root, "epoch"),
                num_updates: attr_u32(root, "num_updates"),
            },
            now_secs: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            ..WorkingSet::default()
        };

        let config = child(root, "configuration");
        if let Some(config) = config {
            if let Some(nodes) = child(config, "nodes") {
                ws.ingest_nodes(nodes);
            }
        }
        // Status is read before resources so node online flags are known,
        // and observed resource state is available when primitives form.
        if let Some(status) = child(root, "status") {
            ws.ingest_status(status)?;
        }
        if let Some(config) = config {
            if let Some(resources) = child(config, "resources") {
                for elem in resources.children().filter(XmlNode::is_element) {
                    let id = ws.ingest_resource(elem, None)?;
                    ws.top_level.push(id);
                }
            }
            if let Some(constraints) = child(config, "constraints") {
                ws.ingest_constraints(constraints)?;
            }
        }
        ws.adopt_orphans();
        ws.expire_failures();
        Ok(ws)
    }

    /// Clears failed flags whose last failure is older than the
    /// resource's `failure-timeout`.
    fn expire_failures(&mut self) {
        let expired: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| r.failed)
            .filter_map(|r| {
                let timeout_secs =
                    u64::from(parse_interval_ms(r.meta.get("failure-timeout")?)) / 1000;
                if timeout_secs == 0 {
                    return None;
                }
                let attr = format!("last-failure-{}", r.name);
                let last_failure = self
                    .nodes
                    .iter()
                    .filter_map(|n| n.attrs.get(&attr)?.parse::<u64>().ok())
                    .max()?;
                (self.now_secs.saturating_sub(last_failure) > timeout_secs).then_some(r.id)
            })
            .collect();
        for id in expired {
            tracing::info!(
                resource = %self.resource(id).name,
                event = "failure-expired",
                "recorded failure is past its failure-timeout; forgetting it"
            );
            self.resource_mut(id).failed = false;
        }
    }

    fn ingest_nodes(&mut self, nodes: XmlNode<'_, '_>) {
        for elem in nodes.children().filter(|c| c.has_tag_name("node")) {
            let uuid = elem.attribute("id").unwrap_or_default().to_string();
            let name = elem.attribute("uname").unwrap_or(&uuid).to_string();
            let kind = match elem.attribute("type") {
                Some("remote") => NodeKind::Remote,
                Some("guest") => NodeKind::Guest,
                _ => NodeKind::Cluster,
            };
            let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
            self.node_by_name.insert(name.clone(), id);
            self.nodes.push(Node {
                id,
                uuid,
                name,
                membership: MembershipState::Pending,
                online: false,
                kind,
                weight: Score::ZERO,
                attrs: BTreeMap::new(),
                count: 0,
            });
        }
    }

    fn ingest_status(&mut self, status: XmlNode<'_, '_>) -> Result<(), SchemaError> {
        for state in status.children().filter(|c| c.has_tag_name("node_state")) {
            let uname = state
                .attribute("uname")
                .ok_or(SchemaError::MissingAttribute {
                    element: "node_state",
                    attribute: "uname",
                })?;
            let node_id = self
                .node_by_name(uname)
                .ok_or_else(|| SchemaError::UnknownNode(uname.to_string()))?;
            let in_ccm = state.attribute("in_ccm") == Some("true");
            let crmd_online = state.attribute("crmd") == Some("online");
            let joined = state.attribute("join") == Some("member");
            {
                let node = self.node_mut(node_id);
                node.membership = if in_ccm {
                    if joined {
                        MembershipState::Member
                    } else {
                        MembershipState::Pending
                    }
                } else {
                    MembershipState::Lost
                };
                node.online = in_ccm && crmd_online && joined;
            }
            self.ingest_transient_attrs(state, node_id);
            self.ingest_lrm(state, node_id);
        }
        for tickets in status.children().filter(|c| c.has_tag_name("tickets")) {
            for t in tickets.children().filter(|c| c.has_tag_name("ticket_state")) {
                let name = t.attribute("id").unwrap_or_default().to_string();
                let state = if t.attribute("granted") == Some("true") {
                    TicketState::Granted
                } else {
                    TicketState::Revoked
                };
                self.tickets.push(Ticket {
                    name,
                    state,
                    resources: Vec::new(),
                });
            }
        }
        Ok(())
    }

    fn ingest_transient_attrs(&mut self, state: XmlNode<'_, '_>, node_id: NodeId) {
        for attrs in state
            .children()
            .filter(|c| c.has_tag_name("transient_attributes"))
        {
            for nvpair in attrs.descendants().filter(|c| c.has_tag_name("nvpair")) {
                let (Some(name), Some(value)) =
                    (nvpair.attribute("name"), nvpair.attribute("value"))
                else {
                    continue;
                };
                if let Some(rsc) = name.strip_prefix("fail-count-") {
                    if value != "0" {
                        self.observed.entry(rsc.to_string()).or_default().failed = true;
                    }
                }
                self.node_mut(node_id)
                    .attrs
                    .insert(name.to_string(), value.to_string());
            }
        }
    }

    fn ingest_lrm(&mut self, state: XmlNode<'_, '_>, node_id: NodeId) {
        for lrm_rsc in state
            .descendants()
            .filter(|c| c.has_tag_name("lrm_resource"))
        {
            let Some(name) = lrm_rsc.attribute("id") else {
                continue;
            };
            let mut role: Option<RscRole> = None;
            let mut failed = false;
            for op in lrm_rsc.children().filter(|c| c.has_tag_name("lrm_rsc_op")) {
                let operation = op.attribute("operation").unwrap_or_default();
                let rc: i32 = op
                    .attribute("rc-code")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(-1);
                match (operation, rc) {
                    ("start", 0) => role = Some(RscRole::Started),
                    ("promote", 0) => role = Some(RscRole::Promoted),
                    ("demote", 0) => role = Some(RscRole::Unpromoted),
                    ("stop", 0) => role = Some(RscRole::Stopped),
                    ("monitor", 0) => {
                        if role.is_none() {
                            role = Some(RscRole::Started);
                        }
                    }
                    // rc 7 "not running" is a clean probe miss, not a failure
                    ("monitor", 7) => {
                        if role.is_none() {
                            role = Some(RscRole::Stopped);
                        }
                    }
                    (_, 0) => {}
                    _ => failed = true,
                }
            }
            let entry = self.observed.entry(name.to_string()).or_default();
            if failed {
                entry.failed = true;
            }
            if let Some(role) = role {
                entry.role = Some(role);
                // History is append-only: a later block saying Stopped
                // overrides an earlier block that saw the resource active.
                if role == RscRole::Stopped {
                    entry.running_on.retain(|n| *n != node_id);
                } else if !entry.running_on.contains(&node_id) {
                    entry.running_on.push(node_id);
                }
            }
        }
    }

    fn ingest_resource(
        &mut self,
        elem: XmlNode<'_, '_>,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId, SchemaError> {
        match elem.tag_name().name() {
            "primitive" => self.ingest_primitive(elem, parent),
            "group" => self.ingest_group(elem),
            "clone" | "master" => self.ingest_clone(elem),
            "bundle" => self.ingest_bundle(elem),
            other => Err(SchemaError::UnknownVariant(other.to_string())),
        }
    }

    fn ingest_primitive(
        &mut self,
        elem: XmlNode<'_, '_>,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId, SchemaError> {
        let name = require_attr(elem, "primitive", "id")?;
        let meta = collect_meta(elem);
        let stickiness = meta_score(&meta, "resource-stickiness", "primitive")?;
        let priority = meta_score(&meta, "priority", "primitive")?;
        let ops = elem
            .children()
            .filter(|c| c.has_tag_name("operations"))
            .flat_map(|ops| ops.children().filter(|c| c.has_tag_name("op")))
            .filter_map(|op| {
                Some(RecurringOp {
                    name: op.attribute("name")?.to_string(),
                    interval_ms: parse_interval_ms(op.attribute("interval").unwrap_or("0")),
                    timeout_ms: parse_interval_ms(op.attribute("timeout").unwrap_or("20s")),
                })
            })
            .collect();
        let observed = self.observed.get(&name).cloned().unwrap_or_default();
        let target_role = meta.get("target-role").map_or(RscRole::Unknown, |v| {
            RscRole::parse(v)
        });
        let managed = meta.get("is-managed").map(String::as_str) != Some("false");
        let primitive = Primitive {
            class: elem.attribute("class").unwrap_or("ocf").to_string(),
            provider: elem.attribute("provider").map(str::to_string),
            agent: elem.attribute("type").unwrap_or_default().to_string(),
            allowed: BTreeMap::new(),
            running_on: observed.running_on.clone(),
            role: observed.role.unwrap_or(RscRole::Unknown),
            next_role: target_role,
            next_node: None,
            stickiness: stickiness.unwrap_or(Score::ZERO),
            promotion: BTreeMap::new(),
            ops,
        };
        let id = self.push_resource(Resource {
            id: ResourceId(0),
            name,
            parent,
            meta,
            orphan: false,
            managed,
            provisional: true,
            allocating: false,
            failed: observed.failed,
            blocked: false,
            priority: priority.unwrap_or(Score::ZERO),
            variant: ResourceVariant::Primitive(primitive),
            this_with: Vec::new(),
            with_this: Vec::new(),
        });
        self.apply_promotion_attrs(id);
        Ok(id)
    }

    /// Copies per-node `master-<rsc>` transient attributes into the
    /// primitive's promotion score map.
    fn apply_promotion_attrs(&mut self, id: ResourceId) {
        let name = self.resource(id).name.clone();
        let attr = format!("master-{name}");
        let scores: Vec<(NodeId, Score)> = self
            .nodes
            .iter()
            .filter_map(|n| {
                let value = n.attrs.get(&attr)?;
                Score::parse(value).ok().map(|s| (n.id, s))
            })
            .collect();
        if let Some(prim) = self.resource_mut(id).as_primitive_mut() {
            for (node, score) in scores {
                prim.promotion.insert(node, score);
            }
        }
    }

    fn ingest_group(&mut self, elem: XmlNode<'_, '_>) -> Result<ResourceId, SchemaError> {
        let name = require_attr(elem, "group", "id")?;
        let meta = collect_meta(elem);
        let managed = meta.get("is-managed").map(String::as_str) != Some("false");
        let id = self.push_resource(Resource {
            id: ResourceId(0),
            name,
            parent: None,
            meta,
            orphan: false,
            managed,
            provisional: true,
            allocating: false,
            failed: false,
            blocked: false,
            priority: Score::ZERO,
            variant: ResourceVariant::Group {
                children: Vec::new(),
            },
            this_with: Vec::new(),
            with_this: Vec::new(),
        });
        let mut children = Vec::new();
        for c in elem.children().filter(|c| c.has_tag_name("primitive")) {
            children.push(self.ingest_primitive(c, Some(id))?);
        }
        if let ResourceVariant::Group {
            children: ref mut slot,
        } = self.resource_mut(id).variant
        {
            *slot = children;
        }
        Ok(id)
    }

    fn ingest_clone(&mut self, elem: XmlNode<'_, '_>) -> Result<ResourceId, SchemaError> {
        let name = require_attr(elem, "clone", "id")?;
        let meta = collect_meta(elem);
        let managed = meta.get("is-managed").map(String::as_str) != Some("false");
        let max_total = meta_u32(&meta, "clone-max").unwrap_or_else(|| {
            u32::try_from(self.nodes.len()).unwrap_or(1).max(1)
        });
        let max_per_node = meta_u32(&meta, "clone-node-max").unwrap_or(1);
        let promotable = (elem.has_tag_name("master")
            || meta.get("promotable").map(String::as_str) == Some("true"))
        .then(|| PromotableSpec {
            promoted_max: meta_u32(&meta, "promoted-max").unwrap_or(1),
        });
        let interleave = meta.get("interleave").map(String::as_str) == Some("true");
        let notify = meta.get("notify").map(String::as_str) == Some("true");
        let id = self.push_resource(Resource {
            id: ResourceId(0),
            name,
            parent: None,
            meta,
            orphan: false,
            managed,
            provisional: true,
            allocating: false,
            failed: false,
            blocked: false,
            priority: Score::ZERO,
            variant: ResourceVariant::Clone(CloneSpec {
                template: ResourceId(0),
                instances: Vec::new(),
                max_total,
                max_per_node,
                promotable,
                interleave,
                notify,
            }),
            this_with: Vec::new(),
            with_this: Vec::new(),
        });
        let template = elem
            .children()
            .find(|c| c.has_tag_name("primitive"))
            .map(|c| self.ingest_primitive(c, Some(id)))
            .transpose()?
            .unwrap_or(ResourceId(0));
        if let ResourceVariant::Clone(ref mut spec) = self.resource_mut(id).variant {
            spec.template = template;
        }
        Ok(id)
    }

    fn ingest_bundle(&mut self, elem: XmlNode<'_, '_>) -> Result<ResourceId, SchemaError> {
        let name = require_attr(elem, "bundle", "id")?;
        let meta = collect_meta(elem);
        let managed = meta.get("is-managed").map(String::as_str) != Some("false");
        let container = elem
            .children()
            .find(|c| c.has_tag_name("docker") || c.has_tag_name("podman"));
        let replicas = container
            .and_then(|c| c.attribute("replicas"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let image = container
            .and_then(|c| c.attribute("image"))
            .unwrap_or_default()
            .to_string();
        let id = self.push_resource(Resource {
            id: ResourceId(0),
            name,
            parent: None,
            meta,
            orphan: false,
            managed,
            provisional: true,
            allocating: false,
            failed: false,
            blocked: false,
            priority: Score::ZERO,
            variant: ResourceVariant::Bundle(BundleSpec {
                template: ResourceId(0),
                instances: Vec::new(),
                replicas,
                image,
            }),
            this_with: Vec::new(),
            with_this: Vec::new(),
        });
        let template = elem
            .children()
            .find(|c| c.has_tag_name("primitive"))
            .map(|c| self.ingest_primitive(c, Some(id)))
            .transpose()?
            .unwrap_or(ResourceId(0));
        if let ResourceVariant::Bundle(ref mut spec) = self.resource_mut(id).variant {
            spec.template = template;
        }
        Ok(id)
    }

    fn ingest_constraints(&mut self, constraints: XmlNode<'_, '_>) -> Result<(), SchemaError> {
        for elem in constraints.children().filter(XmlNode::is_element) {
            match elem.tag_name().name() {
                "rsc_colocation" => self.ingest_colocation(elem)?,
                "rsc_order" => self.ingest_order(elem)?,
                "rsc_location" => self.ingest_location(elem)?,
                "rsc_ticket" => self.ingest_ticket(elem)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn lookup_rsc(&self, constraint: &str, name: &str) -> Result<ResourceId, SchemaError> {
        self.resource_by_name(name)
            .ok_or_else(|| SchemaError::UnknownResource {
                constraint: constraint.to_string(),
                resource: name.to_string(),
            })
    }

    fn ingest_colocation(&mut self, elem: XmlNode<'_, '_>) -> Result<(), SchemaError> {
        let name = require_attr(elem, "rsc_colocation", "id")?;
        let dependent = self.lookup_rsc(&name, elem.attribute("rsc").unwrap_or_default())?;
        let primary = self.lookup_rsc(&name, elem.attribute("with-rsc").unwrap_or_default())?;
        let score = Score::parse(elem.attribute("score").unwrap_or("0")).map_err(|source| {
            SchemaError::BadScore {
                element: "rsc_colocation",
                source,
            }
        })?;
        let id = ConstraintId(u32::try_from(self.colocations.len()).unwrap_or(u32::MAX));
        self.colocations.push(Colocation {
            id,
            name,
            dependent,
            primary,
            score,
            dependent_role: elem
                .attribute("rsc-role")
                .map_or(RscRole::Unknown, RscRole::parse),
            primary_role: elem
                .attribute("with-rsc-role")
                .map_or(RscRole::Unknown, RscRole::parse),
            influence: elem.attribute("influence") != Some("false"),
        });
        self.resource_mut(dependent).this_with.push(id);
        self.resource_mut(primary).with_this.push(id);
        Ok(())
    }

    fn ingest_order(&mut self, elem: XmlNode<'_, '_>) -> Result<(), SchemaError> {
        let name = require_attr(elem, "rsc_order", "id")?;
        let first_rsc = self.lookup_rsc(&name, elem.attribute("first").unwrap_or_default())?;
        let then_rsc = self.lookup_rsc(&name, elem.attribute("then").unwrap_or_default())?;
        let parse_task = |attr: Option<&str>| -> Result<TaskKind, SchemaError> {
            let text = attr.unwrap_or("start");
            TaskKind::parse(text).ok_or_else(|| SchemaError::UnknownTask {
                constraint: name.clone(),
                task: text.to_string(),
            })
        };
        let first_task = parse_task(elem.attribute("first-action"))?;
        let then_task = parse_task(elem.attribute("then-action"))?;
        let mut kind = match elem.attribute("kind") {
            Some("Optional") => OrderKind::OPTIONAL,
            Some("Serialize") => OrderKind::SERIALIZE,
            _ => OrderKind::IMPLIES_THEN | OrderKind::RUNNABLE_LEFT,
        };
        if elem.attribute("symmetrical") == Some("false") {
            kind = kind | OrderKind::ASYMMETRIC;
        }
        let id = ConstraintId(u32::try_from(self.orderings.len()).unwrap_or(u32::MAX));
        self.orderings.push(OrderingSpec {
            id,
            name,
            first_rsc,
            first_task,
            then_rsc,
            then_task,
            kind,
        });
        Ok(())
    }

    fn ingest_location(&mut self, elem: XmlNode<'_, '_>) -> Result<(), SchemaError> {
        let name = require_attr(elem, "rsc_location", "id")?;
        let rsc = self.lookup_rsc(&name, elem.attribute("rsc").unwrap_or_default())?;
        let Some(node_name) = elem.attribute("node") else {
            return Ok(());
        };
        let node = self
            .node_by_name(node_name)
            .ok_or_else(|| SchemaError::UnknownNode(node_name.to_string()))?;
        let score = Score::parse(elem.attribute("score").unwrap_or("0")).map_err(|source| {
            SchemaError::BadScore {
                element: "rsc_location",
                source,
            }
        })?;
        self.locations.push(LocationPref { rsc, node, score });
        Ok(())
    }

    fn ingest_ticket(&mut self, elem: XmlNode<'_, '_>) -> Result<(), SchemaError> {
        let name = require_attr(elem, "rsc_ticket", "id")?;
        let rsc = self.lookup_rsc(&name, elem.attribute("rsc").unwrap_or_default())?;
        let ticket_name = elem.attribute("ticket").unwrap_or_default();
        if let Some(ticket) = self.tickets.iter_mut().find(|t| t.name == ticket_name) {
            ticket.resources.push(rsc);
        } else {
            // Constrained to a ticket the status has never granted.
            self.tickets.push(Ticket {
                name: ticket_name.to_string(),
                state: TicketState::Revoked,
                resources: vec![rsc],
            });
        }
        Ok(())
    }

    /// Creates stop-only primitives for status entries with no
    /// configuration counterpart.
    fn adopt_orphans(&mut self) {
        let orphan_names: Vec<String> = self
            .observed
            .iter()
            .filter(|(name, obs)| {
                !obs.running_on.is_empty()
                    && !name.contains(':')
                    && !self.rsc_by_name.contains_key(*name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in orphan_names {
            let observed = self.observed.get(&name).cloned().unwrap_or_default();
            tracing::warn!(resource = %name, event = "orphan-adopted", "status records resource absent from configuration");
            let id = self.push_resource(Resource {
                id: ResourceId(0),
                name,
                parent: None,
                meta: BTreeMap::new(),
                orphan: true,
                managed: true,
                provisional: true,
                allocating: false,
                failed: observed.failed,
                blocked: false,
                priority: Score::ZERO,
                variant: ResourceVariant::Primitive(Primitive {
                    class: "ocf".to_string(),
                    provider: None,
                    agent: String::new(),
                    allowed: BTreeMap::new(),
                    running_on: observed.running_on.clone(),
                    role: observed.role.unwrap_or(RscRole::Unknown),
                    next_role: RscRole::Stopped,
                    next_node: None,
                    stickiness: Score::ZERO,
                    promotion: BTreeMap::new(),
                    ops: Vec::new(),
                }),
                this_with: Vec::new(),
                with_this: Vec::new(),
            });
            self.top_level.push(id);
        }
    }
}

fn child<'a>(parent: XmlNode<'a, 'a>, name: &str) -> Option<XmlNode<'a, 'a>> {
    parent.children().find(|c| c.has_tag_name(name))
}

fn attr_u32(elem: XmlNode<'_, '_>, name: &str) -> u32 {
    elem.attribute(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn require_attr(
    elem: XmlNode<'_, '_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<String, SchemaError> {
    elem.attribute(attribute)
        .map(str::to_string)
        .ok_or(SchemaError::MissingAttribute { element, attribute })
}

fn collect_meta(elem: XmlNode<'_, '_>) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    for attrs in elem
        .children()
        .filter(|c| c.has_tag_name("meta_attributes"))
    {
        for nvpair in attrs.children().filter(|c| c.has_tag_name("nvpair")) {
            if let (Some(name), Some(value)) =
                (nvpair.attribute("name"), nvpair.attribute("value"))
            {
                meta.insert(name.to_string(), value.to_string());
            }
        }
    }
    meta
}

fn meta_u32(meta: &BTreeMap<String, String>, key: &str) -> Option<u32> {
    meta.get(key).and_then(|v| v.parse().ok())
}

fn meta_score(
    meta: &BTreeMap<String, String>,
    key: &str,
    element: &'static str,
) -> Result<Option<Score>, SchemaError> {
    meta.get(key)
        .map(|v| {
            Score::parse(v).map_err(|source| SchemaError::BadScore { element, source })
        })
        .transpose()
}

/// Parses an interval/timeout attribute: bare milliseconds, `<n>s`, or
/// `<n>ms`.
#[must_use]
pub fn parse_interval_ms(text: &str) -> u32 {
    let trimmed = text.trim();
    if let Some(seconds) = trimmed.strip_suffix('s').and_then(|t| {
        t.strip_suffix('m').map_or_else(
            || t.parse::<u32>().ok().map(|n| n * 1000),
            |ms| ms.parse::<u32>().ok(),
        )
    }) {
        return seconds;
    }
    trimmed.parse().unwrap_or(0)
}
