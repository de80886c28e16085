use crate::domain::condition::ConditionRule;
use crate::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Value object: Template ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Value object: Node ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Named output port on a node
///
/// Edges attach to ports, not to bare nodes: approval nodes route through
/// `approve`/`reject`, conditional nodes through rule-labeled ports, and
/// everything else through the single `default` port. Flattening this into a
/// plain node-to-node edge list would lose branch semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPort {
    /// Single implicit port on start, role, and form nodes
    Default,
    /// Approval node resolved positively
    Approve,
    /// Approval node resolved negatively (send-back)
    Reject,
    /// Rule-labeled port on a conditional node
    Rule(String),
}

impl OutputPort {
    /// Port label as recorded in history entries and logs
    pub fn label(&self) -> &str {
        match self {
            OutputPort::Default => "default",
            OutputPort::Approve => "approve",
            OutputPort::Reject => "reject",
            OutputPort::Rule(name) => name,
        }
    }
}

/// Settings for approval nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    /// Distinct approve votes needed to resolve the node positively
    pub required_approvals: u32,

    /// Whether a single reject vote resolves the node to the reject port
    #[serde(default)]
    pub allow_send_back: bool,

    /// Whether non-counting feedback votes may be attached
    #[serde(default)]
    pub allow_feedback: bool,
}

/// One field collected by a form node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Fact name the submitted value is stored under
    pub name: String,

    /// Human-readable label
    #[serde(default)]
    pub label: Option<String>,

    /// Whether a submission must include this field
    #[serde(default)]
    pub required: bool,
}

/// Settings for form nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSettings {
    /// Declared field schema
    pub fields: Vec<FieldSchema>,
}

impl FormSettings {
    /// Validate a submitted payload against the declared fields
    pub fn validate_values(&self, values: &HashMap<String, Value>) -> Result<(), EngineError> {
        for field in &self.fields {
            if field.required && !values.contains_key(&field.name) {
                return Err(EngineError::ValidationError(format!(
                    "missing required form field: {}",
                    field.name
                )));
            }
        }

        for name in values.keys() {
            if !self.fields.iter().any(|field| &field.name == name) {
                return Err(EngineError::ValidationError(format!(
                    "unknown form field: {}",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Settings for conditional nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalSettings {
    /// Routing rules, evaluated in declared order
    pub rules: Vec<ConditionRule>,

    /// Port chosen when no rule matches
    #[serde(default)]
    pub default_port: Option<String>,
}

/// Node type tag with type-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry marker; no side effects and no assignable action
    Start,
    /// Handoff to a role; advances when the assignee signals completion
    Role,
    /// Multi-party approval gate
    Approval(ApprovalSettings),
    /// Collects field values into the instance fact set
    Form(FormSettings),
    /// Routes by evaluating rules against the fact set
    Conditional(ConditionalSettings),
    /// Terminal marker; completes the instance
    End,
}

impl NodeKind {
    /// The type tag as a string, for messages and logs
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Role => "role",
            NodeKind::Approval(_) => "approval",
            NodeKind::Form(_) => "form",
            NodeKind::Conditional(_) => "conditional",
            NodeKind::End => "end",
        }
    }

    /// Whether an instance parks on this node waiting for a person
    pub fn requires_human_action(&self) -> bool {
        matches!(
            self,
            NodeKind::Role | NodeKind::Approval(_) | NodeKind::Form(_)
        )
    }
}

/// A typed step in a template graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique node id within the template
    pub id: NodeId,

    /// Human-readable label
    pub label: String,

    /// Role or department identifier used for assignment resolution
    #[serde(default)]
    pub entity_ref: Option<String>,

    /// Type tag and type-specific settings
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// A directed connection from a node's output port to a target node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Source node
    pub source: NodeId,

    /// Output port on the source node
    pub port: OutputPort,

    /// Target node
    pub target: NodeId,
}

/// A reusable workflow graph definition (live, editable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// ID of the template
    pub id: TemplateId,

    /// Human-readable name
    pub name: String,

    /// The template version
    pub version: String,

    /// The nodes in this template
    pub nodes: Vec<NodeDefinition>,

    /// The edges in this template; declared order breaks ties
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowTemplate {
    /// Validate the template graph
    ///
    /// Checks the structural invariants an instance relies on: exactly one
    /// start node, no dangling edge endpoints, reachability from start, one
    /// outgoing edge per required port, and valid entity references on role
    /// and approval nodes.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.nodes.is_empty() {
            return Err(EngineError::InvalidTemplate(
                "template has no nodes".to_string(),
            ));
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(&node.id) {
                return Err(EngineError::InvalidTemplate(format!(
                    "duplicate node id: {}",
                    node.id.0
                )));
            }
        }

        for edge in &self.edges {
            if !node_ids.contains(&edge.source) {
                return Err(EngineError::InvalidTemplate(format!(
                    "edge references unknown source node: {}",
                    edge.source.0
                )));
            }
            if !node_ids.contains(&edge.target) {
                return Err(EngineError::InvalidTemplate(format!(
                    "edge references unknown target node: {}",
                    edge.target.0
                )));
            }
        }

        let start_nodes: Vec<&NodeDefinition> = self
            .nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::Start))
            .collect();
        let start = match start_nodes.as_slice() {
            [] => {
                return Err(EngineError::InvalidTemplate(
                    "template has no start node".to_string(),
                ))
            }
            [start] => *start,
            _ => {
                return Err(EngineError::InvalidTemplate(
                    "template has more than one start node".to_string(),
                ))
            }
        };

        for edge in &self.edges {
            if edge.target == start.id {
                return Err(EngineError::InvalidTemplate(format!(
                    "start node {} cannot be an edge target",
                    start.id.0
                )));
            }
        }

        for node in &self.nodes {
            self.validate_node(node)?;
        }

        self.check_reachability(&start.id)?;

        Ok(())
    }

    /// Validate a single node's settings, entity reference, and ports
    fn validate_node(&self, node: &NodeDefinition) -> Result<(), EngineError> {
        match &node.kind {
            NodeKind::Role => {
                if node.entity_ref.as_deref().unwrap_or("").is_empty() {
                    return Err(EngineError::InvalidTemplate(format!(
                        "role node {} is missing an entity reference",
                        node.id.0
                    )));
                }
            }
            NodeKind::Approval(settings) => {
                if node.entity_ref.as_deref().unwrap_or("").is_empty() {
                    return Err(EngineError::InvalidTemplate(format!(
                        "approval node {} is missing an entity reference",
                        node.id.0
                    )));
                }
                if settings.required_approvals == 0 {
                    return Err(EngineError::InvalidTemplate(format!(
                        "approval node {} must require at least one approval",
                        node.id.0
                    )));
                }
            }
            NodeKind::End => {
                if self.edges.iter().any(|edge| edge.source == node.id) {
                    return Err(EngineError::InvalidTemplate(format!(
                        "end node {} has outgoing edges",
                        node.id.0
                    )));
                }
                return Ok(());
            }
            _ => {}
        }

        for port in required_ports(node) {
            let has_edge = self
                .edges
                .iter()
                .any(|edge| edge.source == node.id && edge.port == port);
            if !has_edge {
                return Err(EngineError::InvalidTemplate(format!(
                    "node {} has no outgoing edge on port {}",
                    node.id.0,
                    port.label()
                )));
            }
        }

        Ok(())
    }

    /// Check that every node is reachable from the start node
    fn check_reachability(&self, start: &NodeId) -> Result<(), EngineError> {
        let mut outgoing: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for edge in &self.edges {
            outgoing.entry(&edge.source).or_default().push(&edge.target);
        }

        let mut reached = HashSet::new();
        let mut queue = VecDeque::new();
        reached.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if let Some(targets) = outgoing.get(current) {
                for target in targets {
                    if reached.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }

        for node in &self.nodes {
            if !reached.contains(&node.id) {
                return Err(EngineError::InvalidTemplate(format!(
                    "node {} is unreachable from the start node",
                    node.id.0
                )));
            }
        }

        Ok(())
    }
}

/// Ports a node must have an outgoing edge on
fn required_ports(node: &NodeDefinition) -> Vec<OutputPort> {
    match &node.kind {
        NodeKind::Start | NodeKind::Role | NodeKind::Form(_) => vec![OutputPort::Default],
        NodeKind::Approval(settings) => {
            let mut ports = vec![OutputPort::Approve];
            if settings.allow_send_back {
                ports.push(OutputPort::Reject);
            }
            ports
        }
        NodeKind::Conditional(settings) => {
            let mut ports = Vec::new();
            for rule in &settings.rules {
                let port = OutputPort::Rule(rule.port.clone());
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
            if let Some(default_port) = &settings.default_port {
                let port = OutputPort::Rule(default_port.clone());
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
            ports
        }
        NodeKind::End => Vec::new(),
    }
}

/// An immutable copy of a template graph, taken when an instance starts
///
/// A running instance only ever reads its snapshot; edits to the live
/// template after capture cannot alias into running instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    /// Template the snapshot was captured from
    pub template_id: TemplateId,

    /// Template version at capture time
    pub template_version: String,

    /// Frozen nodes
    pub nodes: Vec<NodeDefinition>,

    /// Frozen edges, in declared order
    pub edges: Vec<EdgeDefinition>,
}

impl TemplateSnapshot {
    /// Validate the template and deep-copy its graph
    pub fn capture(template: &WorkflowTemplate) -> Result<Self, EngineError> {
        template.validate()?;

        Ok(Self {
            template_id: template.id.clone(),
            template_version: template.version.clone(),
            nodes: template.nodes.clone(),
            edges: template.edges.clone(),
        })
    }

    /// Look up a node by id
    pub fn node(&self, id: &NodeId) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// The single start node of the frozen graph
    pub fn start_node(&self) -> Option<&NodeDefinition> {
        self.nodes
            .iter()
            .find(|node| matches!(node.kind, NodeKind::Start))
    }

    /// Resolve the edge attached to an output port
    ///
    /// When a malformed template declares several edges on one port, the
    /// first edge in declared order wins.
    pub fn resolve_edge(&self, source: &NodeId, port: &OutputPort) -> Option<&EdgeDefinition> {
        self.edges
            .iter()
            .find(|edge| &edge.source == source && &edge.port == port)
    }

    /// Number of nodes in the frozen graph
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::Comparison;

    fn node(id: &str, kind: NodeKind) -> NodeDefinition {
        NodeDefinition {
            id: NodeId(id.to_string()),
            label: id.to_string(),
            entity_ref: None,
            kind,
        }
    }

    fn staffed_node(id: &str, entity_ref: &str, kind: NodeKind) -> NodeDefinition {
        NodeDefinition {
            entity_ref: Some(entity_ref.to_string()),
            ..node(id, kind)
        }
    }

    fn edge(source: &str, port: OutputPort, target: &str) -> EdgeDefinition {
        EdgeDefinition {
            source: NodeId(source.to_string()),
            port,
            target: NodeId(target.to_string()),
        }
    }

    fn approval_settings(required: u32) -> ApprovalSettings {
        ApprovalSettings {
            required_approvals: required,
            allow_send_back: false,
            allow_feedback: false,
        }
    }

    fn linear_template() -> WorkflowTemplate {
        WorkflowTemplate {
            id: TemplateId("tpl-1".to_string()),
            name: "Review".to_string(),
            version: "1".to_string(),
            nodes: vec![
                node("start", NodeKind::Start),
                staffed_node("draft", "engineers", NodeKind::Role),
                staffed_node(
                    "review",
                    "managers",
                    NodeKind::Approval(approval_settings(2)),
                ),
                node("done", NodeKind::End),
            ],
            edges: vec![
                edge("start", OutputPort::Default, "draft"),
                edge("draft", OutputPort::Default, "review"),
                edge("review", OutputPort::Approve, "done"),
            ],
        }
    }

    #[test]
    fn test_valid_template_passes() {
        assert!(linear_template().validate().is_ok());
    }

    #[test]
    fn test_missing_start_node() {
        let mut template = linear_template();
        template.nodes.retain(|n| n.id.0 != "start");
        template.edges.retain(|e| e.source.0 != "start");

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("no start node"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_two_start_nodes() {
        let mut template = linear_template();
        template.nodes.push(node("start2", NodeKind::Start));

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("more than one start node"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_duplicate_node_ids() {
        let mut template = linear_template();
        template.nodes.push(node("draft", NodeKind::End));

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("duplicate node id"));
                assert!(msg.contains("draft"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_dangling_edge_target() {
        let mut template = linear_template();
        template
            .edges
            .push(edge("draft", OutputPort::Default, "nowhere"));

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("unknown target node"));
                assert!(msg.contains("nowhere"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_unreachable_node() {
        let mut template = linear_template();
        template.nodes.push(staffed_node(
            "orphan",
            "engineers",
            NodeKind::Role,
        ));
        template.edges.push(edge("orphan", OutputPort::Default, "done"));

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("unreachable"));
                assert!(msg.contains("orphan"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_missing_required_port_edge() {
        let mut template = linear_template();
        // Drop the approval node's approve edge: no path to the end remains.
        template.edges.retain(|e| e.source.0 != "review");

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("no outgoing edge on port approve"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_send_back_requires_reject_edge() {
        let mut template = linear_template();
        for node in &mut template.nodes {
            if let NodeKind::Approval(settings) = &mut node.kind {
                settings.allow_send_back = true;
            }
        }

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("no outgoing edge on port reject"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }

        template
            .edges
            .push(edge("review", OutputPort::Reject, "draft"));
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_role_node_requires_entity_ref() {
        let mut template = linear_template();
        for node in &mut template.nodes {
            if node.id.0 == "draft" {
                node.entity_ref = None;
            }
        }

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("missing an entity reference"));
                assert!(msg.contains("draft"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_approval_requires_nonzero_threshold() {
        let mut template = linear_template();
        for node in &mut template.nodes {
            if let NodeKind::Approval(settings) = &mut node.kind {
                settings.required_approvals = 0;
            }
        }

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("at least one approval"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_end_node_must_not_have_outgoing_edges() {
        let mut template = linear_template();
        template.edges.push(edge("done", OutputPort::Default, "draft"));

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("has outgoing edges"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_start_node_cannot_be_edge_target() {
        let mut template = linear_template();
        template.edges.push(edge("draft", OutputPort::Default, "start"));

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("cannot be an edge target"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_conditional_requires_edge_per_rule_port() {
        let mut template = linear_template();
        template.nodes.push(node(
            "route",
            NodeKind::Conditional(ConditionalSettings {
                rules: vec![ConditionRule {
                    fact: "budget".to_string(),
                    comparison: Comparison::GreaterThan(5000.0),
                    port: "high".to_string(),
                }],
                default_port: Some("low".to_string()),
            }),
        ));
        template.nodes.push(node("high", NodeKind::End));
        template.edges = vec![
            edge("start", OutputPort::Default, "draft"),
            edge("draft", OutputPort::Default, "review"),
            edge("review", OutputPort::Approve, "route"),
            edge("route", OutputPort::Rule("high".to_string()), "high"),
            // No edge for the declared default port "low".
        ];
        template.nodes.retain(|n| n.id.0 != "done");

        let result = template.validate();
        match result {
            Err(EngineError::InvalidTemplate(msg)) => {
                assert!(msg.contains("no outgoing edge on port low"));
            }
            _ => panic!("Expected InvalidTemplate"),
        }
    }

    #[test]
    fn test_snapshot_capture_rejects_invalid_template() {
        let mut template = linear_template();
        template.nodes.retain(|n| n.id.0 != "start");
        template.edges.retain(|e| e.source.0 != "start");

        assert!(matches!(
            TemplateSnapshot::capture(&template),
            Err(EngineError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_snapshot_is_isolated_from_template_edits() {
        let mut template = linear_template();
        let snapshot = TemplateSnapshot::capture(&template).unwrap();

        // Mutate the live template after capture.
        template.nodes.retain(|n| n.id.0 != "review");
        template.edges.retain(|e| e.source.0 != "review");
        template.edges.pop();

        assert_eq!(snapshot.node_count(), 4);
        assert!(snapshot.node(&NodeId("review".to_string())).is_some());
        assert!(snapshot
            .resolve_edge(&NodeId("review".to_string()), &OutputPort::Approve)
            .is_some());
    }

    #[test]
    fn test_resolve_edge_first_declared_wins() {
        let mut template = linear_template();
        // Duplicate edge on the same port; the first declared one must win.
        template.edges.push(edge("draft", OutputPort::Default, "done"));
        let snapshot = TemplateSnapshot::capture(&template).unwrap();

        let edge = snapshot
            .resolve_edge(&NodeId("draft".to_string()), &OutputPort::Default)
            .unwrap();
        assert_eq!(edge.target.0, "review");
    }

    #[test]
    fn test_form_settings_validate_values() {
        let settings = FormSettings {
            fields: vec![
                FieldSchema {
                    name: "budget".to_string(),
                    label: Some("Budget".to_string()),
                    required: true,
                },
                FieldSchema {
                    name: "note".to_string(),
                    label: None,
                    required: false,
                },
            ],
        };

        let mut values = HashMap::new();
        values.insert("budget".to_string(), serde_json::json!(6000));
        assert!(settings.validate_values(&values).is_ok());

        let empty = HashMap::new();
        match settings.validate_values(&empty) {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("missing required form field: budget"));
            }
            _ => panic!("Expected ValidationError"),
        }

        values.insert("surprise".to_string(), serde_json::json!(true));
        match settings.validate_values(&values) {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("unknown form field: surprise"));
            }
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_node_definition_serialization() {
        let node = staffed_node(
            "review",
            "managers",
            NodeKind::Approval(ApprovalSettings {
                required_approvals: 2,
                allow_send_back: true,
                allow_feedback: false,
            }),
        );

        let serialized = serde_json::to_value(&node).unwrap();
        assert_eq!(serialized["type"], "approval");
        assert_eq!(serialized["required_approvals"], 2);
        assert_eq!(serialized["entity_ref"], "managers");

        let deserialized: NodeDefinition = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized, node);
    }

    #[test]
    fn test_output_port_labels() {
        assert_eq!(OutputPort::Default.label(), "default");
        assert_eq!(OutputPort::Approve.label(), "approve");
        assert_eq!(OutputPort::Reject.label(), "reject");
        assert_eq!(OutputPort::Rule("high".to_string()).label(), "high");
    }
}
