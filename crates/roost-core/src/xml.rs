// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire-compatible XML codec for the transition graph.
//!
//! Schema: `<transition_graph>` carrying `<synapse id priority>` elements,
//! each with exactly one `<action_set>` (holding one of `<rsc_op>`,
//! `<pseudo_event>`, `<crm_event>`) and at most one `<inputs>` block of
//! `<trigger>` references. Attribute order within an element is fixed by
//! the writer but not significant to the reader.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node as XmlNode};
use thiserror::Error;

use crate::graph::{GraphAction, GraphActionKind, Synapse, TransitionGraph};

/// Errors raised by the graph XML codec.
#[derive(Debug, Error)]
pub enum GraphXmlError {
    /// The document is not well-formed XML.
    #[error("malformed transition graph document: {0}")]
    Xml(#[from] roxmltree::Error),
    /// Writing the document failed.
    #[error("failed to serialize transition graph: {0}")]
    Write(#[from] quick_xml::Error),
    /// The serialized bytes are not UTF-8.
    #[error("serialized transition graph is not valid UTF-8")]
    Encoding,
    /// A required element is missing.
    #[error("synapse {synapse} is missing element <{element}>")]
    MissingElement {
        /// Synapse id, or `u32::MAX` when unknown.
        synapse: u32,
        /// Missing element name.
        element: &'static str,
    },
    /// A required attribute is missing or unparsable.
    #[error("element <{element}> has a missing or malformed {attribute:?} attribute")]
    BadAttribute {
        /// Element name.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
    },
}

/// Structural `CRM_meta_*` keys the codec owns; everything else in
/// `<attributes>` round-trips through [`GraphAction::attrs`].
const STRUCTURAL_META: [&str; 5] = [
    "CRM_meta_on_node",
    "CRM_meta_on_node_uuid",
    "CRM_meta_timeout",
    "CRM_meta_interval",
    "CRM_meta_name",
];

/// Serializes a transition graph to its XML wire form.
pub fn graph_to_xml(graph: &TransitionGraph) -> Result<String, GraphXmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("transition_graph");
    root.push_attribute(("cluster-delay", graph.cluster_delay_ms.to_string().as_str()));
    root.push_attribute(("stonith-timeout", graph.stonith_timeout_ms.to_string().as_str()));
    root.push_attribute(("failed-stop-offset", graph.failed_stop_offset.as_str()));
    root.push_attribute(("failed-start-offset", graph.failed_start_offset.as_str()));
    root.push_attribute(("transition_id", graph.transition_id.to_string().as_str()));
    writer.write_event(Event::Start(root))?;

    for synapse in &graph.synapses {
        write_synapse(&mut writer, synapse)?;
    }

    writer.write_event(Event::End(BytesEnd::new("transition_graph")))?;
    String::from_utf8(writer.into_inner().into_inner()).map_err(|_| GraphXmlError::Encoding)
}

fn write_synapse(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    synapse: &Synapse,
) -> Result<(), GraphXmlError> {
    let mut syn = BytesStart::new("synapse");
    syn.push_attribute(("id", synapse.id.to_string().as_str()));
    syn.push_attribute(("priority", synapse.priority.to_string().as_str()));
    writer.write_event(Event::Start(syn))?;

    writer.write_event(Event::Start(BytesStart::new("action_set")))?;
    write_action(writer, &synapse.action)?;
    writer.write_event(Event::End(BytesEnd::new("action_set")))?;

    if !synapse.inputs.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("inputs")))?;
        for input in &synapse.inputs {
            writer.write_event(Event::Start(BytesStart::new("trigger")))?;
            let mut reference = BytesStart::new("rsc_op");
            reference.push_attribute(("id", input.to_string().as_str()));
            writer.write_event(Event::Empty(reference))?;
            writer.write_event(Event::End(BytesEnd::new("trigger")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("inputs")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("synapse")))?;
    Ok(())
}

fn element_name(kind: GraphActionKind) -> &'static str {
    match kind {
        GraphActionKind::RscOp => "rsc_op",
        GraphActionKind::PseudoEvent => "pseudo_event",
        GraphActionKind::CrmEvent => "crm_event",
    }
}

fn write_action(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    action: &GraphAction,
) -> Result<(), GraphXmlError> {
    let mut elem = BytesStart::new(element_name(action.kind));
    elem.push_attribute(("id", action.action_id.to_string().as_str()));
    elem.push_attribute(("operation", action.task.as_str()));
    elem.push_attribute(("operation_key", action.uuid.as_str()));
    if let Some(rsc) = &action.rsc {
        elem.push_attribute(("rsc", rsc.as_str()));
    }
    if let Some(on_node) = &action.on_node {
        elem.push_attribute(("on_node", on_node.as_str()));
    }
    if let Some(uuid) = &action.on_node_uuid {
        elem.push_attribute(("on_node_uuid", uuid.as_str()));
    }
    writer.write_event(Event::Start(elem))?;

    let mut attrs = BytesStart::new("attributes");
    if let Some(on_node) = &action.on_node {
        attrs.push_attribute(("CRM_meta_on_node", on_node.as_str()));
    }
    if let Some(uuid) = &action.on_node_uuid {
        attrs.push_attribute(("CRM_meta_on_node_uuid", uuid.as_str()));
    }
    attrs.push_attribute(("CRM_meta_timeout", action.timeout_ms.to_string().as_str()));
    attrs.push_attribute(("CRM_meta_interval", action.interval_ms.to_string().as_str()));
    attrs.push_attribute(("CRM_meta_name", action.task.as_str()));
    for (key, value) in &action.attrs {
        attrs.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Empty(attrs))?;

    writer.write_event(Event::End(BytesEnd::new(element_name(action.kind))))?;
    Ok(())
}

/// Parses a transition graph from its XML wire form.
pub fn graph_from_xml(xml: &str) -> Result<TransitionGraph, GraphXmlError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    let mut graph = TransitionGraph {
        transition_id: parse_attr(root, "transition_graph", "transition_id")?,
        cluster_delay_ms: parse_attr(root, "transition_graph", "cluster-delay")?,
        stonith_timeout_ms: parse_attr(root, "transition_graph", "stonith-timeout")?,
        failed_stop_offset: root
            .attribute("failed-stop-offset")
            .unwrap_or_default()
            .to_string(),
        failed_start_offset: root
            .attribute("failed-start-offset")
            .unwrap_or_default()
            .to_string(),
        synapses: Vec::new(),
    };
    for syn in root.children().filter(|c| c.has_tag_name("synapse")) {
        graph.synapses.push(parse_synapse(syn)?);
    }
    graph.synapses.sort_by_key(|s| s.id);
    Ok(graph)
}

fn parse_synapse(syn: XmlNode<'_, '_>) -> Result<Synapse, GraphXmlError> {
    let id: u32 = parse_attr(syn, "synapse", "id")?;
    let priority: i32 = parse_attr(syn, "synapse", "priority")?;
    let action_set = syn
        .children()
        .find(|c| c.has_tag_name("action_set"))
        .ok_or(GraphXmlError::MissingElement {
            synapse: id,
            element: "action_set",
        })?;
    let action_elem = action_set
        .children()
        .find(XmlNode::is_element)
        .ok_or(GraphXmlError::MissingElement {
            synapse: id,
            element: "rsc_op",
        })?;
    let action = parse_action(action_elem, id)?;

    let mut inputs = Vec::new();
    if let Some(block) = syn.children().find(|c| c.has_tag_name("inputs")) {
        for trigger in block.children().filter(|c| c.has_tag_name("trigger")) {
            if let Some(reference) = trigger.children().find(XmlNode::is_element) {
                inputs.push(parse_attr(reference, "trigger", "id")?);
            }
        }
    }
    inputs.sort_unstable();

    Ok(Synapse {
        id,
        priority,
        action,
        inputs,
    })
}

fn parse_action(elem: XmlNode<'_, '_>, synapse: u32) -> Result<GraphAction, GraphXmlError> {
    let kind = match elem.tag_name().name() {
        "rsc_op" => GraphActionKind::RscOp,
        "pseudo_event" => GraphActionKind::PseudoEvent,
        "crm_event" => GraphActionKind::CrmEvent,
        _ => {
            return Err(GraphXmlError::MissingElement {
                synapse,
                element: "rsc_op",
            })
        }
    };
    let attributes = elem.children().find(|c| c.has_tag_name("attributes"));
    let meta = |key: &str| -> Option<String> {
        attributes.and_then(|a| a.attribute(key)).map(str::to_string)
    };
    let mut attrs = std::collections::BTreeMap::new();
    if let Some(attributes) = attributes {
        for attr in attributes.attributes() {
            if attr.name().starts_with("CRM_meta_") && !STRUCTURAL_META.contains(&attr.name()) {
                attrs.insert(attr.name().to_string(), attr.value().to_string());
            }
        }
    }
    Ok(GraphAction {
        action_id: parse_attr(elem, "rsc_op", "id")?,
        kind,
        uuid: elem
            .attribute("operation_key")
            .ok_or(GraphXmlError::BadAttribute {
                element: "rsc_op",
                attribute: "operation_key",
            })?
            .to_string(),
        task: elem.attribute("operation").unwrap_or_default().to_string(),
        rsc: elem.attribute("rsc").map(str::to_string),
        on_node: elem.attribute("on_node").map(str::to_string),
        on_node_uuid: elem.attribute("on_node_uuid").map(str::to_string),
        interval_ms: meta("CRM_meta_interval")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        timeout_ms: meta("CRM_meta_timeout")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        attrs,
    })
}

fn parse_attr<T: std::str::FromStr>(
    elem: XmlNode<'_, '_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<T, GraphXmlError> {
    elem.attribute(attribute)
        .and_then(|v| v.parse().ok())
        .ok_or(GraphXmlError::BadAttribute { element, attribute })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_graph() -> TransitionGraph {
        let mut attrs = BTreeMap::new();
        attrs.insert("CRM_meta_notify_type".to_string(), "pre".to_string());
        TransitionGraph {
            transition_id: 7,
            cluster_delay_ms: 60_000,
            stonith_timeout_ms: 60_000,
            failed_stop_offset: "INFINITY".into(),
            failed_start_offset: "INFINITY".into(),
            synapses: vec![
                Synapse {
                    id: 0,
                    priority: 0,
                    action: GraphAction {
                        action_id: 0,
                        kind: GraphActionKind::RscOp,
                        uuid: "db_stop_0".into(),
                        task: "stop".into(),
                        rsc: Some("db".into()),
                        on_node: Some("alpha".into()),
                        on_node_uuid: Some("1".into()),
                        interval_ms: 0,
                        timeout_ms: 20_000,
                        attrs,
                    },
                    inputs: vec![],
                },
                Synapse {
                    id: 1,
                    priority: 3,
                    action: GraphAction {
                        action_id: 1,
                        kind: GraphActionKind::PseudoEvent,
                        uuid: "grp_stopped_0".into(),
                        task: "stopped".into(),
                        rsc: Some("grp".into()),
                        on_node: None,
                        on_node_uuid: None,
                        interval_ms: 0,
                        timeout_ms: 0,
                        attrs: BTreeMap::new(),
                    },
                    inputs: vec![0],
                },
            ],
        }
    }

    #[test]
    fn xml_round_trip_is_structurally_equal() {
        let graph = sample_graph();
        let xml = graph_to_xml(&graph).expect("serialize");
        let parsed = graph_from_xml(&xml).expect("parse");
        assert_eq!(parsed, graph);
    }

    #[test]
    fn reader_ignores_attribute_order() {
        let xml = r#"
<transition_graph transition_id="2" cluster-delay="1000" stonith-timeout="2000"
                  failed-start-offset="INFINITY" failed-stop-offset="INFINITY">
  <synapse priority="0" id="0">
    <action_set>
      <rsc_op operation_key="vip_start_0" operation="start" id="0" rsc="vip"
              on_node_uuid="2" on_node="beta">
        <attributes CRM_meta_interval="0" CRM_meta_name="start"
                    CRM_meta_on_node="beta" CRM_meta_on_node_uuid="2"
                    CRM_meta_timeout="20000"/>
      </rsc_op>
    </action_set>
  </synapse>
</transition_graph>"#;
        let parsed = graph_from_xml(xml).expect("parse");
        assert_eq!(parsed.transition_id, 2);
        assert_eq!(parsed.synapses.len(), 1);
        let action = &parsed.synapses[0].action;
        assert_eq!(action.uuid, "vip_start_0");
        assert_eq!(action.on_node.as_deref(), Some("beta"));
        assert_eq!(action.timeout_ms, 20_000);
        assert!(action.attrs.is_empty(), "structural meta is not an attr");
    }

    #[test]
    fn missing_action_set_is_rejected() {
        let xml = r#"
<transition_graph transition_id="1" cluster-delay="0" stonith-timeout="0"
                  failed-stop-offset="" failed-start-offset="">
  <synapse id="0" priority="0"/>
</transition_graph>"#;
        let err = graph_from_xml(xml).expect_err("must reject");
        assert!(matches!(err, GraphXmlError::MissingElement { .. }));
    }
}
