// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation-history write-back for the CIB status section.
//!
//! After a transition settles, the controller records the outcome of every
//! concrete action as an `lrm_rsc_op` row under the executing node's
//! `node_state`. History is append-only: ingestion folds records in
//! document order, so the newest row for a resource decides its observed
//! role and the next scheduler run converges instead of replaying the
//! finished transition.
//!
//! The rewriter copies element structure and attributes only; the CIB
//! schema carries no mixed content.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node as XmlNode};
use thiserror::Error;

/// One settled operation to record in `/cib/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    /// Node the operation ran on (`uname`).
    pub node: String,
    /// Resource operated on.
    pub rsc: String,
    /// Operation name (`start`, `stop`, `promote`, ...).
    pub operation: String,
    /// Agent return code; zero is success.
    pub rc_code: i32,
}

/// Errors raised while recording operation history.
#[derive(Debug, Error)]
pub enum StatusWriteError {
    /// The document is not well-formed XML.
    #[error("malformed CIB document: {0}")]
    Xml(#[from] roxmltree::Error),
    /// Writing the patched document failed.
    #[error("failed to serialize CIB document: {0}")]
    Write(#[from] quick_xml::Error),
    /// The serialized bytes are not UTF-8.
    #[error("serialized CIB document is not valid UTF-8")]
    Encoding,
    /// A record targets a node without a `node_state` entry.
    #[error("operation history references unknown node {0:?}")]
    UnknownNode(String),
}

/// Appends operation results to `/cib/status`, returning the new document.
///
/// Every record's node must already carry a `node_state` element; the
/// membership owns node lifecycles, not the history writer.
pub fn record_op_history(
    cib_xml: &str,
    records: &[OpRecord],
) -> Result<String, StatusWriteError> {
    let doc = Document::parse(cib_xml)?;
    let root = doc.root_element();
    for record in records {
        let known = root.descendants().any(|n| {
            n.has_tag_name("node_state") && n.attribute("uname") == Some(record.node.as_str())
        });
        if !known {
            return Err(StatusWriteError::UnknownNode(record.node.clone()));
        }
    }
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    copy_element(&mut writer, root, records)?;
    String::from_utf8(writer.into_inner().into_inner()).map_err(|_| StatusWriteError::Encoding)
}

/// Copies one element verbatim, appending a history block to every
/// `node_state` that has records for it.
fn copy_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    node: XmlNode<'_, '_>,
    records: &[OpRecord],
) -> Result<(), StatusWriteError> {
    let name = node.tag_name().name();
    let mut start = BytesStart::new(name);
    for attr in node.attributes() {
        start.push_attribute((attr.name(), attr.value()));
    }

    let rows: Vec<&OpRecord> = if node.has_tag_name("node_state") {
        match node.attribute("uname") {
            Some(uname) => records.iter().filter(|r| r.node == uname).collect(),
            None => Vec::new(),
        }
    } else {
        Vec::new()
    };
    let has_children = node.children().any(|c| c.is_element());

    if !has_children && rows.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in node.children().filter(XmlNode::is_element) {
        copy_element(writer, child, records)?;
    }
    if !rows.is_empty() {
        write_history_block(writer, &rows)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_history_block(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    rows: &[&OpRecord],
) -> Result<(), StatusWriteError> {
    writer.write_event(Event::Start(BytesStart::new("lrm")))?;
    writer.write_event(Event::Start(BytesStart::new("lrm_resources")))?;
    for row in rows {
        let mut rsc = BytesStart::new("lrm_resource");
        rsc.push_attribute(("id", row.rsc.as_str()));
        writer.write_event(Event::Start(rsc))?;
        let op_id = format!("{}_{}", row.rsc, row.operation);
        let rc = row.rc_code.to_string();
        let mut op = BytesStart::new("lrm_rsc_op");
        op.push_attribute(("id", op_id.as_str()));
        op.push_attribute(("operation", row.operation.as_str()));
        op.push_attribute(("rc-code", rc.as_str()));
        writer.write_event(Event::Empty(op))?;
        writer.write_event(Event::End(BytesEnd::new("lrm_resource")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("lrm_resources")))?;
    writer.write_event(Event::End(BytesEnd::new("lrm")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RscRole;
    use crate::working_set::WorkingSet;
    use std::time::SystemTime;

    const CIB: &str = r#"<cib admin_epoch="0" epoch="3" num_updates="1">
  <configuration>
    <nodes><node id="1" uname="alpha"/></nodes>
    <resources>
      <primitive id="vip" class="ocf" provider="heartbeat" type="IPaddr2"/>
    </resources>
    <constraints/>
  </configuration>
  <status>
    <node_state id="1" uname="alpha" in_ccm="true" crmd="online" join="member">
      <lrm><lrm_resources>
        <lrm_resource id="vip" class="ocf" type="IPaddr2">
          <lrm_rsc_op id="vip_start" operation="start" rc-code="0"/>
        </lrm_resource>
      </lrm_resources></lrm>
    </node_state>
  </status>
</cib>"#;

    fn stop_record() -> OpRecord {
        OpRecord {
            node: "alpha".into(),
            rsc: "vip".into(),
            operation: "stop".into(),
            rc_code: 0,
        }
    }

    #[test]
    fn recorded_stop_overrides_the_observed_start() {
        let patched = record_op_history(CIB, &[stop_record()]).expect("patch");
        let ws = WorkingSet::build(&patched, SystemTime::UNIX_EPOCH).expect("ingest");
        let vip = ws.resource_by_name("vip").expect("vip");
        let prim = ws.resource(vip).as_primitive().expect("primitive");
        assert_eq!(prim.role, RscRole::Stopped, "the newest row wins");
        assert!(prim.running_on.is_empty());
    }

    #[test]
    fn history_preserves_the_rest_of_the_document() {
        let patched = record_op_history(CIB, &[stop_record()]).expect("patch");
        let ws = WorkingSet::build(&patched, SystemTime::UNIX_EPOCH).expect("ingest");
        assert_eq!(ws.epoch.epoch, 3, "configuration epoch untouched");
        assert_eq!(ws.nodes.len(), 1);
        assert!(ws.resource_by_name("vip").is_some());
    }

    #[test]
    fn failed_results_mark_the_resource_failed() {
        let record = OpRecord {
            rc_code: 1,
            operation: "monitor".into(),
            ..stop_record()
        };
        let patched = record_op_history(CIB, &[record]).expect("patch");
        let ws = WorkingSet::build(&patched, SystemTime::UNIX_EPOCH).expect("ingest");
        let vip = ws.resource_by_name("vip").expect("vip");
        assert!(ws.resource(vip).failed);
    }

    #[test]
    fn unknown_nodes_are_rejected() {
        let record = OpRecord {
            node: "ghost".into(),
            ..stop_record()
        };
        let err = record_op_history(CIB, &[record]).expect_err("must reject");
        assert!(matches!(err, StatusWriteError::UnknownNode(_)));
    }
}
