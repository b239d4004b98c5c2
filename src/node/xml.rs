//! # XML Serialization
//!
//! Serializes the document tree into the container's XML section. Each node
//! becomes one element whose `type` attribute names the node kind; numeric
//! parameters ride as attributes, string values as escaped text content.
//!
//! A compressed vector writes the *physical* offset of its binary section
//! plus its record count, then its prototype and codecs subtrees under the
//! forced element names `prototype` and `codecs`. Vector children carry the
//! forced name `vectorChild` since their element names are positional.

use crate::node::{FloatPrecision, Node, NodeKind};
use crate::storage::logical_to_physical;

const XMLNS: &str = "http://www.astm.org/COMMIT/E57/2010-e57-v1.0";

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}

fn indent_into(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push(' ');
    }
}

/// Serializes a whole document tree, root element included.
pub(crate) fn tree_to_xml(root: &Node) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_node(root, &mut out, 0, Some("e57Root"), true);
    out
}

pub(crate) fn write_node(
    node: &Node,
    out: &mut String,
    indent: usize,
    forced_name: Option<&str>,
    is_document_root: bool,
) {
    let owned_name;
    let name = match forced_name {
        Some(forced) => forced,
        None => {
            owned_name = node.element_name();
            &owned_name
        }
    };

    indent_into(out, indent);
    out.push('<');
    out.push_str(name);
    out.push_str(" type=\"");
    out.push_str(node.node_type().name());
    out.push('"');
    if is_document_root {
        out.push_str(" xmlns=\"");
        out.push_str(XMLNS);
        out.push('"');
    }

    match &node.inner.kind {
        NodeKind::Integer { min, max } => {
            out.push_str(&format!(" minimum=\"{}\" maximum=\"{}\"/>\n", min, max));
        }
        NodeKind::ScaledInteger {
            min,
            max,
            scale,
            offset,
        } => {
            out.push_str(&format!(
                " minimum=\"{}\" maximum=\"{}\" scale=\"{}\" offset=\"{}\"/>\n",
                min, max, scale, offset
            ));
        }
        NodeKind::Float {
            precision,
            min,
            max,
        } => {
            let precision = match precision {
                FloatPrecision::Single => "single",
                FloatPrecision::Double => "double",
            };
            out.push_str(&format!(
                " precision=\"{}\" minimum=\"{}\" maximum=\"{}\"/>\n",
                precision, min, max
            ));
        }
        NodeKind::String { value } => {
            if value.is_empty() {
                out.push_str("/>\n");
            } else {
                out.push('>');
                escape_into(value, out);
                out.push_str(&format!("</{}>\n", name));
            }
        }
        NodeKind::Blob { length } => {
            out.push_str(&format!(" length=\"{}\"/>\n", length));
        }
        NodeKind::Structure { children } => {
            let children = children.read();
            if children.is_empty() {
                out.push_str("/>\n");
            } else {
                out.push_str(">\n");
                for child in children.iter() {
                    write_node(child, out, indent + 2, None, false);
                }
                indent_into(out, indent);
                out.push_str(&format!("</{}>\n", name));
            }
        }
        NodeKind::Vector {
            homogeneous,
            children,
        } => {
            out.push_str(&format!(
                " allowHeterogeneousChildren=\"{}\"",
                if *homogeneous { 0 } else { 1 }
            ));
            let children = children.read();
            if children.is_empty() {
                out.push_str("/>\n");
            } else {
                out.push_str(">\n");
                for child in children.iter() {
                    write_node(child, out, indent + 2, Some("vectorChild"), false);
                }
                indent_into(out, indent);
                out.push_str(&format!("</{}>\n", name));
            }
        }
        NodeKind::CompressedVector { state } => {
            let state = state.lock();
            out.push_str(&format!(
                " fileOffset=\"{}\" recordCount=\"{}\">\n",
                logical_to_physical(state.binary_section_logical_start),
                state.record_count
            ));
            if let Some(proto) = &state.prototype {
                write_node(proto, out, indent + 2, Some("prototype"), false);
            }
            if let Some(codecs) = &state.codecs {
                write_node(codecs, out, indent + 2, Some("codecs"), false);
            }
            indent_into(out, indent);
            out.push_str(&format!("</{}>\n", name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagefile::ImageFile;
    use tempfile::tempdir;

    #[test]
    fn integer_and_float_attributes() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("xml.e57")).unwrap();
        imf.root().set_child("x", &imf.new_integer(-5, 99)).unwrap();
        imf.root()
            .set_child("t", &imf.new_scaled_integer(0, 1000, 0.001, 2.5))
            .unwrap();

        let xml = tree_to_xml(&imf.root());
        assert!(xml.contains("<x type=\"Integer\" minimum=\"-5\" maximum=\"99\"/>"));
        assert!(xml.contains(
            "<t type=\"ScaledInteger\" minimum=\"0\" maximum=\"1000\" scale=\"0.001\" offset=\"2.5\"/>"
        ));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<e57Root type=\"Structure\" xmlns="));
    }

    #[test]
    fn string_values_are_escaped() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("esc.e57")).unwrap();
        imf.root()
            .set_child("guid", &imf.new_string_value("a<b>&\"c\""))
            .unwrap();

        let xml = tree_to_xml(&imf.root());
        assert!(xml.contains("<guid type=\"String\">a&lt;b&gt;&amp;&quot;c&quot;</guid>"));
    }

    #[test]
    fn vector_children_use_forced_names() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("vec.e57")).unwrap();
        let v = imf.new_vector(false);
        v.append(&imf.new_string_value("cartesianX")).unwrap();
        imf.root().set_child("inputs", &v).unwrap();

        let xml = tree_to_xml(&imf.root());
        assert!(xml.contains("<inputs type=\"Vector\" allowHeterogeneousChildren=\"1\">"));
        assert!(xml.contains("<vectorChild type=\"String\">cartesianX</vectorChild>"));
    }

    #[test]
    fn compressed_vector_carries_offset_and_count() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("cv.e57")).unwrap();
        let cv = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("x", &imf.new_integer(0, 100)).unwrap();
        cv.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &cv).unwrap();

        let xml = tree_to_xml(&imf.root());
        assert!(xml.contains("<points type=\"CompressedVector\" fileOffset=\"0\" recordCount=\"0\">"));
        assert!(xml.contains("<prototype type=\"Structure\">"));
        assert!(xml.contains("</points>"));
    }
}
