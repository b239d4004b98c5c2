//! # XML Section Reader
//!
//! A minimal, dependency-free XML reader for the container's document
//! section: a byte scanner producing raw elements, then a second pass that
//! builds typed nodes. Only the subset the writer emits is accepted:
//! elements, attributes, character data, comments, and the five predefined
//! entities plus numeric character references. No namespace resolution
//! happens; `xmlns` and unknown attributes are ignored.
//!
//! Failure split: malformed XML (unbalanced tags, bad entity, stray bytes)
//! is `XmlParser`; well-formed XML that violates the node schema (unknown
//! `type`, missing or unparsable numeric attribute, text under a container)
//! is `BadXmlFormat`.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, ErrorCode, Result};
use crate::imagefile::ImageFileInner;
use crate::node::{CvState, FloatPrecision, Node, NodeKind};
use crate::storage::physical_to_logical;

struct RawElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<RawElement>,
    text: String,
}

impl RawElement {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn required_attr(&self, name: &str) -> Result<&str> {
        match self.attr(name) {
            Some(v) => Ok(v),
            None => e57_bail!(BadXmlFormat, "element {} missing attribute {}", self.name, name),
        }
    }

    fn i64_attr(&self, name: &str) -> Result<i64> {
        let raw = self.required_attr(name)?;
        raw.parse::<i64>().map_err(|_| {
            Error::new(
                ErrorCode::BadXmlFormat,
                format!("element {} attribute {}=\"{}\"", self.name, name, raw),
            )
        })
    }

    fn u64_attr(&self, name: &str) -> Result<u64> {
        let raw = self.required_attr(name)?;
        raw.parse::<u64>().map_err(|_| {
            Error::new(
                ErrorCode::BadXmlFormat,
                format!("element {} attribute {}=\"{}\"", self.name, name, raw),
            )
        })
    }

    fn f64_attr(&self, name: &str) -> Result<f64> {
        let raw = self.required_attr(name)?;
        raw.parse::<f64>().map_err(|_| {
            Error::new(
                ErrorCode::BadXmlFormat,
                format!("element {} attribute {}=\"{}\"", self.name, name, raw),
            )
        })
    }
}

struct Scanner<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn err(&self, message: &str) -> Error {
        Error::new(
            ErrorCode::XmlParser,
            format!("offset={} {}", self.pos, message),
        )
    }

    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn skip_prolog_and_comments(&mut self) -> Result<()> {
        loop {
            self.skip_ws();
            if self.starts_with("<?") {
                match self.rest().find("?>") {
                    Some(end) => self.pos += end + 2,
                    None => return Err(self.err("unterminated processing instruction")),
                }
            } else if self.starts_with("<!--") {
                match self.rest().find("-->") {
                    Some(end) => self.pos += end + 3,
                    None => return Err(self.err("unterminated comment")),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn parse_name(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.err("expected a name"));
        }
        Ok(self.s[start..self.pos].to_string())
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.err(&format!("expected '{}'", c)))
        }
    }

    fn unescape(&self, raw: &str) -> Result<String> {
        if !raw.contains('&') {
            return Ok(raw.to_string());
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            rest = &rest[amp..];
            let semi = rest
                .find(';')
                .ok_or_else(|| self.err("unterminated entity reference"))?;
            let entity = &rest[1..semi];
            match entity {
                "amp" => out.push('&'),
                "lt" => out.push('<'),
                "gt" => out.push('>'),
                "quot" => out.push('"'),
                "apos" => out.push('\''),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    match code.and_then(char::from_u32) {
                        Some(c) => out.push(c),
                        None => return Err(self.err("unknown entity reference")),
                    }
                }
            }
            rest = &rest[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn parse_attr_value(&mut self) -> Result<String> {
        self.expect('"')?;
        let start = self.pos;
        let end = self.rest().find('"').ok_or_else(|| self.err("unterminated attribute value"))?;
        self.pos += end;
        let raw = &self.s[start..self.pos];
        self.expect('"')?;
        self.unescape(raw)
    }

    fn parse_element(&mut self) -> Result<RawElement> {
        self.expect('<')?;
        let name = self.parse_name()?;
        let mut attrs = Vec::new();

        loop {
            self.skip_ws();
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok(RawElement {
                    name,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                });
            }
            if self.starts_with(">") {
                self.pos += 1;
                break;
            }
            let attr_name = self.parse_name()?;
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.parse_attr_value()?;
            attrs.push((attr_name, value));
        }

        let mut children = Vec::new();
        let mut text = String::new();
        loop {
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.parse_name()?;
                if close != name {
                    return Err(self.err(&format!("mismatched </{}> closing <{}>", close, name)));
                }
                self.skip_ws();
                self.expect('>')?;
                return Ok(RawElement {
                    name,
                    attrs,
                    children,
                    text,
                });
            }
            if self.starts_with("<!--") {
                match self.rest().find("-->") {
                    Some(end) => self.pos += end + 3,
                    None => return Err(self.err("unterminated comment")),
                }
            } else if self.starts_with("<") {
                children.push(self.parse_element()?);
            } else {
                let chunk_end = self
                    .rest()
                    .find('<')
                    .ok_or_else(|| self.err("unterminated element content"))?;
                let raw = &self.s[self.pos..self.pos + chunk_end];
                text.push_str(&self.unescape(raw)?);
                self.pos += chunk_end;
            }
        }
    }
}

fn attach_child(parent: &Node, child: &Node, name: String) {
    *child.inner.element_name.write() = name;
    *child.inner.parent.write() = Arc::downgrade(&parent.inner);
}

fn build_node(raw: &RawElement, dest: &Weak<ImageFileInner>) -> Result<Node> {
    let node_type = raw.required_attr("type")?;
    let has_text = !raw.text.trim().is_empty();
    if has_text && node_type != "String" {
        e57_bail!(
            BadXmlFormat,
            "element {} type={} carries text content",
            raw.name,
            node_type
        );
    }

    match node_type {
        "Integer" => Ok(Node::from_kind(
            dest.clone(),
            NodeKind::Integer {
                min: raw.i64_attr("minimum")?,
                max: raw.i64_attr("maximum")?,
            },
        )),
        "ScaledInteger" => Ok(Node::from_kind(
            dest.clone(),
            NodeKind::ScaledInteger {
                min: raw.i64_attr("minimum")?,
                max: raw.i64_attr("maximum")?,
                scale: raw.f64_attr("scale")?,
                offset: raw.f64_attr("offset")?,
            },
        )),
        "Float" => {
            let precision = match raw.attr("precision").unwrap_or("double") {
                "single" => FloatPrecision::Single,
                "double" => FloatPrecision::Double,
                other => e57_bail!(BadXmlFormat, "element {} precision=\"{}\"", raw.name, other),
            };
            Ok(Node::from_kind(
                dest.clone(),
                NodeKind::Float {
                    precision,
                    min: raw.f64_attr("minimum")?,
                    max: raw.f64_attr("maximum")?,
                },
            ))
        }
        "String" => {
            e57_ensure!(
                raw.children.is_empty(),
                BadXmlFormat,
                "element {} type=String has child elements",
                raw.name
            );
            Ok(Node::from_kind(
                dest.clone(),
                NodeKind::String {
                    value: raw.text.clone(),
                },
            ))
        }
        "Blob" => Ok(Node::from_kind(
            dest.clone(),
            NodeKind::Blob {
                length: raw.u64_attr("length")?,
            },
        )),
        "Structure" => {
            let node = Node::from_kind(
                dest.clone(),
                NodeKind::Structure {
                    children: RwLock::new(Vec::new()),
                },
            );
            for raw_child in &raw.children {
                let child = build_node(raw_child, dest)?;
                attach_child(&node, &child, raw_child.name.clone());
                match &node.inner.kind {
                    NodeKind::Structure { children } => children.write().push(child),
                    _ => unreachable!(),
                }
            }
            Ok(node)
        }
        "Vector" => {
            let homogeneous = raw.attr("allowHeterogeneousChildren").unwrap_or("0") != "1";
            let node = Node::from_kind(
                dest.clone(),
                NodeKind::Vector {
                    homogeneous,
                    children: RwLock::new(Vec::new()),
                },
            );
            for (index, raw_child) in raw.children.iter().enumerate() {
                let child = build_node(raw_child, dest)?;
                attach_child(&node, &child, format!("{}", index));
                match &node.inner.kind {
                    NodeKind::Vector { children, .. } => children.write().push(child),
                    _ => unreachable!(),
                }
            }
            Ok(node)
        }
        "CompressedVector" => {
            let file_offset = raw.u64_attr("fileOffset")?;
            let record_count = raw.u64_attr("recordCount")?;
            let mut prototype = None;
            let mut codecs = None;
            for raw_child in &raw.children {
                match raw_child.name.as_str() {
                    "prototype" if prototype.is_none() => {
                        prototype = Some(build_node(raw_child, dest)?);
                    }
                    "codecs" if codecs.is_none() => {
                        codecs = Some(build_node(raw_child, dest)?);
                    }
                    other => e57_bail!(
                        BadXmlFormat,
                        "element {} unexpected CompressedVector child {}",
                        raw.name,
                        other
                    ),
                }
            }
            Ok(Node::from_kind(
                dest.clone(),
                NodeKind::CompressedVector {
                    state: Mutex::new(CvState {
                        prototype,
                        codecs,
                        record_count,
                        binary_section_logical_start: physical_to_logical(file_offset),
                    }),
                },
            ))
        }
        other => e57_bail!(BadXmlFormat, "element {} unknown type {}", raw.name, other),
    }
}

/// Parses the XML section into a document tree bound to `dest`.
pub(crate) fn parse_xml_tree(bytes: &[u8], dest: Weak<ImageFileInner>) -> Result<Node> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::new(ErrorCode::XmlParser, format!("XML section not UTF-8: {}", e)))?;

    let mut scanner = Scanner { s: text, pos: 0 };
    scanner.skip_prolog_and_comments()?;
    let raw = scanner.parse_element()?;
    scanner.skip_prolog_and_comments()?;
    scanner.skip_ws();
    if scanner.pos != scanner.s.len() {
        return Err(scanner.err("content after document element"));
    }

    let root = build_node(&raw, &dest)?;
    e57_ensure!(
        root.node_type() == crate::node::NodeType::Structure,
        BadXmlFormat,
        "document root type={}",
        root.node_type().name()
    );
    Ok(root)
}
