//! Owned, mutable XML tree used for the parts this tool rewrites.
//!
//! Nodes live in a single arena and are addressed by `NodeId` indices, so
//! handles stay valid while children are spliced in around them. Parsing and
//! serialization go through quick-xml events; element and attribute names are
//! kept verbatim (prefix included) so a round trip preserves the document's
//! namespace declarations.

use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Stable handle to a node in an [`XmlTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<XmlNode>,
    root: NodeId,
}

const NO_CHILDREN: &[NodeId] = &[];

/// Strips a namespace prefix: `local_name("w:p") == "p"`.
pub fn local_name(name: &str) -> &str {
    match name.rfind(':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

impl XmlTree {
    /// Parses a complete XML document into an arena tree.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut nodes: Vec<XmlNode> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        let mut root: Option<usize> = None;

        loop {
            match reader.read_event_into(&mut buf).context("malformed XML")? {
                Event::Start(e) => {
                    let idx = nodes.len();
                    nodes.push(XmlNode::Element(element_from_start(&e)?));
                    attach(&mut nodes, &stack, &mut root, idx);
                    stack.push(idx);
                }
                Event::Empty(e) => {
                    let idx = nodes.len();
                    nodes.push(XmlNode::Element(element_from_start(&e)?));
                    attach(&mut nodes, &stack, &mut root, idx);
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(e) => {
                    // Whitespace between elements outside any element is noise.
                    if let Some(&parent) = stack.last() {
                        let text = e.unescape().context("malformed XML text")?;
                        if !text.is_empty() {
                            let idx = nodes.len();
                            nodes.push(XmlNode::Text(text.into_owned()));
                            attach_to(&mut nodes, parent, idx);
                        }
                    }
                }
                Event::CData(e) => {
                    if let Some(&parent) = stack.last() {
                        let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                        let idx = nodes.len();
                        nodes.push(XmlNode::Text(text));
                        attach_to(&mut nodes, parent, idx);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        match root {
            Some(idx) => Ok(Self {
                nodes,
                root: NodeId(idx),
            }),
            None => bail!("XML document has no root element"),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Creates a detached element; attach it with `append_child`/`insert_child`.
    pub fn new_element(&mut self, name: &str) -> NodeId {
        self.nodes.push(XmlNode::Element(Element {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }));
        NodeId(self.nodes.len() - 1)
    }

    /// Creates a detached text node.
    pub fn new_text(&mut self, text: &str) -> NodeId {
        self.nodes.push(XmlNode::Text(text.to_string()));
        NodeId(self.nodes.len() - 1)
    }

    /// Element name with prefix, e.g. `w:p`. `None` for text nodes.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0] {
            XmlNode::Element(e) => Some(e.name.as_str()),
            XmlNode::Text(_) => None,
        }
    }

    /// Text content of a text node. `None` for elements.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0] {
            XmlNode::Text(t) => Some(t.as_str()),
            XmlNode::Element(_) => None,
        }
    }

    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id.0] {
            XmlNode::Element(e) => e
                .attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            XmlNode::Text(_) => None,
        }
    }

    pub fn set_attribute(&mut self, id: NodeId, key: &str, value: &str) {
        let elem = self.element_mut(id);
        if let Some(attr) = elem.attributes.iter_mut().find(|(k, _)| k == key) {
            attr.1 = value.to_string();
        } else {
            elem.attributes.push((key.to_string(), value.to_string()));
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0] {
            XmlNode::Element(e) => &e.children,
            XmlNode::Text(_) => NO_CHILDREN,
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.element_mut(parent).children.push(child);
    }

    /// Inserts `child` at `index` among `parent`'s children; saturates at the end.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        let children = &mut self.element_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Pre-order traversal of the subtree rooted at `id`, `id` included.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending = vec![id];
        while let Some(node) = pending.pop() {
            out.push(node);
            for &child in self.children(node).iter().rev() {
                pending.push(child);
            }
        }
        out
    }

    /// Concatenated text of every text node under `id`.
    pub fn collect_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(t) = self.text(node) {
                out.push_str(t);
            }
        }
        out
    }

    /// Serializes the tree with an XML declaration. Childless elements are
    /// written in `<x/>` form, which is what Word emits for marker elements.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        self.write_node(&mut writer, self.root)?;
        Ok(writer.into_inner().into_inner())
    }

    fn write_node(&self, writer: &mut Writer<Cursor<Vec<u8>>>, id: NodeId) -> Result<()> {
        match &self.nodes[id.0] {
            XmlNode::Text(t) => {
                writer.write_event(Event::Text(BytesText::new(t)))?;
            }
            XmlNode::Element(e) => {
                let mut start = BytesStart::new(e.name.as_str());
                for (k, v) in &e.attributes {
                    start.push_attribute((k.as_str(), v.as_str()));
                }
                if e.children.is_empty() {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    writer.write_event(Event::Start(start))?;
                    for &child in &e.children {
                        self.write_node(writer, child)?;
                    }
                    writer.write_event(Event::End(BytesEnd::new(e.name.as_str())))?;
                }
            }
        }
        Ok(())
    }

    fn element_mut(&mut self, id: NodeId) -> &mut Element {
        match &mut self.nodes[id.0] {
            XmlNode::Element(e) => e,
            XmlNode::Text(_) => panic!("node {:?} is a text node, not an element", id),
        }
    }
}

fn element_from_start(e: &BytesStart) -> Result<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.context("malformed XML attribute")?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .context("malformed XML attribute value")?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(nodes: &mut [XmlNode], stack: &[usize], root: &mut Option<usize>, idx: usize) {
    if let Some(&parent) = stack.last() {
        attach_to(nodes, parent, idx);
    } else if root.is_none() {
        *root = Some(idx);
    }
}

fn attach_to(nodes: &mut [XmlNode], parent: usize, idx: usize) {
    if let XmlNode::Element(e) = &mut nodes[parent] {
        e.children.push(NodeId(idx));
    }
}
