//! Comments store management and range anchoring.
//!
//! This is the part of the pipeline where a wrong move produces a document
//! that Word refuses to open: the comments part, the relationship pointing at
//! it, the content-type override, and the three in-body markers must all
//! agree on ids and locations. The store is append-only within one review
//! pass; a committed comment is never altered or removed.

use crate::document::DocumentXml;
use crate::package::{
    DocxPackage, RelLookup, COMMENTS_CONTENT_TYPE, COMMENTS_PART, COMMENTS_REL_TYPE,
};
use crate::xml::NodeId;
use crate::ReviewError;
use anyhow::{Context, Result};
use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Namespace declarations carried by a freshly created comments part. Word
/// tolerates a smaller set but this is what it writes itself.
const CANONICAL_NAMESPACES: &[(&str, &str)] = &[
    ("xmlns:mc", "http://schemas.openxmlformats.org/markup-compatibility/2006"),
    ("xmlns:o", "urn:schemas-microsoft-com:office:office"),
    ("xmlns:r", "http://schemas.openxmlformats.org/officeDocument/2006/relationships"),
    ("xmlns:m", "http://schemas.openxmlformats.org/officeDocument/2006/math"),
    ("xmlns:v", "urn:schemas-microsoft-com:vml"),
    ("xmlns:wp", "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing"),
    ("xmlns:w10", "urn:schemas-microsoft-com:office:word"),
    ("xmlns:w", W_NS),
    ("xmlns:wne", "http://schemas.microsoft.com/office/word/2006/wordml"),
    ("xmlns:sl", "http://schemas.openxmlformats.org/schemaLibrary/2006/main"),
    ("xmlns:a", "http://schemas.openxmlformats.org/drawingml/2006/main"),
    ("xmlns:pic", "http://schemas.openxmlformats.org/drawingml/2006/picture"),
    ("xmlns:c", "http://schemas.openxmlformats.org/drawingml/2006/chart"),
    ("xmlns:lc", "http://schemas.openxmlformats.org/drawingml/2006/lockedCanvas"),
    ("xmlns:dgm", "http://schemas.openxmlformats.org/drawingml/2006/diagram"),
    ("xmlns:wps", "http://schemas.microsoft.com/office/word/2010/wordprocessingShape"),
    ("xmlns:wpg", "http://schemas.microsoft.com/office/word/2010/wordprocessingGroup"),
    ("xmlns:w14", "http://schemas.microsoft.com/office/word/2010/wordml"),
    ("xmlns:w15", "http://schemas.microsoft.com/office/word/2012/wordml"),
    ("xmlns:w16", "http://schemas.microsoft.com/office/word/2018/wordml"),
    ("xmlns:w16cex", "http://schemas.microsoft.com/office/word/2018/wordml/cex"),
    ("xmlns:w16cid", "http://schemas.microsoft.com/office/word/2016/wordml/cid"),
    ("xmlns:cr", "http://schemas.microsoft.com/office/comments/2020/reactions"),
];

/// Closed set of presentation flags a comment run may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStyle {
    pub bold: bool,
    pub strike: bool,
    /// 6-hex-digit RGB value, no leading `#`.
    pub color: Option<String>,
}

impl RunStyle {
    fn is_plain(&self) -> bool {
        !self.bold && !self.strike && self.color.is_none()
    }
}

/// One unit of comment text with optional styling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub style: RunStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u32,
    pub author: String,
    pub date: String,
    pub runs: Vec<StyledRun>,
}

/// Where a comment attaches in the content tree.
#[derive(Debug, Clone, Copy)]
pub enum CommentAnchor {
    /// The comment covers exactly this node.
    Single(NodeId),
    /// The comment covers from the start of the first node to the end of the
    /// second. Document order between the two is *not* validated; a reversed
    /// pair still gets its markers placed the same way and renders oddly,
    /// which is accepted behavior.
    Span(NodeId, NodeId),
}

impl CommentAnchor {
    /// Builds an anchor from resolved nodes; anything but one or two nodes
    /// is a caller bug.
    pub fn from_nodes(nodes: &[NodeId]) -> Result<Self, ReviewError> {
        match *nodes {
            [node] => Ok(Self::Single(node)),
            [start, end] => Ok(Self::Span(start, end)),
            _ => Err(ReviewError::InvalidAnchorArity(nodes.len())),
        }
    }

    /// Normalizes to a (start, end) pair, duplicating a single node.
    pub fn normalize(self) -> (NodeId, NodeId) {
        match self {
            Self::Single(node) => (node, node),
            Self::Span(start, end) => (start, end),
        }
    }
}

/// In-memory form of the comments part. Owns the parsed comment collection
/// and writes the serialized part back into the package on every append.
#[derive(Debug)]
pub struct CommentsStore {
    part_name: String,
    namespaces: Vec<(String, String)>,
    comments: Vec<Comment>,
}

impl CommentsStore {
    /// Returns a handle to the package's comments store, creating the part,
    /// the relationship and the content-type override if none exist yet.
    /// Calling this twice never creates a duplicate part or relationship.
    pub fn ensure(package: &mut DocxPackage) -> Result<Self> {
        match package.find_relationship(COMMENTS_REL_TYPE)? {
            RelLookup::Found(target) => {
                let part_name = resolve_part_name(&target);
                let bytes = package.part(&part_name).with_context(|| {
                    format!("comments relationship points at missing part {part_name}")
                })?;
                Self::parse(&part_name, bytes)
            }
            RelLookup::NotFound => {
                let store = Self {
                    part_name: COMMENTS_PART.to_string(),
                    namespaces: CANONICAL_NAMESPACES
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    comments: Vec::new(),
                };
                package.set_part(COMMENTS_PART, store.serialize()?);
                package.add_relationship(COMMENTS_REL_TYPE, "comments.xml")?;
                package.ensure_content_type_override("/word/comments.xml", COMMENTS_CONTENT_TYPE)?;
                Ok(store)
            }
        }
    }

    /// Parses an existing comments part. Malformed bytes are fatal; no
    /// partial recovery of a corrupt store is attempted.
    pub fn parse(part_name: &str, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).context("comments part is not UTF-8")?;
        let doc = roxmltree::Document::parse(text).context("malformed comments part")?;
        let root = doc.root_element();

        let namespaces = root
            .namespaces()
            .map(|ns| {
                let key = match ns.name() {
                    Some(prefix) => format!("xmlns:{prefix}"),
                    None => "xmlns".to_string(),
                };
                (key, ns.uri().to_string())
            })
            .collect();

        let mut comments = Vec::new();
        for node in root.children().filter(|n| n.is_element()) {
            if node.tag_name().name() != "comment" {
                continue;
            }
            let id = node
                .attribute((W_NS, "id"))
                .context("comment is missing its id attribute")?
                .parse::<u32>()
                .context("comment id is not a non-negative integer")?;
            let author = node.attribute((W_NS, "author")).unwrap_or_default().to_string();
            let date = node.attribute((W_NS, "date")).unwrap_or_default().to_string();
            let runs = parse_comment_runs(node);
            comments.push(Comment {
                id,
                author,
                date,
                runs,
            });
        }

        Ok(Self {
            part_name: part_name.to_string(),
            namespaces,
            comments,
        })
    }

    pub fn part_name(&self) -> &str {
        &self.part_name
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    /// Appends a comment with `id = current store size` and writes the
    /// updated part bytes back into the package. Empty-text runs are dropped;
    /// existing comments pass through untouched.
    pub fn append(
        &mut self,
        package: &mut DocxPackage,
        author: &str,
        runs: Vec<StyledRun>,
    ) -> Result<u32> {
        let id = self.comments.len() as u32;
        let runs = runs.into_iter().filter(|r| !r.text.is_empty()).collect();
        self.comments.push(Comment {
            id,
            author: author.to_string(),
            date: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            runs,
        });
        package.set_part(&self.part_name, self.serialize()?);
        Ok(id)
    }

    /// Serializes the whole store to part bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

        let mut root = BytesStart::new("w:comments");
        for (key, value) in &self.namespaces {
            root.push_attribute((key.as_str(), value.as_str()));
        }

        if self.comments.is_empty() {
            writer.write_event(Event::Empty(root))?;
            return Ok(writer.into_inner().into_inner());
        }

        writer.write_event(Event::Start(root))?;
        for comment in &self.comments {
            write_comment(&mut writer, comment)?;
        }
        writer.write_event(Event::End(BytesEnd::new("w:comments")))?;
        Ok(writer.into_inner().into_inner())
    }
}

fn write_comment(writer: &mut Writer<Cursor<Vec<u8>>>, comment: &Comment) -> Result<()> {
    let id = comment.id.to_string();
    let mut start = BytesStart::new("w:comment");
    start.push_attribute(("w:id", id.as_str()));
    start.push_attribute(("w:author", comment.author.as_str()));
    start.push_attribute(("w:date", comment.date.as_str()));
    writer.write_event(Event::Start(start))?;

    writer.write_event(Event::Start(BytesStart::new("w:p")))?;
    for run in &comment.runs {
        if run.text.is_empty() {
            continue;
        }
        writer.write_event(Event::Start(BytesStart::new("w:r")))?;
        if !run.style.is_plain() {
            writer.write_event(Event::Start(BytesStart::new("w:rPr")))?;
            if run.style.strike {
                writer.write_event(Event::Empty(BytesStart::new("w:strike")))?;
            }
            if let Some(color) = &run.style.color {
                let mut e = BytesStart::new("w:color");
                e.push_attribute(("w:val", color.as_str()));
                writer.write_event(Event::Empty(e))?;
            }
            if run.style.bold {
                writer.write_event(Event::Empty(BytesStart::new("w:b")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("w:rPr")))?;
        }
        let mut t = BytesStart::new("w:t");
        t.push_attribute(("xml:space", "preserve"));
        writer.write_event(Event::Start(t))?;
        writer.write_event(Event::Text(BytesText::new(&run.text)))?;
        writer.write_event(Event::End(BytesEnd::new("w:t")))?;
        writer.write_event(Event::End(BytesEnd::new("w:r")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("w:p")))?;

    writer.write_event(Event::End(BytesEnd::new("w:comment")))?;
    Ok(())
}

fn parse_comment_runs(comment: roxmltree::Node) -> Vec<StyledRun> {
    let mut runs = Vec::new();
    let Some(paragraph) = comment
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "p")
    else {
        return runs;
    };
    for run in paragraph
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "r")
    {
        let mut style = RunStyle::default();
        if let Some(props) = run
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "rPr")
        {
            for prop in props.children().filter(|n| n.is_element()) {
                match prop.tag_name().name() {
                    "strike" => style.strike = flag_is_set(prop),
                    "b" => style.bold = flag_is_set(prop),
                    "color" => {
                        style.color = prop.attribute((W_NS, "val")).map(|v| v.to_string());
                    }
                    _ => {}
                }
            }
        }
        let text: String = run
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "t")
            .filter_map(|n| n.text())
            .collect();
        if !text.is_empty() {
            runs.push(StyledRun { text, style });
        }
    }
    runs
}

// Presence-only flags like w:strike may still carry an explicit off value.
fn flag_is_set(node: roxmltree::Node) -> bool {
    match node.attribute((W_NS, "val")) {
        Some("false") | Some("0") | Some("off") => false,
        _ => true,
    }
}

fn resolve_part_name(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("word/{target}"),
    }
}

/// Splices the range markers and the reference run for `comment_id` around
/// the anchor pair: range start becomes the first child of the start node,
/// range end the last child of the end node, and a zero-width reference run
/// is appended to the start node. The comment must already be in the store.
pub fn anchor_comment(
    document: &mut DocumentXml,
    anchor: (NodeId, NodeId),
    comment_id: u32,
) -> Result<()> {
    let (start, end) = anchor;
    let id = comment_id.to_string();
    let tree = document.tree_mut();

    let range_start = tree.new_element("w:commentRangeStart");
    tree.set_attribute(range_start, "w:id", &id);
    tree.insert_child(start, 0, range_start);

    let range_end = tree.new_element("w:commentRangeEnd");
    tree.set_attribute(range_end, "w:id", &id);
    tree.append_child(end, range_end);

    let reference_run = tree.new_element("w:r");
    tree.set_attribute(reference_run, "w:rsidDel", "00000000");
    tree.set_attribute(reference_run, "w:rsidR", "00000000");
    tree.set_attribute(reference_run, "w:rsidRPr", "00000000");
    let reference = tree.new_element("w:commentReference");
    tree.set_attribute(reference, "w:id", &id);
    tree.append_child(reference_run, reference);
    tree.append_child(start, reference_run);

    Ok(())
}

/// One atomic "add comment" operation: commits the comment to the store,
/// then anchors it. If anchoring failed after a successful append the
/// committed comment stays in the store; the store is append-only and no
/// implicit cleanup is attempted.
pub fn add_formatted_comment(
    package: &mut DocxPackage,
    store: &mut CommentsStore,
    document: &mut DocumentXml,
    anchor: CommentAnchor,
    author: &str,
    runs: Vec<StyledRun>,
) -> Result<u32> {
    let (start, end) = anchor.normalize();
    let id = store.append(package, author, runs)?;
    anchor_comment(document, (start, end), id)?;
    Ok(id)
}
