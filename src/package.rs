//! In-memory model of an OPC package (`.docx` zip).
//!
//! The package is loaded whole: every zip entry becomes a named part held as
//! bytes. Mutations happen against those bytes and `save` repackages the lot,
//! so nothing the tool does not understand is dropped on the way through.

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use zip::{write::FileOptions, ZipArchive, ZipWriter};

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const COMMENTS_PART: &str = "word/comments.xml";
pub const COMMENTS_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments";
pub const COMMENTS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml";

const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Files above this size are memory-mapped instead of buffered read.
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Outcome of a relationship lookup. "Not found" is an expected branch for
/// the comments relationship, not an error.
#[derive(Debug)]
pub enum RelLookup {
    /// Relationship exists; carries the relationship target, relative to
    /// the document part (e.g. `comments.xml`).
    Found(String),
    NotFound,
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    target_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl DocxPackage {
    /// Opens a `.docx` file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?;

        let bytes = if metadata.len() > MMAP_THRESHOLD {
            let file = File::open(path)?;
            let mmap = unsafe { Mmap::map(&file)? };
            mmap.to_vec()
        } else {
            std::fs::read(path)?
        };

        Self::from_reader(Cursor::new(bytes))
            .with_context(|| format!("cannot read package {}", path.display()))
    }

    /// Reads a package from any seekable byte source.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut parts = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.name().ends_with('/') {
                continue;
            }
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            parts.insert(entry.name().to_string(), bytes);
        }
        if !parts.contains_key(DOCUMENT_PART) {
            bail!("package has no {} part", DOCUMENT_PART);
        }
        Ok(Self { parts })
    }

    /// Builds a package directly from a part map. Used by callers that
    /// assemble documents in memory (and by the tests).
    pub fn from_parts(parts: BTreeMap<String, Vec<u8>>) -> Self {
        Self { parts }
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(|b| b.as_slice())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.parts.contains_key(name)
    }

    pub fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        self.parts.insert(name.to_string(), bytes);
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(|k| k.as_str())
    }

    /// Looks up a relationship of the main document part by relationship type.
    /// A missing relationships part counts as `NotFound`; malformed XML is fatal.
    pub fn find_relationship(&self, rel_type: &str) -> Result<RelLookup> {
        let rels = match self.parts.get(DOCUMENT_RELS_PART) {
            Some(bytes) => parse_relationships(bytes)?,
            None => return Ok(RelLookup::NotFound),
        };
        Ok(rels
            .into_iter()
            .find(|r| r.rel_type == rel_type)
            .map(|r| RelLookup::Found(r.target))
            .unwrap_or(RelLookup::NotFound))
    }

    /// Adds a relationship from the main document part and returns the new
    /// `rId`. Ids are assigned as max existing numeric id + 1 so existing
    /// relationships are never shadowed.
    pub fn add_relationship(&mut self, rel_type: &str, target: &str) -> Result<String> {
        let mut rels = match self.parts.get(DOCUMENT_RELS_PART) {
            Some(bytes) => parse_relationships(bytes)?,
            None => Vec::new(),
        };

        let next = rels
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId"))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = format!("rId{next}");

        rels.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            target_mode: None,
        });
        let bytes = serialize_relationships(&rels)?;
        self.parts.insert(DOCUMENT_RELS_PART.to_string(), bytes);
        Ok(id)
    }

    /// Registers a content-type override for `part_name` (absolute, with a
    /// leading slash) unless one is already present.
    pub fn ensure_content_type_override(
        &mut self,
        part_name: &str,
        content_type: &str,
    ) -> Result<()> {
        let bytes = self
            .parts
            .get(CONTENT_TYPES_PART)
            .with_context(|| format!("package has no {CONTENT_TYPES_PART} part"))?;
        let content = std::str::from_utf8(bytes).context("content types part is not UTF-8")?;

        if content.contains(&format!("PartName=\"{part_name}\"")) {
            return Ok(());
        }
        let Some(pos) = content.rfind("</Types>") else {
            bail!("content types part has no closing Types element");
        };
        let mut updated = content.to_string();
        updated.insert_str(
            pos,
            &format!("<Override PartName=\"{part_name}\" ContentType=\"{content_type}\"/>"),
        );
        self.parts
            .insert(CONTENT_TYPES_PART.to_string(), updated.into_bytes());
        Ok(())
    }

    /// Writes the package back out as a zip.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("cannot create {}", path.as_ref().display()))?;
        self.write_to(file)
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let mut zip = ZipWriter::new(writer);
        for (name, bytes) in &self.parts {
            zip.start_file(name.clone(), FileOptions::default())?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
        Ok(())
    }
}

fn parse_relationships(bytes: &[u8]) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut rels = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("malformed relationships part")?
        {
            Event::Start(e) | Event::Empty(e) => {
                if e.name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut rel_type = None;
                    let mut target = None;
                    let mut target_mode = None;
                    for attr in e.attributes() {
                        let attr = attr.context("malformed relationship attribute")?;
                        let value = attr.unescape_value()?.into_owned();
                        match attr.key.as_ref() {
                            b"Id" => id = Some(value),
                            b"Type" => rel_type = Some(value),
                            b"Target" => target = Some(value),
                            b"TargetMode" => target_mode = Some(value),
                            _ => {}
                        }
                    }
                    match (id, rel_type, target) {
                        (Some(id), Some(rel_type), Some(target)) => rels.push(Relationship {
                            id,
                            rel_type,
                            target,
                            target_mode,
                        }),
                        _ => bail!("relationship element missing Id, Type or Target"),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn serialize_relationships(rels: &[Relationship]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut root = BytesStart::new("Relationships");
    root.push_attribute(("xmlns", RELS_NS));
    writer.write_event(Event::Start(root))?;

    for rel in rels {
        let mut e = BytesStart::new("Relationship");
        e.push_attribute(("Id", rel.id.as_str()));
        e.push_attribute(("Type", rel.rel_type.as_str()));
        e.push_attribute(("Target", rel.target.as_str()));
        if let Some(mode) = &rel.target_mode {
            e.push_attribute(("TargetMode", mode.as_str()));
        }
        writer.write_event(Event::Empty(e))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
    Ok(writer.into_inner().into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_parts() -> BTreeMap<String, Vec<u8>> {
        let mut parts = BTreeMap::new();
        parts.insert(
            CONTENT_TYPES_PART.to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#
                .to_vec(),
        );
        parts.insert(
            DOCUMENT_RELS_PART.to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#
                .to_vec(),
        );
        parts.insert(
            DOCUMENT_PART.to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Hi</w:t></w:r></w:p></w:body></w:document>"#
                .to_vec(),
        );
        parts
    }

    #[test]
    fn lookup_distinguishes_found_and_not_found() {
        let package = DocxPackage::from_parts(minimal_parts());
        match package
            .find_relationship("http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles")
            .unwrap()
        {
            RelLookup::Found(target) => assert_eq!(target, "styles.xml"),
            RelLookup::NotFound => panic!("styles relationship should be found"),
        }
        assert!(matches!(
            package.find_relationship(COMMENTS_REL_TYPE).unwrap(),
            RelLookup::NotFound
        ));
    }

    #[test]
    fn add_relationship_assigns_fresh_id() {
        let mut package = DocxPackage::from_parts(minimal_parts());
        let id = package
            .add_relationship(COMMENTS_REL_TYPE, "comments.xml")
            .unwrap();
        assert_eq!(id, "rId2");
        match package.find_relationship(COMMENTS_REL_TYPE).unwrap() {
            RelLookup::Found(target) => assert_eq!(target, "comments.xml"),
            RelLookup::NotFound => panic!("comments relationship should exist after add"),
        }
        // The pre-existing relationship survives the rewrite.
        assert!(matches!(
            package
                .find_relationship(
                    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles"
                )
                .unwrap(),
            RelLookup::Found(_)
        ));
    }

    #[test]
    fn content_type_override_is_idempotent() {
        let mut package = DocxPackage::from_parts(minimal_parts());
        package
            .ensure_content_type_override("/word/comments.xml", COMMENTS_CONTENT_TYPE)
            .unwrap();
        package
            .ensure_content_type_override("/word/comments.xml", COMMENTS_CONTENT_TYPE)
            .unwrap();
        let content =
            String::from_utf8(package.part(CONTENT_TYPES_PART).unwrap().to_vec()).unwrap();
        assert_eq!(content.matches("/word/comments.xml").count(), 1);
    }

    #[test]
    fn zip_round_trip_preserves_parts() {
        let package = DocxPackage::from_parts(minimal_parts());
        let mut buf = Cursor::new(Vec::new());
        package.write_to(&mut buf).unwrap();
        buf.set_position(0);
        let reopened = DocxPackage::from_reader(buf).unwrap();
        assert_eq!(
            package.part_names().collect::<Vec<_>>(),
            reopened.part_names().collect::<Vec<_>>()
        );
        assert_eq!(package.part(DOCUMENT_PART), reopened.part(DOCUMENT_PART));
    }
}
