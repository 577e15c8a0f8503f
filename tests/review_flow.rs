//! End-to-end review flow over a real zip package.
//!
//! Exercises: open from bytes, review with a stub provider, comment store
//! creation and wiring, marker splicing, save to disk, reopen and verify.

use anyhow::Result;
use docx_review::comments::CommentsStore;
use docx_review::document::DocumentXml;
use docx_review::llm::CorrectionProvider;
use docx_review::package::{DocxPackage, RelLookup, COMMENTS_PART, COMMENTS_REL_TYPE};
use docx_review::reviewer::DocxReviewer;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"/>"#;

const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Teh first paragraph.</w:t></w:r></w:p><w:p><w:r><w:t>This one is clean.</w:t></w:r></w:p><w:p><w:r><w:t>Anohter typo here.</w:t></w:r></w:p></w:body></w:document>"#;

fn sample_docx() -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let entries = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS),
        ("word/document.xml", DOCUMENT),
    ];
    for (name, content) in entries {
        zip.start_file(name, FileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

struct FixingProvider;

impl CorrectionProvider for FixingProvider {
    fn correct(&mut self, original: &str) -> Result<String> {
        Ok(original.replace("Teh", "The").replace("Anohter", "Another"))
    }
}

#[test]
fn review_annotates_and_survives_a_save_cycle() {
    let package = DocxPackage::from_reader(Cursor::new(sample_docx())).unwrap();
    let mut reviewer = DocxReviewer::from_package(package, "Integration Reviewer").unwrap();

    let summary = reviewer.review(&mut FixingProvider).unwrap();
    assert_eq!(summary.units_reviewed, 3);
    assert_eq!(summary.comments_added, 2);
    assert_eq!(summary.failures, 0);
    assert!(reviewer.package().has_part(COMMENTS_PART));
    assert!(!reviewer.document().paragraphs().unwrap().is_empty());

    let dir = tempfile::TempDir::new().unwrap();
    let out_path = dir.path().join("reviewed.docx");
    reviewer.save(&out_path).unwrap();

    let reopened = DocxPackage::open(&out_path).unwrap();

    // Comments relationship and part are wired up exactly once.
    match reopened.find_relationship(COMMENTS_REL_TYPE).unwrap() {
        RelLookup::Found(target) => assert_eq!(target, "comments.xml"),
        RelLookup::NotFound => panic!("comments relationship missing after save"),
    }
    let types = String::from_utf8(reopened.part("[Content_Types].xml").unwrap().to_vec()).unwrap();
    assert_eq!(types.matches("/word/comments.xml").count(), 1);

    // Store contents survive the zip round trip.
    let store = CommentsStore::parse(COMMENTS_PART, reopened.part(COMMENTS_PART).unwrap()).unwrap();
    assert_eq!(store.len(), 2);
    let ids: Vec<u32> = store.comments().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![0, 1]);
    for comment in store.comments() {
        assert_eq!(comment.author, "Integration Reviewer");
        assert!(!comment.runs.is_empty());
    }

    // First comment body reads as a before/after narrative of the typo.
    let first = &store.comments()[0];
    assert_eq!(first.runs[0].text, "Teh");
    assert!(first.runs[0].style.strike);
    assert_eq!(first.runs[0].style.color.as_deref(), Some("FF0000"));
    assert_eq!(first.runs[1].text, "The");
    assert_eq!(first.runs[1].style.color.as_deref(), Some("00B050"));

    // Markers sit on the changed paragraphs and reference the right ids.
    // For a single-node anchor the children end with the range end followed
    // by the zero-width reference run, since the reference is appended last.
    let document = DocumentXml::load(&reopened).unwrap();
    let paragraphs = document.paragraphs().unwrap();
    let tree = document.tree();
    for (node, id) in [(paragraphs[0], "0"), (paragraphs[2], "1")] {
        let children = tree.children(node);
        assert_eq!(tree.name(children[0]), Some("w:commentRangeStart"));
        assert_eq!(tree.attribute(children[0], "w:id"), Some(id));
        let range_end = children[children.len() - 2];
        assert_eq!(tree.name(range_end), Some("w:commentRangeEnd"));
        assert_eq!(tree.attribute(range_end, "w:id"), Some(id));
        let last = *children.last().unwrap();
        assert_eq!(tree.name(last), Some("w:r"));
        let reference = tree.children(last)[0];
        assert_eq!(tree.name(reference), Some("w:commentReference"));
        assert_eq!(tree.attribute(reference, "w:id"), Some(id));
    }
    // The clean paragraph carries no markers.
    for &child in tree.children(paragraphs[1]) {
        assert_eq!(tree.name(child), Some("w:r"));
    }
}

#[test]
fn second_review_pass_extends_the_existing_store() {
    let package = DocxPackage::from_reader(Cursor::new(sample_docx())).unwrap();
    let mut reviewer = DocxReviewer::from_package(package, "First Pass").unwrap();
    reviewer.review(&mut FixingProvider).unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("pass1.docx");
    reviewer.save(&path).unwrap();

    // Second pass over the saved file: the store is found, not recreated,
    // and new ids continue from the existing count.
    let mut package = DocxPackage::open(&path).unwrap();
    let mut store = CommentsStore::ensure(&mut package).unwrap();
    assert_eq!(store.len(), 2);
    let id = store
        .append(
            &mut package,
            "Second Pass",
            docx_review::diff::plain_runs("follow-up note"),
        )
        .unwrap();
    assert_eq!(id, 2);

    let reparsed = CommentsStore::parse(
        COMMENTS_PART,
        package.part(COMMENTS_PART).unwrap(),
    )
    .unwrap();
    assert_eq!(reparsed.len(), 3);
    assert_eq!(reparsed.comments()[2].author, "Second Pass");
}
