//! Document review orchestration.
//!
//! Walks body paragraphs and table cells, asks the correction provider for a
//! corrected version of each unit, and files an attributed diff comment on
//! every unit where the two differ. Single-threaded and non-reentrant: the
//! store append and the marker splice share the package and document tree
//! with no isolation, so comment ids are committed strictly in walk order.

use crate::comments::{add_formatted_comment, CommentAnchor, CommentsStore};
use crate::diff::{colored_console_diff, diff_segments, styled_runs_from_diff};
use crate::document::DocumentXml;
use crate::llm::CorrectionProvider;
use crate::package::DocxPackage;
use crate::xml::NodeId;
use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ReviewSummary {
    pub units_reviewed: usize,
    pub comments_added: usize,
    pub failures: usize,
}

pub struct DocxReviewer {
    package: DocxPackage,
    document: DocumentXml,
    author: String,
    store: Option<CommentsStore>,
    summary: ReviewSummary,
}

impl DocxReviewer {
    pub fn open<P: AsRef<Path>>(path: P, author: &str) -> Result<Self> {
        info!("Opening document '{}'", path.as_ref().display());
        let package = DocxPackage::open(path)?;
        Self::from_package(package, author)
    }

    pub fn from_package(package: DocxPackage, author: &str) -> Result<Self> {
        let document = DocumentXml::load(&package)?;
        Ok(Self {
            package,
            document,
            author: author.to_string(),
            store: None,
            summary: ReviewSummary::default(),
        })
    }

    /// Reviews every paragraph and table cell paragraph in the document.
    /// Per-unit failures are logged and skipped; a comments store that cannot
    /// be initialized aborts the pass, since no later comment could be filed
    /// either.
    pub fn review(&mut self, provider: &mut dyn CorrectionProvider) -> Result<ReviewSummary> {
        let paragraphs = self.document.paragraphs()?;
        let total = paragraphs.len();
        info!("Processing {total} paragraphs.");
        for (i, node) in paragraphs.into_iter().enumerate() {
            self.review_unit(provider, &format!("paragraph {i}/{total}"), node)?;
        }

        let tables = self.document.tables()?;
        let table_total = tables.len();
        info!("Processing {table_total} tables.");
        for (t, table) in tables.into_iter().enumerate() {
            info!("Reviewing table {t}/{table_total}.");
            for (c, cell) in self.document.table_cells(table)?.into_iter().enumerate() {
                let cell_total = cell.paragraphs.len();
                for (p, node) in cell.paragraphs.into_iter().enumerate() {
                    let unit_id =
                        format!("table {t}/{table_total}, cell {c}, paragraph {p}/{cell_total}");
                    self.review_unit(provider, &unit_id, node)?;
                }
            }
        }

        Ok(self.summary.clone())
    }

    /// Writes the mutated document tree back into the package and saves it.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.document.store(&mut self.package)?;
        self.package.save(path)
    }

    pub fn package(&self) -> &DocxPackage {
        &self.package
    }

    pub fn document(&self) -> &DocumentXml {
        &self.document
    }

    fn review_unit(
        &mut self,
        provider: &mut dyn CorrectionProvider,
        unit_id: &str,
        node: NodeId,
    ) -> Result<()> {
        let original = self.document.text(node).trim().to_string();
        info!("Reviewing {unit_id}: '{}'", preview(&original));
        if original.is_empty() {
            debug!("Review of {unit_id}: empty, skipped.");
            return Ok(());
        }
        self.summary.units_reviewed += 1;

        let corrected = match provider.correct(&original) {
            Ok(corrected) => corrected.trim().to_string(),
            Err(e) => {
                error!("Review of {unit_id}: correction failed: {e:#}");
                self.summary.failures += 1;
                return Ok(());
            }
        };

        if corrected == original {
            debug!("Review of {unit_id}: no changes proposed.");
            return Ok(());
        }

        warn!("Review of {unit_id}: change proposed.");
        warn!("  Original:  '{original}'");
        warn!("  Suggested: '{corrected}'");
        warn!("  Diff:      '{}'", colored_console_diff(&original, &corrected));

        self.annotate(unit_id, node, &original, &corrected)
    }

    fn annotate(
        &mut self,
        unit_id: &str,
        node: NodeId,
        original: &str,
        corrected: &str,
    ) -> Result<()> {
        let runs = styled_runs_from_diff(&diff_segments(original, corrected));

        // A store that cannot be set up fails the whole pass.
        if self.store.is_none() {
            let store = CommentsStore::ensure(&mut self.package)
                .context("cannot initialize comments store")?;
            self.store = Some(store);
        }
        let store = match self.store.as_mut() {
            Some(store) => store,
            None => bail!("comments store unavailable"),
        };

        // Append-then-anchor; a committed comment is left in place even if
        // anchoring fails, and the pass moves on to the next unit.
        match add_formatted_comment(
            &mut self.package,
            store,
            &mut self.document,
            CommentAnchor::Single(node),
            &self.author,
            runs,
        ) {
            Ok(id) => {
                debug!("Review of {unit_id}: comment {id} added.");
                self.summary.comments_added += 1;
            }
            Err(e) => {
                error!("Review of {unit_id}: could not add comment: {e:#}");
                self.summary.failures += 1;
            }
        }
        Ok(())
    }
}

/// Truncates long text for log lines.
pub fn preview(text: &str) -> String {
    if text.chars().count() > 50 {
        let cut: String = text.chars().take(50).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// `report.docx` -> `report_reviewed.docx`.
pub fn reviewed_path(original: &str) -> String {
    match original.strip_suffix(".docx") {
        Some(stem) => format!("{stem}_reviewed.docx"),
        None => format!("{original}_reviewed.docx"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{COMMENTS_PART, DOCUMENT_PART};
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    struct StubProvider {
        corrections: HashMap<String, String>,
        calls: Vec<String>,
    }

    impl StubProvider {
        fn new(corrections: &[(&str, &str)]) -> Self {
            Self {
                corrections: corrections
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: Vec::new(),
            }
        }
    }

    impl CorrectionProvider for StubProvider {
        fn correct(&mut self, original: &str) -> Result<String> {
            self.calls.push(original.to_string());
            Ok(self
                .corrections
                .get(original)
                .cloned()
                .unwrap_or_else(|| original.to_string()))
        }
    }

    struct FailingProvider;

    impl CorrectionProvider for FailingProvider {
        fn correct(&mut self, original: &str) -> Result<String> {
            if original.contains("boom") {
                bail!("provider unavailable");
            }
            Ok(original.replace("Teh", "The"))
        }
    }

    fn test_package() -> DocxPackage {
        let mut parts = BTreeMap::new();
        parts.insert(
            "[Content_Types].xml".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#
                .to_vec(),
        );
        parts.insert(
            "word/_rels/document.xml.rels".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"/>"#
                .to_vec(),
        );
        parts.insert(
            DOCUMENT_PART.to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Teh cat sat.</w:t></w:r></w:p><w:p><w:r><w:t>All fine here.</w:t></w:r></w:p><w:p/><w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell wiht typo.</w:t></w:r></w:p></w:tc></w:tr></w:tbl></w:body></w:document>"#
                .to_vec(),
        );
        DocxPackage::from_parts(parts)
    }

    #[test]
    fn comments_only_changed_units() {
        let mut reviewer = DocxReviewer::from_package(test_package(), "Reviewer").unwrap();
        let mut provider = StubProvider::new(&[
            ("Teh cat sat.", "The cat sat."),
            ("Cell wiht typo.", "Cell with typo."),
        ]);

        let summary = reviewer.review(&mut provider).unwrap();
        assert_eq!(summary.units_reviewed, 3);
        assert_eq!(summary.comments_added, 2);
        assert_eq!(summary.failures, 0);
        // The empty paragraph never reaches the provider.
        assert_eq!(provider.calls.len(), 3);

        let store = CommentsStore::ensure(&mut reviewer.package).unwrap();
        let ids: Vec<u32> = store.comments().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn markers_reference_committed_comment_ids() {
        let mut reviewer = DocxReviewer::from_package(test_package(), "Reviewer").unwrap();
        let mut provider = StubProvider::new(&[("Teh cat sat.", "The cat sat.")]);
        reviewer.review(&mut provider).unwrap();

        let xml = reviewer.document.tree().serialize().unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains(r#"<w:commentRangeStart w:id="0"/>"#));
        assert!(xml.contains(r#"<w:commentRangeEnd w:id="0"/>"#));
        assert!(xml.contains(r#"<w:commentReference w:id="0"/>"#));
        // The clean paragraph is untouched.
        assert!(!xml.contains(r#"w:id="1""#));
    }

    #[test]
    fn provider_failure_skips_unit_but_continues() {
        let mut parts = BTreeMap::new();
        parts.insert(
            "[Content_Types].xml".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"></Types>"#
                .to_vec(),
        );
        parts.insert(
            "word/_rels/document.xml.rels".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"/>"#
                .to_vec(),
        );
        parts.insert(
            DOCUMENT_PART.to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>boom here</w:t></w:r></w:p><w:p><w:r><w:t>Teh rest.</w:t></w:r></w:p></w:body></w:document>"#
                .to_vec(),
        );
        let mut reviewer =
            DocxReviewer::from_package(DocxPackage::from_parts(parts), "Reviewer").unwrap();

        let summary = reviewer.review(&mut FailingProvider).unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.comments_added, 1);
        assert!(reviewer.package.has_part(COMMENTS_PART));
    }

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(60);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 53);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn reviewed_path_inserts_suffix() {
        assert_eq!(reviewed_path("report.docx"), "report_reviewed.docx");
        assert_eq!(reviewed_path("notes"), "notes_reviewed.docx");
    }
}
