//! Read/write view over `word/document.xml`.
//!
//! Enumeration hands out arena `NodeId`s, which stay valid while comment
//! markers are spliced into the tree, so a handle collected during the walk
//! can be used as an anchor later in the pass.

use crate::package::{DocxPackage, DOCUMENT_PART};
use crate::xml::{local_name, NodeId, XmlTree};
use anyhow::{bail, Context, Result};

#[derive(Debug)]
pub struct DocumentXml {
    tree: XmlTree,
}

/// One table cell: its node plus the cell paragraphs inside it.
#[derive(Debug)]
pub struct TableCell {
    pub node: NodeId,
    pub paragraphs: Vec<NodeId>,
}

impl DocumentXml {
    /// Loads the main document part out of a package.
    pub fn load(package: &DocxPackage) -> Result<Self> {
        let bytes = package
            .part(DOCUMENT_PART)
            .with_context(|| format!("package has no {DOCUMENT_PART} part"))?;
        Self::parse(bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let tree = XmlTree::parse(bytes).context("cannot parse document part")?;
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut XmlTree {
        &mut self.tree
    }

    fn body(&self) -> Result<NodeId> {
        self.tree
            .children(self.tree.root())
            .iter()
            .copied()
            .find(|&n| self.is_named(n, "body"))
            .ok_or_else(|| anyhow::anyhow!("document part has no body element"))
    }

    /// Body-level paragraphs, in document order. Paragraphs inside tables are
    /// reached through `tables` instead, mirroring how the review walks them.
    pub fn paragraphs(&self) -> Result<Vec<NodeId>> {
        let body = self.body()?;
        Ok(self
            .tree
            .children(body)
            .iter()
            .copied()
            .filter(|&n| self.is_named(n, "p"))
            .collect())
    }

    /// Body-level tables, in document order.
    pub fn tables(&self) -> Result<Vec<NodeId>> {
        let body = self.body()?;
        Ok(self
            .tree
            .children(body)
            .iter()
            .copied()
            .filter(|&n| self.is_named(n, "tbl"))
            .collect())
    }

    /// Cells of a table, visiting each merged cell once: a cell whose
    /// properties carry a `vMerge` continuation belongs to the cell above it
    /// and is skipped. Horizontally merged cells already appear as a single
    /// `tc` with a `gridSpan`, so no extra handling is needed there.
    pub fn table_cells(&self, table: NodeId) -> Result<Vec<TableCell>> {
        if !self.is_named(table, "tbl") {
            bail!("node is not a table");
        }
        let mut cells = Vec::new();
        for &row in self.tree.children(table) {
            if !self.is_named(row, "tr") {
                continue;
            }
            for &cell in self.tree.children(row) {
                if !self.is_named(cell, "tc") || self.is_merge_continuation(cell) {
                    continue;
                }
                let paragraphs = self
                    .tree
                    .children(cell)
                    .iter()
                    .copied()
                    .filter(|&n| self.is_named(n, "p"))
                    .collect();
                cells.push(TableCell {
                    node: cell,
                    paragraphs,
                });
            }
        }
        Ok(cells)
    }

    /// Concatenated run text (`w:t` descendants) of a node.
    pub fn text(&self, node: NodeId) -> String {
        let mut out = String::new();
        for n in self.tree.descendants(node) {
            if self.is_named(n, "t") {
                out.push_str(&self.tree.collect_text(n));
            }
        }
        out
    }

    /// Serializes the tree back into the package's document part.
    pub fn store(&self, package: &mut DocxPackage) -> Result<()> {
        let bytes = self.tree.serialize()?;
        package.set_part(DOCUMENT_PART, bytes);
        Ok(())
    }

    fn is_named(&self, node: NodeId, local: &str) -> bool {
        self.tree
            .name(node)
            .map(|n| local_name(n) == local)
            .unwrap_or(false)
    }

    fn is_merge_continuation(&self, cell: NodeId) -> bool {
        let Some(props) = self
            .tree
            .children(cell)
            .iter()
            .copied()
            .find(|&n| self.is_named(n, "tcPr"))
        else {
            return false;
        };
        let Some(vmerge) = self
            .tree
            .children(props)
            .iter()
            .copied()
            .find(|&n| self.is_named(n, "vMerge"))
        else {
            return false;
        };
        // `<w:vMerge/>` and `val="continue"` both mean continuation; only
        // `val="restart"` opens a new merged region.
        self.tree
            .attribute(vmerge, "w:val")
            .map(|v| v != "restart")
            .unwrap_or(true)
    }
}
