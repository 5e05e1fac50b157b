use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// An opened, page-addressable source document.
pub trait PagedDocument {
    fn page_count(&self) -> u32;

    /// Writes a new document holding pages `first..=last` (1-indexed).
    /// Callers keep `last <= page_count()`; `first > last` writes an empty
    /// document.
    fn write_pages(&self, first: u32, last: u32, dest: &Path) -> Result<()>;
}

pub trait DocumentReader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PagedDocument>>;
}

/// PDF backend built on lopdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfReader;

struct PdfDocument {
    doc: lopdf::Document,
    page_count: u32,
}

impl DocumentReader for PdfReader {
    fn open(&self, path: &Path) -> Result<Box<dyn PagedDocument>> {
        let doc = lopdf::Document::load(path)
            .with_context(|| format!("Failed to open PDF {}", path.display()))?;
        let page_count = doc.get_pages().len() as u32;
        Ok(Box::new(PdfDocument { doc, page_count }))
    }
}

impl PagedDocument for PdfDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn write_pages(&self, first: u32, last: u32, dest: &Path) -> Result<()> {
        if last > self.page_count {
            return Err(anyhow!(
                "Page {} requested from a {} page document",
                last,
                self.page_count
            ));
        }

        let mut doc = self.doc.clone();
        let unwanted: Vec<u32> = (1..=self.page_count)
            .filter(|page| *page < first || *page > last)
            .collect();
        if !unwanted.is_empty() {
            doc.delete_pages(&unwanted);
            doc.prune_objects();
        }

        doc.save(dest)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        Ok(())
    }
}
