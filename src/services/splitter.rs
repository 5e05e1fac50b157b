use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::state::ChapterRange;
use crate::utils::pdf::DocumentReader;

/// Cuts a source document into one sub-document per chapter.
#[derive(Clone)]
pub struct ChapterSplitter {
    reader: Arc<dyn DocumentReader>,
}

impl ChapterSplitter {
    pub fn new(reader: Arc<dyn DocumentReader>) -> Self {
        Self { reader }
    }

    /// Returns one path per range, in range order. A single range copies the
    /// source verbatim regardless of its bounds. Ranges running past the end
    /// of the document are cut at the last page.
    pub fn split(
        &self,
        source: &Path,
        ranges: &[ChapterRange],
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "pdf".to_string());

        if ranges.is_empty() {
            info!("No chapters to split");
            return Ok(Vec::new());
        }

        if let [only] = ranges {
            let dest = output_dir.join(format!("{}.{}", sanitize_title(&only.title), extension));
            std::fs::copy(source, &dest).with_context(|| {
                format!("Failed to copy {} to {}", source.display(), dest.display())
            })?;
            info!("Single chapter '{}', copied source to {}", only.title, dest.display());
            return Ok(vec![dest]);
        }

        let document = self.reader.open(source)?;
        let page_count = document.page_count();

        let mut seen = HashSet::new();
        let mut outputs = Vec::with_capacity(ranges.len());
        for range in ranges {
            let file_name = format!("{}.{}", sanitize_title(&range.title), extension);
            if !seen.insert(file_name.clone()) {
                warn!(
                    "Chapter file name {} repeats, the earlier chapter is overwritten",
                    file_name
                );
            }
            let dest = output_dir.join(&file_name);

            let last = match first_missing_page(range, page_count) {
                Some(missing) => {
                    warn!(
                        "Page {} for '{}' is out of bounds for the input document ({} pages). \
                         Stopping at page {}.",
                        missing, range.title, page_count, page_count
                    );
                    page_count
                }
                None => range.end_page,
            };

            document
                .write_pages(range.start_page, last, &dest)
                .with_context(|| format!("Failed to write chapter '{}'", range.title))?;
            info!("Created: {} (Pages {}-{})", dest.display(), range.start_page, range.end_page);
            outputs.push(dest);
        }

        Ok(outputs)
    }
}

/// First page of `range` the document does not have, if any.
fn first_missing_page(range: &ChapterRange, page_count: u32) -> Option<u32> {
    if range.end_page > page_count {
        Some(range.start_page.max(page_count + 1))
    } else {
        None
    }
}

/// File-name-safe form of a chapter title.
///
/// Trim; anything but alphanumerics, spaces and hyphens becomes `_`;
/// spaces become `_`; trailing `.`/`_` are stripped; then one left-to-right
/// pass turns each `__` into `_`, so longer runs only shrink.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' || c == '-' { c } else { '_' })
        .collect();
    replaced
        .replace(' ', "_")
        .trim_end_matches(&['.', '_'][..])
        .replace("__", "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::pdf::PagedDocument;
    use std::sync::Mutex;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title(" My Chapter!! "), "My_Chapter");
        assert_eq!(sanitize_title("Chapter 1: The Start"), "Chapter_1_The_Start");
        assert_eq!(sanitize_title("Volume 2 - Part 1."), "Volume_2_-_Part_1");
        assert_eq!(sanitize_title("序章　始まり"), "序章_始まり");
    }

    #[test]
    fn test_sanitize_collapses_pairs_in_one_pass() {
        assert_eq!(sanitize_title("a__b"), "a_b");
        assert_eq!(sanitize_title("a___b"), "a__b");
        assert_eq!(sanitize_title("a____b"), "a__b");
        assert_eq!(sanitize_title("A: B"), "A_B");
        assert_eq!(sanitize_title("A :: B"), "A__B");
    }

    /// Text stand-in for a PDF: one line per page.
    struct FakeDocument {
        pages: u32,
        writes: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl PagedDocument for FakeDocument {
        fn page_count(&self) -> u32 {
            self.pages
        }

        fn write_pages(&self, first: u32, last: u32, dest: &Path) -> Result<()> {
            assert!(last <= self.pages, "caller must clamp to the document end");
            self.writes.lock().unwrap().push((first, last));
            let body: Vec<String> = (first..=last).map(|p| format!("page {}", p)).collect();
            std::fs::write(dest, body.join("\n"))?;
            Ok(())
        }
    }

    struct FakeReader {
        pages: u32,
        writes: Arc<Mutex<Vec<(u32, u32)>>>,
        opened: Arc<Mutex<usize>>,
    }

    impl FakeReader {
        fn new(pages: u32) -> Self {
            Self {
                pages,
                writes: Arc::new(Mutex::new(Vec::new())),
                opened: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl DocumentReader for FakeReader {
        fn open(&self, _path: &Path) -> Result<Box<dyn PagedDocument>> {
            *self.opened.lock().unwrap() += 1;
            Ok(Box::new(FakeDocument {
                pages: self.pages,
                writes: self.writes.clone(),
            }))
        }
    }

    fn range(title: &str, start_page: u32, end_page: u32) -> ChapterRange {
        ChapterRange {
            title: title.to_string(),
            start_page,
            end_page,
        }
    }

    #[test]
    fn test_single_chapter_is_verbatim_copy() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("novel.pdf");
        std::fs::write(&source, b"%PDF whole novel bytes")?;

        let reader = FakeReader::new(10);
        let opened = reader.opened.clone();
        let splitter = ChapterSplitter::new(Arc::new(reader));

        let chapters_dir = temp_dir.path().join("chapters");
        let out = splitter.split(&source, &[range(" My Chapter!! ", 3, 4)], &chapters_dir)?;

        assert_eq!(out, vec![temp_dir.path().join("chapters/My_Chapter.pdf")]);
        assert_eq!(std::fs::read(&out[0])?, b"%PDF whole novel bytes");
        assert_eq!(*opened.lock().unwrap(), 0, "no page extraction for one chapter");
        Ok(())
    }

    #[test]
    fn test_multi_chapter_truncates_overflowing_range() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("novel.pdf");
        std::fs::write(&source, b"%PDF")?;

        let reader = FakeReader::new(5);
        let writes = reader.writes.clone();
        let splitter = ChapterSplitter::new(Arc::new(reader));

        let ranges = [range("Prologue", 1, 2), range("Chapter 1", 3, 9)];
        let out = splitter.split(&source, &ranges, temp_dir.path())?;

        assert_eq!(
            out,
            vec![temp_dir.path().join("Prologue.pdf"), temp_dir.path().join("Chapter_1.pdf")]
        );
        assert_eq!(*writes.lock().unwrap(), vec![(1, 2), (3, 5)]);
        assert_eq!(std::fs::read_to_string(&out[1])?, "page 3\npage 4\npage 5");
        Ok(())
    }

    #[test]
    fn test_range_starting_past_end_yields_empty_chapter() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("novel.pdf");
        std::fs::write(&source, b"%PDF")?;

        let reader = FakeReader::new(3);
        let writes = reader.writes.clone();
        let splitter = ChapterSplitter::new(Arc::new(reader));

        let ranges = [range("One", 1, 3), range("Ghost", 7, 8)];
        let out = splitter.split(&source, &ranges, temp_dir.path())?;

        assert_eq!(out.len(), 2);
        assert_eq!(writes.lock().unwrap()[1], (7, 3));
        assert_eq!(std::fs::read_to_string(&out[1])?, "");
        Ok(())
    }

    #[test]
    fn test_first_missing_page() {
        assert_eq!(first_missing_page(&range("In", 1, 3), 3), None);
        assert_eq!(first_missing_page(&range("Tail", 2, 9), 3), Some(4));
        assert_eq!(first_missing_page(&range("Ghost", 7, 8), 3), Some(7));
    }

    #[test]
    fn test_no_ranges_produce_no_files() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("novel.pdf");
        std::fs::write(&source, b"%PDF")?;

        let reader = FakeReader::new(3);
        let opened = reader.opened.clone();
        let splitter = ChapterSplitter::new(Arc::new(reader));

        let out = splitter.split(&source, &[], &temp_dir.path().join("chapters"))?;
        assert!(out.is_empty());
        assert_eq!(*opened.lock().unwrap(), 0);
        Ok(())
    }

    #[test]
    fn test_repeated_titles_share_one_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("novel.pdf");
        std::fs::write(&source, b"%PDF")?;

        let splitter = ChapterSplitter::new(Arc::new(FakeReader::new(4)));
        let ranges = [range("Interlude", 1, 2), range("Interlude!", 3, 4)];
        let out = splitter.split(&source, &ranges, temp_dir.path())?;

        assert_eq!(out[0], out[1]);
        assert_eq!(std::fs::read_to_string(&out[0])?, "page 3\npage 4", "later chapter wins");
        Ok(())
    }

    #[test]
    fn test_split_real_pdf() -> Result<()> {
        use crate::utils::pdf::{tests::write_sample_pdf, PdfReader};

        let temp_dir = tempfile::tempdir()?;
        let source = temp_dir.path().join("novel.pdf");
        write_sample_pdf(&source, 6)?;

        let splitter = ChapterSplitter::new(Arc::new(PdfReader));
        let ranges = [range("Part A", 1, 2), range("Part B", 3, 10)];
        let out = splitter.split(&source, &ranges, &temp_dir.path().join("chapters"))?;

        assert_eq!(PdfReader.open(&out[0])?.page_count(), 2);
        assert_eq!(PdfReader.open(&out[1])?.page_count(), 4);
        Ok(())
    }
}
