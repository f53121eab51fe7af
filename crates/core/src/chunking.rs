use crate::config::ChunkingConfig;
use crate::error::RagError;
use crate::models::{sha256_hex, Chunk, Page, PageRange};

const PAGE_SEPARATOR: &str = "\n\n";

/// The pages of one document joined into a single character sequence,
/// remembering where each page lives in it.
#[derive(Debug, Clone)]
pub struct PageLayout {
    chars: Vec<char>,
    spans: Vec<PageSpan>,
}

#[derive(Debug, Clone, Copy)]
struct PageSpan {
    number: u32,
    start: usize,
    end: usize,
}

impl PageLayout {
    pub fn concatenate(pages: &[Page]) -> Self {
        let mut chars = Vec::new();
        let mut spans = Vec::with_capacity(pages.len());

        for (position, page) in pages.iter().enumerate() {
            if position > 0 {
                chars.extend(PAGE_SEPARATOR.chars());
            }
            let start = chars.len();
            chars.extend(page.text().chars());
            spans.push(PageSpan {
                number: page.number,
                start,
                end: chars.len(),
            });
        }

        Self { chars, spans }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_blank(&self) -> bool {
        self.chars.iter().all(|c| c.is_whitespace())
    }

    pub fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn pages_for(&self, start: usize, end: usize) -> PageRange {
        let mut touched = self
            .spans
            .iter()
            .filter(|span| span.start < end && span.end > start)
            .map(|span| span.number);

        match touched.next() {
            Some(first) => PageRange {
                start: first,
                end: touched.last().unwrap_or(first),
            },
            None => {
                let number = self
                    .spans
                    .iter()
                    .rev()
                    .find(|span| span.start <= start)
                    .or(self.spans.first())
                    .map_or(1, |span| span.number);
                PageRange {
                    start: number,
                    end: number,
                }
            }
        }
    }
}

/// Splits the pages of one document into overlapping chunks.
///
/// Windows are `max_chunk_chars` wide and advance by `max_chunk_chars - overlap_chars`.
/// A window prefers to end right after a paragraph break, then after a sentence
/// end, as long as the break lies within `boundary_tolerance_chars` of the edge.
pub fn chunk_pages(
    document_id: &str,
    pages: &[Page],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, RagError> {
    config.validate()?;

    let layout = PageLayout::concatenate(pages);
    if layout.is_blank() {
        return Ok(Vec::new());
    }

    let windows = split_windows(&layout.chars, config);
    let mut chunks = Vec::with_capacity(windows.len());
    let mut previous_end = 0usize;

    for (index, (start, end)) in windows.into_iter().enumerate() {
        let pages = layout.pages_for(start, end);
        chunks.push(Chunk {
            chunk_id: make_chunk_id(document_id, pages, start, end),
            document_id: document_id.to_string(),
            chunk_index: index as u32,
            text: layout.slice(start, end),
            char_start: start,
            char_end: end,
            pages,
            overlap_chars: if index == 0 { 0 } else { previous_end - start },
        });
        previous_end = end;
    }

    Ok(chunks)
}

/// Character windows `[start, end)` covering `text` with the configured overlap.
pub fn split_windows(text: &[char], config: &ChunkingConfig) -> Vec<(usize, usize)> {
    let len = text.len();
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < len {
        let hard_end = (start + config.max_chunk_chars).min(len);
        let end = if hard_end == len {
            len
        } else {
            find_break(text, start, hard_end, config)
        };

        windows.push((start, end));
        if end == len {
            break;
        }
        start = end - config.overlap_chars;
    }

    windows
}

fn find_break(text: &[char], start: usize, hard_end: usize, config: &ChunkingConfig) -> usize {
    // The next window starts at `end - overlap`, which must stay ahead of `start`.
    let floor = (start + config.overlap_chars + 1)
        .max(hard_end.saturating_sub(config.boundary_tolerance_chars));
    if floor >= hard_end {
        return hard_end;
    }

    let paragraph = (floor..=hard_end)
        .rev()
        .find(|&end| end >= 2 && text[end - 1] == '\n' && text[end - 2] == '\n');
    if let Some(end) = paragraph {
        return end;
    }

    let sentence = (floor..=hard_end).rev().find(|&end| {
        matches!(text[end - 1], '.' | '!' | '?') && text.get(end).map_or(true, |c| c.is_whitespace())
    });
    sentence.unwrap_or(hard_end)
}

fn make_chunk_id(document_id: &str, pages: PageRange, start: usize, end: usize) -> String {
    sha256_hex(&[
        document_id.as_bytes(),
        &pages.start.to_le_bytes(),
        &pages.end.to_le_bytes(),
        &(start as u64).to_le_bytes(),
        &(end as u64).to_le_bytes(),
    ])
}
