//! PDF loading and chunking for the knowledge store.

use std::path::Path;

use crate::error::{PdfChatError, Result};

/// Extract the plain text of every page in a PDF file.
///
/// Blocking; callers on the async runtime should go through
/// `tokio::task::spawn_blocking`.
pub fn extract_pdf_text(path: &Path) -> Result<String> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| PdfChatError::Pdf(format!("{}: {e}", path.display())))?;
    Ok(normalize_whitespace(&text))
}

/// Collapse runs of spaces and tabs left by PDF layout, keep paragraph breaks.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Split text into chunks of at most `max_chars` characters, stepping back
/// `overlap` characters between consecutive chunks. Prefers to cut at a
/// paragraph or sentence boundary in the last two thirds of the window.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the string
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let char_len = bounds.len() - 1;

    if char_len <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_len {
        let end = (start + max_chars).min(char_len);
        let cut = if end < char_len {
            let window = &text[bounds[start]..bounds[end]];
            find_break_point(window)
                .map(|byte_off| start + window[..byte_off].chars().count())
                .unwrap_or(end)
        } else {
            end
        };

        let chunk = text[bounds[start]..bounds[cut]].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if cut >= char_len {
            break;
        }
        let step = cut - start;
        start = if step <= overlap { cut } else { cut - overlap };
    }

    chunks
}

/// Byte offset just past the best break in `window`, if one falls late enough
fn find_break_point(window: &str) -> Option<usize> {
    let min = window.len() / 3;

    if let Some(pos) = window.rfind("\n\n") {
        if pos > min {
            return Some(pos + 2);
        }
    }

    [". ", "! ", "? ", ".\n", "!\n", "?\n"]
        .iter()
        .filter_map(|p| window.rfind(p).map(|pos| (pos, p.len())))
        .filter(|(pos, _)| *pos > min)
        .max_by_key(|(pos, _)| *pos)
        .map(|(pos, len)| pos + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(chunk_text("  Hello World  ", 1000, 0), vec!["Hello World"]);
        assert!(chunk_text("   ", 1000, 0).is_empty());
    }

    #[test]
    fn test_chunks_respect_size_and_cover_text() {
        let text = "Rust is fast. ".repeat(200);
        let chunks = chunk_text(&text, 100, 0);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        let rejoined: usize = chunks.iter().map(|c| c.len()).sum();
        // Only the whitespace trimmed at each cut is lost
        assert!(rejoined + chunks.len() >= text.trim().len());
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(60), "b".repeat(60));
        let chunks = chunk_text(&text, 100, 0);
        assert_eq!(chunks[0], format!("{}.", "a".repeat(60)));
        assert_eq!(chunks[1], "b".repeat(60));
    }

    #[test]
    fn test_multibyte_text_does_not_split_chars() {
        let text = "日本語のテキスト".repeat(50);
        let chunks = chunk_text(&text, 37, 5);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 37));
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text: String = ('a'..='z').cycle().take(50).collect();
        let chunks = chunk_text(&text, 20, 5);
        let first_tail: String = chunks[0].chars().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(chunks[1].starts_with(&first_tail));
    }

    #[test]
    fn test_normalize_whitespace_collapses_layout_gaps() {
        let raw = "Hello    World\n\n\n\nSecond\tparagraph  \n";
        assert_eq!(normalize_whitespace(raw), "Hello World\n\nSecond paragraph");
    }

    #[test]
    fn test_extract_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();
        assert!(matches!(extract_pdf_text(&path), Err(PdfChatError::Pdf(_))));
    }
}
