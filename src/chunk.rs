//! Markdown-aware text chunker.
//!
//! Splits a markdown document into [`MarkdownChunk`]s that respect a
//! `chunk_size_tokens` limit. The document is first cut into sections at
//! `##`/`###` headings; each section is then filled greedily with *blocks*
//! (a whole fenced code block, or a single line). Consecutive chunks inside a
//! section share an overlap of trailing whole lines.
//!
//! Token counts are estimated as `chars / 4` (at least 1), the same estimate
//! used for every size decision, so results are deterministic.
//!
//! Every chunk's text is exactly the source lines `start_line..=end_line`
//! (1-based) joined with `\n`.

use crate::models::MarkdownChunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

/// Split a markdown document into heading-scoped, token-bounded chunks.
///
/// Returns an empty vector for an empty or whitespace-only document.
pub fn chunk_markdown(
    text: &str,
    chunk_size_tokens: usize,
    overlap_tokens: usize,
) -> Vec<MarkdownChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks = Vec::new();

    for section in split_sections(&lines) {
        let mut chunker = SectionChunker {
            heading: section.heading,
            max_chars: chunk_size_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
            parts: Vec::new(),
            buffered_chars: 0,
            start: section.start,
            end: section.start,
            out: Vec::new(),
        };
        for block in split_blocks(section.lines, section.start) {
            chunker.push(block);
        }
        chunker.flush();
        chunks.extend(chunker.out);
    }

    chunks
}

struct Section<'a> {
    heading: Option<&'a str>,
    /// 0-based index of the section's first line.
    start: usize,
    lines: &'a [&'a str],
}

struct Block {
    text: String,
    /// 0-based, inclusive.
    start: usize,
    end: usize,
    chars: usize,
    is_code: bool,
}

fn is_code_fence(line: &str) -> bool {
    line.trim().starts_with("```")
}

fn is_section_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if !(2..=3).contains(&hashes) {
        return false;
    }
    let rest = &line[hashes..];
    rest.starts_with(char::is_whitespace) && !rest.trim().is_empty()
}

/// Cut the document at `##`/`###` headings. Heading-like lines inside a
/// fenced code block do not open a section.
fn split_sections<'a>(lines: &'a [&'a str]) -> Vec<Section<'a>> {
    let mut sections = Vec::new();
    let mut heading: Option<&str> = None;
    let mut start = 0;
    let mut in_code = false;

    for (idx, line) in lines.iter().enumerate() {
        if is_code_fence(line) {
            in_code = !in_code;
            continue;
        }
        if !in_code && is_section_heading(line) {
            if idx > start {
                sections.push(Section {
                    heading,
                    start,
                    lines: &lines[start..idx],
                });
            }
            heading = Some(line.trim());
            start = idx;
        }
    }

    if start < lines.len() {
        sections.push(Section {
            heading,
            start,
            lines: &lines[start..],
        });
    }

    sections
}

/// Group a section's lines into atomic blocks: one per fenced code block
/// (an unclosed fence runs to the end of the section), one per other line.
fn split_blocks(lines: &[&str], first_line: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut code: Option<(usize, Vec<&str>)> = None;

    for (i, line) in lines.iter().enumerate() {
        let abs = first_line + i;
        match code.as_mut() {
            Some((_, code_lines)) => {
                code_lines.push(*line);
                if is_code_fence(line) {
                    if let Some((start, code_lines)) = code.take() {
                        blocks.push(make_block(&code_lines, start, true));
                    }
                }
            }
            None if is_code_fence(line) => code = Some((abs, vec![*line])),
            None => blocks.push(make_block(&[*line], abs, false)),
        }
    }

    if let Some((start, code_lines)) = code {
        blocks.push(make_block(&code_lines, start, true));
    }

    blocks
}

fn make_block(lines: &[&str], start: usize, is_code: bool) -> Block {
    let text = lines.join("\n");
    Block {
        chars: text.chars().count(),
        text,
        start,
        end: start + lines.len() - 1,
        is_code,
    }
}

struct SectionChunker<'a> {
    heading: Option<&'a str>,
    max_chars: usize,
    overlap_chars: usize,
    parts: Vec<String>,
    buffered_chars: usize,
    /// 0-based line range of the buffered text.
    start: usize,
    end: usize,
    out: Vec<MarkdownChunk>,
}

impl SectionChunker<'_> {
    fn push(&mut self, block: Block) {
        if block.is_code && block.chars > self.max_chars {
            self.flush();
            self.start = block.start;
            self.end = block.end;
            self.parts.push(block.text);
            self.flush();
            return;
        }

        if !self.parts.is_empty() && self.buffered_chars + block.chars > self.max_chars {
            let emitted = self.flush();
            if emitted && self.overlap_chars > 0 {
                if let Some((seed, seed_start)) = self.overlap_seed() {
                    self.buffered_chars = seed.chars().count();
                    self.parts.push(seed);
                    self.start = seed_start;
                }
            }
        }

        if self.parts.is_empty() {
            self.start = block.start;
        }
        self.buffered_chars += block.chars;
        self.parts.push(block.text);
        self.end = block.end;
    }

    /// Close the buffered chunk. Returns whether a chunk was emitted.
    fn flush(&mut self) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        let text = self.parts.join("\n");
        self.parts.clear();
        self.buffered_chars = 0;

        if text.trim().is_empty() {
            return false;
        }
        self.out.push(MarkdownChunk {
            token_count: estimate_tokens(&text),
            text,
            start_line: self.start + 1,
            end_line: self.end + 1,
            heading: self.heading.map(str::to_string),
        });
        true
    }

    /// Trailing whole lines of the last emitted chunk, at most
    /// `overlap_chars` long, with the 0-based line they start on.
    ///
    /// The overlap never reaches back to the previous chunk's first line, so
    /// chunk start lines strictly increase.
    fn overlap_seed(&self) -> Option<(String, usize)> {
        let prev = self.out.last()?;
        let text = prev.text.as_str();
        let total = text.chars().count();

        let mut tail = if total <= self.overlap_chars {
            text
        } else {
            let idx = text
                .char_indices()
                .nth(total - self.overlap_chars)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            if text[..idx].ends_with('\n') {
                &text[idx..]
            } else {
                match text[idx..].find('\n') {
                    Some(pos) => &text[idx + pos + 1..],
                    None => "",
                }
            }
        };

        let prev_lines = prev.end_line - prev.start_line + 1;
        if tail.matches('\n').count() + 1 >= prev_lines {
            tail = match tail.find('\n') {
                Some(pos) => &tail[pos + 1..],
                None => "",
            };
        }

        if tail.trim().is_empty() {
            return None;
        }
        let tail_lines = tail.matches('\n').count() + 1;
        // prev.end_line is 1-based; the result is 0-based.
        Some((tail.to_string(), prev.end_line - tail_lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler_lines(prefix: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("{} line {:03} with some filler words to pad it", prefix, i))
            .collect()
    }

    fn assert_text_matches_lines(doc: &str, chunks: &[MarkdownChunk]) {
        let lines: Vec<&str> = doc.split('\n').collect();
        for c in chunks {
            let expected = lines[c.start_line - 1..c.end_line].join("\n");
            assert_eq!(c.text, expected, "chunk text must equal its line range");
        }
    }

    #[test]
    fn test_empty_document() {
        assert!(chunk_markdown("", 400, 80).is_empty());
        assert!(chunk_markdown("  \n\n \t\n", 400, 80).is_empty());
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunks = chunk_markdown("Hello, world!", 400, 80);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[0].token_count, 3);
    }

    #[test]
    fn test_token_estimate_minimum_one() {
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("é".repeat(8).as_str()), 2);
    }

    #[test]
    fn test_heading_sections() {
        let doc = "# Title\nintro text\n## First\nalpha\n### Sub\nbeta\n#### Deep\ngamma";
        let chunks = chunk_markdown(doc, 400, 80);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[0].text, "# Title\nintro text");
        assert_eq!(chunks[1].heading.as_deref(), Some("## First"));
        assert_eq!(chunks[1].start_line, 3);
        assert_eq!(chunks[2].heading.as_deref(), Some("### Sub"));
        // `####` stays inside the `###` section.
        assert!(chunks[2].text.contains("#### Deep"));
        assert_eq!(chunks[2].end_line, 8);
        assert_text_matches_lines(doc, &chunks);
    }

    #[test]
    fn test_two_section_example() {
        // ~200 tokens in A, ~1000 tokens in B.
        let a = filler_lines("alpha", 16).join("\n");
        let b = filler_lines("beta", 80).join("\n");
        let doc = format!("## A\n{}\n## B\n{}", a, b);
        let chunks = chunk_markdown(&doc, 400, 80);

        let a_end = 17;
        assert_eq!(chunks[0].heading.as_deref(), Some("## A"));
        assert_eq!(chunks[0].start_line, 1);
        assert!(chunks[0].end_line <= a_end);

        let b_chunks: Vec<&MarkdownChunk> = chunks
            .iter()
            .filter(|c| c.heading.as_deref() == Some("## B"))
            .collect();
        assert!(b_chunks.len() > 1, "B should be split into several chunks");
        for c in &b_chunks {
            assert!(c.start_line > a_end);
            assert!(c.token_count <= 440, "chunk too large: {}", c.token_count);
        }
        for pair in b_chunks.windows(2) {
            assert!(
                pair[1].start_line <= pair[0].end_line,
                "consecutive chunks in B should overlap"
            );
        }
        assert_text_matches_lines(&doc, &chunks);
    }

    #[test]
    fn test_chunk_coverage_in_order() {
        let mut doc = String::from("Preamble line\n");
        for s in 0..4 {
            doc.push_str(&format!("## Section {}\n", s));
            doc.push_str(&filler_lines(&format!("s{}", s), 40).join("\n"));
            doc.push_str("\n\n");
        }
        let chunks = chunk_markdown(&doc, 100, 20);
        let lines: Vec<&str> = doc.split('\n').collect();

        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
        }
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let n = idx + 1;
            assert!(
                chunks.iter().any(|c| c.start_line <= n && n <= c.end_line),
                "line {} not covered",
                n
            );
        }
        assert_text_matches_lines(&doc, &chunks);
    }

    #[test]
    fn test_oversized_code_block_is_atomic() {
        let code_body = filler_lines("let x = compute();", 60).join("\n");
        let block = format!("```rust\n{}\n```", code_body);
        let doc = format!("## Code\nSome intro.\n{}\nAfter the block.", block);
        let chunks = chunk_markdown(&doc, 100, 20);

        let holders: Vec<&MarkdownChunk> =
            chunks.iter().filter(|c| c.text.contains("```rust")).collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].text, block);
        assert!(holders[0].token_count > 100);
        // No other chunk carries any part of the block.
        for c in chunks.iter().filter(|c| !c.text.contains("```rust")) {
            assert!(!c.text.contains("compute()"));
        }
        assert_text_matches_lines(&doc, &chunks);
    }

    #[test]
    fn test_code_block_moves_whole_to_next_chunk() {
        let prose = filler_lines("prose", 6).join("\n");
        let code = format!("```\n{}\n```", filler_lines("code", 4).join("\n"));
        let doc = format!("{}\n{}", prose, code);
        // Prose (~6 * 46 chars) fits; adding the code block overflows.
        let chunks = chunk_markdown(&doc, 100, 0);
        let holder = chunks.iter().find(|c| c.text.contains("```")).unwrap();
        assert!(holder.text.starts_with("```"));
        assert!(holder.text.ends_with("```"));
        assert_text_matches_lines(&doc, &chunks);
    }

    #[test]
    fn test_heading_inside_code_block_does_not_split() {
        let doc = "## Real\n```bash\n## not a heading\necho hi\n```\ntext";
        let chunks = chunk_markdown(doc, 400, 80);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading.as_deref(), Some("## Real"));
    }

    #[test]
    fn test_unclosed_fence_runs_to_section_end() {
        let doc = "intro\n```\nfn main() {}\nstill code";
        let chunks = chunk_markdown(doc, 400, 80);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 4);
    }

    #[test]
    fn test_overlap_starts_on_line_boundary() {
        let doc = filler_lines("para", 50).join("\n");
        let chunks = chunk_markdown(&doc, 100, 20);
        assert!(chunks.len() > 1);
        let lines: Vec<&str> = doc.split('\n').collect();
        for c in &chunks[1..] {
            assert!(lines.contains(&c.text.split('\n').next().unwrap()));
        }
        assert_text_matches_lines(&doc, &chunks);
    }

    #[test]
    fn test_zero_overlap_chunks_are_disjoint() {
        let doc = filler_lines("para", 50).join("\n");
        let chunks = chunk_markdown(&doc, 100, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn test_deterministic() {
        let doc = format!("## X\n{}", filler_lines("d", 70).join("\n"));
        let c1 = chunk_markdown(&doc, 100, 20);
        let c2 = chunk_markdown(&doc, 100, 20);
        assert_eq!(c1, c2);
    }
}
