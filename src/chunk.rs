//! Markdown section chunker for documentation ingestion.
//!
//! A document is split at Markdown headings (ignoring `#` lines inside fenced
//! code). Each section remembers its ancestor headings. Sections longer than
//! `max_tokens` are split further on paragraph boundaries.

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocChunk {
    pub title: String,
    /// Ancestor headings joined by ` > `; empty at the top level.
    pub parent_context: String,
    /// `code_example` when the section contains a fenced block.
    pub section_type: &'static str,
    pub text: String,
}

#[derive(Debug)]
struct Section {
    title: String,
    parent_context: String,
    body: String,
    has_code: bool,
}

/// Drop a leading YAML front-matter block (`---` ... `---`).
pub fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return &rest[offset..];
        }
    }
    text
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some((level, title))
    }
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn split_sections(text: &str, fallback_title: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current = Section {
        title: fallback_title.to_string(),
        parent_context: String::new(),
        body: String::new(),
        has_code: false,
    };
    let mut in_fence = false;

    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            current.has_code = true;
        } else if !in_fence {
            if let Some((level, title)) = heading(line) {
                sections.push(current);
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                let parent_context = stack
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
                stack.push((level, title.to_string()));
                current = Section {
                    title: title.to_string(),
                    parent_context,
                    body: String::new(),
                    has_code: false,
                };
                continue;
            }
        }
        current.body.push_str(line);
        current.body.push('\n');
    }
    sections.push(current);

    sections.retain(|s| !s.body.trim().is_empty());
    sections
}

/// Split text on paragraph boundaries into pieces of at most `max_chars`.
/// A single oversized paragraph is hard-split at line or word boundaries.
pub fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars);
                let actual = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .filter(|pos| *pos > 0)
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    pieces
}

/// Largest char boundary `<= index`, and at least one char in.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    if i == 0 {
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        i
    }
}

/// Chunk a Markdown document. Text before the first heading is titled
/// `fallback_title`.
pub fn chunk_markdown(text: &str, fallback_title: &str, max_tokens: usize) -> Vec<DocChunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let body = strip_front_matter(text);
    let mut chunks = Vec::new();

    for section in split_sections(body, fallback_title) {
        let section_type = if section.has_code {
            "code_example"
        } else {
            "documentation"
        };
        let body = section.body.trim();
        let pieces = if body.len() > max_chars {
            split_paragraphs(body, max_chars)
        } else {
            vec![body.to_string()]
        };
        for piece in pieces {
            chunks.push(DocChunk {
                title: section.title.clone(),
                parent_context: section.parent_context.clone(),
                section_type,
                text: format!("{}\n\n{}", section.title, piece),
            });
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_matter_removed() {
        let doc = "---\ntitle: Actors\nsidebar: 2\n---\n# Actors\n\nBody.";
        assert_eq!(strip_front_matter(doc), "# Actors\n\nBody.");
        assert_eq!(strip_front_matter("# No front matter"), "# No front matter");
        // Unterminated block is left alone.
        assert_eq!(strip_front_matter("---\ntitle: x\n"), "---\ntitle: x\n");
    }

    #[test]
    fn headings_build_parent_context() {
        let doc = "# Actors\n\nIntro.\n\n## State\n\nStable vars.\n\n### Upgrades\n\nPreupgrade.\n\n## Messaging\n\nAsync calls.";
        let chunks = chunk_markdown(doc, "actors", 500);
        let summary: Vec<_> = chunks
            .iter()
            .map(|c| (c.title.as_str(), c.parent_context.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Actors", ""),
                ("State", "Actors"),
                ("Upgrades", "Actors > State"),
                ("Messaging", "Actors"),
            ]
        );
        assert_eq!(chunks[1].text, "State\n\nStable vars.");
    }

    #[test]
    fn hashes_inside_code_fences_are_not_headings() {
        let doc = "# Shell\n\n```bash\n# install\ndfx start\n```\n";
        let chunks = chunk_markdown(doc, "shell", 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_type, "code_example");
        assert!(chunks[0].text.contains("# install"));
    }

    #[test]
    fn preamble_uses_fallback_title() {
        let chunks = chunk_markdown("Some intro text.\n\n# Next\n\nMore.", "overview", 500);
        assert_eq!(chunks[0].title, "overview");
        assert_eq!(chunks[0].section_type, "documentation");
        assert_eq!(chunks[1].title, "Next");
    }

    #[test]
    fn long_sections_split_on_paragraphs() {
        // max_tokens=10 => max_chars=40
        let doc = "# Big\n\nThis is paragraph one.\n\nThis is paragraph two.";
        let chunks = chunk_markdown(doc, "big", 10);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.title == "Big"));
        assert_eq!(chunks[1].text, "Big\n\nThis is paragraph two.");
    }

    #[test]
    fn oversized_paragraph_hard_split_on_char_boundaries() {
        let text = "héllo wörld ".repeat(10);
        let pieces = split_paragraphs(&text, 7);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn empty_sections_dropped() {
        let chunks = chunk_markdown("# A\n## B\n\ntext", "x", 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "B");
        assert_eq!(chunks[0].parent_context, "A");
    }
}
