//! Byte-budgeted document splitting.
//!
//! Large documents are split for translation on paragraph boundaries first,
//! then on sentence boundaries when a single paragraph exceeds the budget.
//! Each chunk carries the separator that joined it to the next chunk
//! (`"\n\n"` at a paragraph break, `" "` between sentences of a split
//! paragraph), so translated chunks can be concatenated back together
//! without any extra joiner.

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

/// Split `text` into translation chunks of at most `max_bytes` of content.
///
/// A chunk may exceed the budget only when it holds a single sentence that
/// is itself longer than `max_bytes`; sentences are never cut. Whitespace-only
/// paragraphs are dropped. Empty input produces no chunks.
pub fn split(text: &str, max_bytes: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in text.split(PARAGRAPH_SEP) {
        if paragraph.trim().is_empty() {
            continue;
        }

        if paragraph.len() > max_bytes {
            close(&mut out, &mut current);
            pack_sentences(paragraph, max_bytes, &mut out);
            continue;
        }

        // Flush strictly before the first paragraph that would cross the budget.
        if !current.is_empty()
            && current.len() + PARAGRAPH_SEP.len() + paragraph.len() > max_bytes
        {
            close(&mut out, &mut current);
        }

        if current.is_empty() {
            open(&mut out, PARAGRAPH_SEP);
            current.push_str(paragraph);
        } else {
            current.push_str(PARAGRAPH_SEP);
            current.push_str(paragraph);
        }
    }

    close(&mut out, &mut current);
    out
}

fn pack_sentences(paragraph: &str, max_bytes: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    // The first sentence chunk sits at a paragraph boundary; the rest join
    // the previous sentence chunk with a single space.
    let mut boundary = PARAGRAPH_SEP;

    for sentence in sentences(paragraph) {
        if !current.is_empty()
            && current.len() + SENTENCE_SEP.len() + sentence.len() > max_bytes
        {
            close(out, &mut current);
        }

        if current.is_empty() {
            open(out, boundary);
            boundary = SENTENCE_SEP;
            current.push_str(sentence);
        } else {
            current.push_str(SENTENCE_SEP);
            current.push_str(sentence);
        }
    }

    close(out, &mut current);
}

/// Sentence boundary: `.`, `!` or `?` followed by space, tab or newline.
fn sentences(paragraph: &str) -> Vec<&str> {
    let bytes = paragraph.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;

    for i in 0..bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?')
            && bytes
                .get(i + 1)
                .is_some_and(|&b| matches!(b, b' ' | b'\t' | b'\n'))
        {
            let sentence = paragraph[start..=i].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = i + 1;
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

// Appends the boundary separator to the previously closed chunk; called
// right before new content opens a fresh chunk.
fn open(out: &mut [String], sep: &str) {
    if let Some(last) = out.last_mut() {
        last.push_str(sep);
    }
}

fn close(out: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        out.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::{sentences, split};

    fn non_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn empty_and_blank_input_produce_no_chunks() {
        assert!(split("", 100).is_empty());
        assert!(split("   \n\n \t ", 100).is_empty());
    }

    #[test]
    fn small_text_is_a_single_chunk() {
        assert_eq!(split("A. B.", 10240), vec!["A. B.".to_string()]);
    }

    #[test]
    fn paragraphs_pack_until_the_budget() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        // Two paragraphs plus a separator fit in 10 bytes; the third does not.
        assert_eq!(
            split(text, 10),
            vec!["aaaa\n\nbbbb\n\n".to_string(), "cccc".to_string()]
        );
    }

    #[test]
    fn flush_happens_before_the_crossing_paragraph() {
        let p1 = "x".repeat(8 * 1024);
        let p2 = "y".repeat(8 * 1024);
        let p3 = "z".repeat(8 * 1024);
        let text = format!("{p1}\n\n{p2}\n\n{p3}");

        let chunks = split(&text, 10 * 1024);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], format!("{p1}\n\n"));
        assert_eq!(chunks[1], format!("{p2}\n\n"));
        assert_eq!(chunks[2], p3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sentences() {
        let text = "First sentence here. Second sentence here. Third one.";
        let chunks = split(text, 25);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.trim_end().len() <= 25, "chunk too big: {chunk:?}");
        }
        assert_eq!(non_whitespace(&chunks.concat()), non_whitespace(text));
    }

    #[test]
    fn an_indivisible_sentence_may_exceed_the_budget() {
        let long = "word ".repeat(40).trim_end().to_string() + ".";
        let chunks = split(&long, 16);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].len() > 16);
    }

    #[test]
    fn split_then_concat_preserves_content() {
        let text = "Alpha beta. Gamma delta!\n\nShort.\n\nEpsilon zeta? Eta theta. \
                    Iota kappa lambda mu nu xi omicron pi.";
        for budget in [8usize, 20, 40, 100, 10 * 1024] {
            let chunks = split(text, budget);
            assert!(chunks.iter().all(|c| !c.trim().is_empty()));
            assert_eq!(
                non_whitespace(&chunks.concat()),
                non_whitespace(text),
                "budget {budget}"
            );
        }
    }

    #[test]
    fn sentence_boundaries_require_trailing_whitespace() {
        assert_eq!(sentences("e.g. v1.2 runs. Fine."), vec!["e.g.", "v1.2 runs.", "Fine."]);
        assert_eq!(sentences("No terminator here"), vec!["No terminator here"]);
        assert_eq!(sentences("One! Two? Three."), vec!["One!", "Two?", "Three."]);
    }
}
