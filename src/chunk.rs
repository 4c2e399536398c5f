//! Recursive, overlapping text chunker.
//!
//! Text is split on a prioritized list of separators (paragraph break, line
//! break, space, then single characters), recursing into any piece that is
//! still over budget. Separators stay attached to the text before them, so
//! the raw pieces concatenate back to the input. Small neighbouring pieces
//! are merged greedily, then each segment is prefixed with the tail of the
//! previous one.
//!
//! All lengths are counted in `char`s, never bytes.

/// Separators tried in order, coarsest first. The empty string means
/// "split between every character".
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Chunking parameters. Construct with [`Chunker::new`] for the default
/// separator list.
#[derive(Debug, Clone)]
pub struct Chunker {
    pub chunk_size: usize,
    pub overlap: usize,
    pub separators: Vec<String>,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split `text` into ordered segments of at most `chunk_size` chars.
    ///
    /// Segment `i` starts with the last `overlap` chars of segment `i - 1`.
    /// Returns an empty vector for empty or whitespace-only input.
    pub fn split(&self, text: &str) -> Vec<String> {
        let size = self.chunk_size.max(1);
        let overlap = self.overlap.min(size - 1);
        let budget = size - overlap;

        let seps: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        let pieces: Vec<String> = split_recursive(text, &seps, budget)
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();

        let mut segments: Vec<String> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let segment = match segments.last() {
                Some(prev) if overlap > 0 => {
                    let mut s = tail_chars(prev, overlap).to_string();
                    s.push_str(&piece);
                    s
                }
                _ => piece,
            };
            segments.push(segment);
        }
        segments
    }
}

/// Split with the default separators.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    Chunker::new(chunk_size, overlap).split(text)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` chars of `s`, or all of `s` when it is shorter.
fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    let start = s
        .char_indices()
        .nth(len - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}

fn split_recursive(text: &str, separators: &[&str], limit: usize) -> Vec<String> {
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    // First separator that occurs in the text; running out means per-char.
    let found = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep));
    let (sep, rest) = match found {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => ("", &separators[separators.len()..]),
    };

    let parts: Vec<&str> = if sep.is_empty() {
        split_chars(text)
    } else {
        text.split_inclusive(sep).collect()
    };

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0;

    for part in parts {
        let part_len = char_len(part);
        if part_len > limit {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            out.extend(split_recursive(part, rest, limit));
            continue;
        }
        if buf_len + part_len > limit && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
            buf_len = 0;
        }
        buf.push_str(part);
        buf_len += part_len;
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "The quarterly report covers revenue, churn and hiring.\n\n\
        Revenue grew in every region except the north, where a supplier dispute \
        delayed shipments for most of the second month.\n\
        Churn was flat.\n\n\
        Hiring focused on support staff; the team doubled between March and May \
        and onboarding time dropped to under two weeks.";

    #[test]
    fn test_empty_text_yields_no_segments() {
        assert!(split_text("", 150, 30).is_empty());
        assert!(split_text("   \n\n  ", 150, 30).is_empty());
    }

    #[test]
    fn test_short_text_single_segment() {
        let segments = split_text("Hello, world!", 150, 30);
        assert_eq!(segments, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_segments_never_exceed_chunk_size() {
        for (size, overlap) in [(150, 30), (40, 10), (10, 9), (7, 0), (1, 0)] {
            for segment in split_text(SAMPLE, size, overlap) {
                assert!(
                    segment.chars().count() <= size,
                    "segment {:?} exceeds {}",
                    segment,
                    size
                );
            }
        }
    }

    #[test]
    fn test_consecutive_segments_overlap() {
        let overlap = 12;
        let segments = split_text(SAMPLE, 60, overlap);
        assert!(segments.len() > 2);
        for pair in segments.windows(2) {
            let prev = &pair[0];
            let tail = tail_chars(prev, overlap);
            assert!(pair[1].starts_with(tail));
            if prev.chars().count() > overlap {
                assert_eq!(tail.chars().count(), overlap);
            }
        }
    }

    #[test]
    fn test_pieces_reassemble_to_input_without_overlap() {
        let segments = split_text(SAMPLE, 50, 0);
        assert_eq!(segments.concat(), SAMPLE);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "alpha beta gamma\n\ndelta epsilon zeta";
        let segments = split_text(text, 20, 0);
        assert_eq!(segments, vec!["alpha beta gamma\n\n", "delta epsilon zeta"]);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(split_text(SAMPLE, 45, 9), split_text(SAMPLE, 45, 9));
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let text = "ümlaut ñandú café ".repeat(20);
        for segment in split_text(&text, 25, 5) {
            assert!(segment.chars().count() <= 25);
        }
    }

    #[test]
    fn test_overlap_clamped_below_chunk_size() {
        let segments = split_text("abcdefghij", 3, 10);
        assert!(!segments.is_empty());
        for segment in &segments {
            assert!(segment.chars().count() <= 3);
        }
    }

    #[test]
    fn test_custom_separators() {
        let chunker = Chunker::new(12, 0).with_separators(vec![";".to_string(), "".to_string()]);
        let segments = chunker.split("one;two;three;four");
        assert_eq!(segments, vec!["one;two;", "three;four"]);
    }
}
