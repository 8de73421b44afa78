use regex::Regex;
use std::sync::OnceLock;

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[ \t]*\[\d{1,2}:\d{2}(?::\d{2})?\][ \t]*").unwrap())
}

/// Byte length of a leading `[MM:SS]` / `[HH:MM:SS]` token (with its
/// surrounding whitespace), or 0.
pub fn timestamp_prefix_len(line: &str) -> usize {
    timestamp_re().find(line).map_or(0, |m| m.end())
}

/// Remove leading timestamp tokens from every line, keeping line breaks.
pub fn strip_timestamps(body: &str) -> String {
    body.split_inclusive('\n')
        .map(|line| &line[timestamp_prefix_len(line)..])
        .collect()
}

/// Case-folded, whitespace-collapsed view of a body with timestamps removed.
/// `line_of[i]` is the original line index of `chars[i]`.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBody {
    pub chars: Vec<char>,
    pub line_of: Vec<usize>,
}

impl NormalizedBody {
    /// Lines are those of `body.split_inclusive('\n')`.
    pub fn build(body: &str) -> Self {
        let mut out = Self::default();
        let mut pending_space = false;
        for (line_idx, line) in body.split_inclusive('\n').enumerate() {
            let content = &line[timestamp_prefix_len(line)..];
            for c in content.chars() {
                if c.is_whitespace() {
                    pending_space = true;
                    continue;
                }
                // The separator belongs to the line of the char it precedes.
                if pending_space && !out.chars.is_empty() {
                    out.chars.push(' ');
                    out.line_of.push(line_idx);
                }
                pending_space = false;
                for folded in c.to_lowercase() {
                    out.chars.push(folded);
                    out.line_of.push(line_idx);
                }
            }
            pending_space = true;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Is `pos` the first char of a word?
    pub fn is_word_start(&self, pos: usize) -> bool {
        pos < self.chars.len()
            && self.chars[pos] != ' '
            && (pos == 0 || self.chars[pos - 1] == ' ')
    }
}

/// Normalize a free-standing quote the same way as a body.
pub fn normalize_quote(quote: &str) -> Vec<char> {
    NormalizedBody::build(quote).chars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_variants() {
        assert_eq!(timestamp_prefix_len("[00:02] hi"), 8);
        assert_eq!(timestamp_prefix_len("  [1:02:03]\thi"), 12);
        assert_eq!(timestamp_prefix_len("[2:03]hi"), 6);
        assert_eq!(timestamp_prefix_len("no stamp [00:02]"), 0);
        assert_eq!(timestamp_prefix_len("[abc] x"), 0);
    }

    #[test]
    fn strip_timestamps_keeps_lines() {
        let body = "[00:00] Let's go\n[00:02] and discuss\n\nplain\n";
        assert_eq!(strip_timestamps(body), "Let's go\nand discuss\n\nplain\n");
        assert_eq!(strip_timestamps("[00:01]\nnext"), "\nnext");
    }

    #[test]
    fn normalized_view_maps_back_to_lines() {
        let body = "[00:00] Let's  Go\n\n[00:02]   and DISCUSS\n";
        let view = NormalizedBody::build(body);
        let text: String = view.chars.iter().collect();
        assert_eq!(text, "let's go and discuss");
        assert_eq!(view.line_of[0], 0);
        assert_eq!(view.line_of[7], 0);
        // separator before "and" belongs to line 2
        assert_eq!(view.line_of[8], 2);
        assert_eq!(view.line_of[9], 2);
        assert_eq!(view.chars.len(), view.line_of.len());
    }

    #[test]
    fn word_starts() {
        let view = NormalizedBody::build("ab cd");
        assert!(view.is_word_start(0));
        assert!(!view.is_word_start(1));
        assert!(!view.is_word_start(2));
        assert!(view.is_word_start(3));
        assert!(!view.is_word_start(5));
    }

    #[test]
    fn quote_normalization() {
        let q: String = normalize_quote("  So WHAT\nexactly ").iter().collect();
        assert_eq!(q, "so what exactly");
    }
}
