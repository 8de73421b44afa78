use distill_core::Segment;
use serde::Deserialize;
use similar::TextDiff;

use crate::normalize::{normalize_quote, NormalizedBody};

/// Tuning knobs for fuzzy anchor matching.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Minimum char-diff similarity for a fuzzy window to be accepted.
    pub fuzzy_threshold: f32,
    /// Extra chars added to the anchor length when sizing the fuzzy window.
    pub window_slack: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.8,
            window_slack: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    Fuzzy { score: f32 },
}

/// Where one segment's marker went. `start..end` is the match in the
/// normalized view.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub segment: usize,
    pub line: usize,
    pub start: usize,
    pub end: usize,
    pub kind: MatchKind,
}

/// Result of [`project`].
#[derive(Debug, Clone, Default)]
pub struct Projection {
    /// The body with marker lines inserted.
    pub text: String,
    pub placed: Vec<Placement>,
    /// Indexes of segments whose anchor was not found.
    pub dropped: Vec<usize>,
}

/// `## [KEY_POINT] Title`, always a single line.
pub fn marker_line(segment: &Segment) -> String {
    let title: Vec<&str> = segment.title.split_whitespace().collect();
    format!("## [{}] {}", segment.section_type.marker_label(), title.join(" "))
}

/// Insert a marker line for every segment whose anchor can be located.
///
/// Segments are matched in order with a forward-only cursor, so markers
/// never regress or overlap. Original lines are copied through untouched.
pub fn project(body: &str, segments: &[Segment], config: &ProjectionConfig) -> Projection {
    let view = NormalizedBody::build(body);
    let mut cursor = 0;
    let mut placed = Vec::new();
    let mut dropped = Vec::new();

    for (idx, segment) in segments.iter().enumerate() {
        let anchor = normalize_quote(&segment.start_quote);
        match locate(&view, &anchor, cursor, config) {
            Some((start, end, kind)) => {
                tracing::debug!(segment = idx, line = view.line_of[start], ?kind, "anchor placed");
                cursor = end;
                placed.push(Placement {
                    segment: idx,
                    line: view.line_of[start],
                    start,
                    end,
                    kind,
                });
            }
            None => {
                tracing::warn!(
                    segment = idx,
                    title = %segment.title,
                    quote = %segment.start_quote,
                    "anchor not found, marker omitted"
                );
                dropped.push(idx);
            }
        }
    }

    let text = render(body, segments, &placed);
    Projection {
        text,
        placed,
        dropped,
    }
}

fn locate(
    view: &NormalizedBody,
    anchor: &[char],
    cursor: usize,
    config: &ProjectionConfig,
) -> Option<(usize, usize, MatchKind)> {
    if anchor.is_empty() || cursor >= view.len() {
        return None;
    }
    if let Some(offset) = find_exact(&view.chars[cursor..], anchor) {
        let start = cursor + offset;
        return Some((start, start + anchor.len(), MatchKind::Exact));
    }
    find_fuzzy(view, anchor, cursor, config)
}

fn find_exact(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// First word-aligned window at or after `cursor` whose similarity to the
/// anchor reaches the threshold.
fn find_fuzzy(
    view: &NormalizedBody,
    anchor: &[char],
    cursor: usize,
    config: &ProjectionConfig,
) -> Option<(usize, usize, MatchKind)> {
    let anchor_text: String = anchor.iter().collect();
    let width = anchor.len() + config.window_slack;
    for start in cursor..view.len() {
        if !view.is_word_start(start) {
            continue;
        }
        let end = (start + width).min(view.len());
        let window: String = view.chars[start..end].iter().collect();
        let score = TextDiff::from_chars(anchor_text.as_str(), window.as_str()).ratio();
        if score >= config.fuzzy_threshold {
            return Some((start, end, MatchKind::Fuzzy { score }));
        }
    }
    None
}

fn render(body: &str, segments: &[Segment], placed: &[Placement]) -> String {
    let mut out = String::with_capacity(body.len() + placed.len() * 48);
    let mut markers = placed.iter().peekable();
    for (line_idx, line) in body.split_inclusive('\n').enumerate() {
        while let Some(p) = markers.next_if(|p| p.line == line_idx) {
            out.push_str(&marker_line(&segments[p.segment]));
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use distill_core::SectionType;

    fn seg(section_type: SectionType, title: &str, quote: &str) -> Segment {
        Segment {
            section_type,
            title: title.to_string(),
            start_quote: quote.to_string(),
        }
    }

    fn without_markers(text: &str, segments: &[Segment]) -> String {
        let markers: Vec<String> = segments.iter().map(|s| format!("{}\n", marker_line(s))).collect();
        text.split_inclusive('\n')
            .filter(|line| !markers.iter().any(|m| m == line))
            .collect()
    }

    #[test]
    fn anchor_spanning_two_lines_marks_first_line() {
        let body = "[00:00] Let's go\n[00:02] and discuss bitcoin today.";
        let segments = vec![seg(SectionType::Intro, "Opening", "Let's go and discuss bitcoin")];
        let out = project(body, &segments, &ProjectionConfig::default());
        assert_eq!(
            out.text,
            "## [INTRO] Opening\n[00:00] Let's go\n[00:02] and discuss bitcoin today."
        );
        assert_eq!(out.placed[0].kind, MatchKind::Exact);
        assert_eq!(out.placed[0].line, 0);
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn exact_anchors_keep_order_and_text() {
        let body = "[00:00] Welcome back everyone.\n[00:04] Today we look at rollups.\n\n[01:10] First, data availability.\n[02:30] To wrap up, thanks.\n";
        let segments = vec![
            seg(SectionType::Intro, "Welcome", "welcome back everyone"),
            seg(SectionType::KeyPoint, "Rollups", "Today we look at rollups"),
            seg(SectionType::Detail, "DA", "First, data availability"),
            seg(SectionType::Conclusion, "Wrap", "to wrap up"),
        ];
        let out = project(body, &segments, &ProjectionConfig::default());
        let lines: Vec<&str> = out.text.lines().collect();
        assert_eq!(lines[0], "## [INTRO] Welcome");
        assert_eq!(lines[2], "## [KEY_POINT] Rollups");
        assert_eq!(lines[5], "## [DETAIL] DA");
        assert_eq!(lines[7], "## [CONCLUSION] Wrap");
        let lines: Vec<usize> = out.placed.iter().map(|p| p.line).collect();
        assert_eq!(lines, vec![0, 1, 3, 4]);
        assert_eq!(without_markers(&out.text, &segments), body);
    }

    #[test]
    fn candidate_before_cursor_is_rejected() {
        let body = "alpha beta gamma\ndelta epsilon\n";
        let segments = vec![
            seg(SectionType::KeyPoint, "Later", "delta epsilon"),
            seg(SectionType::Detail, "Earlier", "alpha beta"),
        ];
        let out = project(body, &segments, &ProjectionConfig::default());
        assert_eq!(out.dropped, vec![1]);
        assert_eq!(out.text, "alpha beta gamma\n## [KEY_POINT] Later\ndelta epsilon\n");
    }

    #[test]
    fn repeated_phrase_uses_next_occurrence() {
        let body = "so anyway\nmore talk\nso anyway\n";
        let segments = vec![
            seg(SectionType::Intro, "A", "so anyway"),
            seg(SectionType::Detail, "B", "so anyway"),
        ];
        let out = project(body, &segments, &ProjectionConfig::default());
        let lines: Vec<usize> = out.placed.iter().map(|p| p.line).collect();
        assert_eq!(lines, vec![0, 2]);
    }

    #[test]
    fn two_markers_on_one_line_keep_segment_order() {
        let body = "first part then second part\n";
        let segments = vec![
            seg(SectionType::Intro, "One", "first part"),
            seg(SectionType::KeyPoint, "Two", "second part"),
        ];
        let out = project(body, &segments, &ProjectionConfig::default());
        assert_eq!(
            out.text,
            "## [INTRO] One\n## [KEY_POINT] Two\nfirst part then second part\n"
        );
    }

    #[test]
    fn fuzzy_match_tolerates_punctuation() {
        let body = "[00:00] Hello.\n[00:03] So what exactly is ERC-8004? Let's see.\n";
        let segments = vec![seg(SectionType::KeyPoint, "ERC-8004", "So what exactly is ERC 8004")];
        let out = project(body, &segments, &ProjectionConfig::default());
        assert_eq!(out.placed.len(), 1);
        assert_eq!(out.placed[0].line, 1);
        assert!(matches!(out.placed[0].kind, MatchKind::Fuzzy { score } if score > 0.9));
        assert_eq!(without_markers(&out.text, &segments), body);
    }

    const BOUNDARY_BODY: &str = "[00:00] intro words here\n[00:05] abcdefghij more text\n";

    fn boundary_run(threshold: f32, slack: usize) -> Projection {
        // "abcdefghxy" vs "abcdefghij": 8 of 10 chars shared, ratio 0.8
        let segments = vec![seg(SectionType::Detail, "Edge", "abcdefghXY")];
        let config = ProjectionConfig {
            fuzzy_threshold: threshold,
            window_slack: slack,
        };
        project(BOUNDARY_BODY, &segments, &config)
    }

    #[test]
    fn fuzzy_threshold_boundary() {
        let cases: &[(f32, usize, bool)] = &[
            (0.75, 0, true),
            (0.8, 0, true),
            (0.81, 0, false),
            (0.9, 0, false),
            // a wider window dilutes the ratio to 16/22
            (0.8, 2, false),
            (0.72, 2, true),
        ];
        for &(threshold, slack, expect_placed) in cases {
            let out = boundary_run(threshold, slack);
            assert_eq!(
                out.placed.len() == 1,
                expect_placed,
                "threshold {threshold} slack {slack}"
            );
            if expect_placed {
                assert_eq!(out.placed[0].line, 1);
            } else {
                assert_eq!(out.text, BOUNDARY_BODY);
            }
        }
    }

    #[test]
    fn empty_anchor_and_empty_body() {
        let segments = vec![seg(SectionType::Intro, "Nothing", "   ")];
        let out = project("some text\n", &segments, &ProjectionConfig::default());
        assert_eq!(out.dropped, vec![0]);
        assert_eq!(out.text, "some text\n");

        let segments = vec![seg(SectionType::Intro, "X", "some text")];
        let out = project("", &segments, &ProjectionConfig::default());
        assert_eq!(out.dropped, vec![0]);
        assert_eq!(out.text, "");
    }

    #[test]
    fn marker_title_is_single_line() {
        let s = seg(SectionType::KeyPoint, "  Multi\nline  title ", "x");
        assert_eq!(marker_line(&s), "## [KEY_POINT] Multi line title");
    }
}
