//! Anchor rewriting for model output.
//!
//! Two passes share one balanced-bracket scanner:
//! - `hydrate_anchors` turns `[Term](__ANCHOR__)` markers into resolved
//!   `[Term](suggestion:<question>)` links, or strips/preserves them.
//! - `normalize_suggestion_links` repairs resolved links whose payload holds
//!   nested parentheses or inconsistent percent-encoding.
//!
//! The scanner walks byte indices. Every delimiter byte is ASCII, so each
//! index it stops on is also a char boundary.

use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde_json::Value;
use std::ops::Range;

pub const ANCHOR_TOKEN: &str = "__ANCHOR__";
const ANCHOR_DELIMITER: &str = "](__ANCHOR__)";
const SUGGESTION_DELIMITER: &str = "](suggestion:";

/// Characters left untouched by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static ANCHOR_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\r\n|\r|\n|^)\s*[*\-]?\s*Anchor:\s*\[").expect("anchor label pattern is valid")
});

/// What happens to a marker when no question was generated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedAnchorPolicy {
    /// Reduce the marker to its display text.
    Strip,
    /// Keep `[Term](__ANCHOR__)` so it still renders as an "explain this" link.
    Preserve,
}

/// Questions generated for anchor terms, in the order the model returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorQuestions {
    entries: Vec<(String, String)>,
}

impl AnchorQuestions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `anchors` object of a personalization response.
    /// Entries whose value is not a non-blank string are dropped individually.
    pub fn from_json(value: &Value) -> Self {
        let entries = value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(term, question)| {
                        question
                            .as_str()
                            .filter(|q| !q.trim().is_empty())
                            .map(|q| (term.clone(), q.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    pub fn insert(&mut self, term: impl Into<String>, question: impl Into<String>) {
        self.entries.push((term.into(), question.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the question for a captured marker text.
    ///
    /// Order: exact raw, exact cleaned, case-insensitive raw, case-insensitive
    /// cleaned. Case-insensitive collisions resolve to the first entry.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        let clean = clean_term(raw);
        self.exact(raw)
            .or_else(|| self.exact(&clean))
            .or_else(|| self.case_insensitive(raw))
            .or_else(|| self.case_insensitive(&clean))
    }

    fn exact(&self, term: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == term)
            .map(|(_, q)| q.as_str())
    }

    fn case_insensitive(&self, term: &str) -> Option<&str> {
        let folded = term.to_lowercase();
        self.entries
            .iter()
            .find(|(key, _)| key.to_lowercase() == folded)
            .map(|(_, q)| q.as_str())
    }
}

/// Remove markdown emphasis characters and surrounding whitespace.
pub fn clean_term(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn has_anchor_markers(text: &str) -> bool {
    text.contains("(__ANCHOR__)")
}

// ============ Scanner ============

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    Link {
        offset: usize,
        end: usize,
        display: &'a str,
        target: &'a str,
    },
}

/// Split `text` into literal runs and `[display](<delimiter>target)` links.
///
/// When `balanced_target` is set the target runs to the balanced closing
/// paren after the delimiter; otherwise the delimiter itself closes the link.
fn scan<'a>(text: &'a str, delimiter: &str, balanced_target: bool) -> Vec<Segment<'a>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut cursor = 0;

    while cursor < text.len() {
        let Some(found) = text[cursor..].find(delimiter) else {
            segments.push(Segment::Literal(&text[cursor..]));
            break;
        };
        let marker = cursor + found;
        let after_delimiter = marker + delimiter.len();

        let Some(open) = find_opening_bracket(bytes, cursor, marker) else {
            segments.push(Segment::Literal(&text[cursor..after_delimiter]));
            cursor = after_delimiter;
            continue;
        };

        if open > cursor {
            segments.push(Segment::Literal(&text[cursor..open]));
        }

        let (target, next) = if balanced_target {
            match find_closing_paren(bytes, after_delimiter) {
                Some(close) => (&text[after_delimiter..close], close + 1),
                None => {
                    segments.push(Segment::Literal(&text[open..after_delimiter]));
                    cursor = after_delimiter;
                    continue;
                }
            }
        } else {
            ("", after_delimiter)
        };

        segments.push(Segment::Link {
            offset: open,
            end: next,
            display: &text[open + 1..marker],
            target,
        });
        cursor = next;
    }

    segments
}

/// Walk back from `marker` (exclusive) to `floor` for the `[` that balances it.
fn find_opening_bracket(bytes: &[u8], floor: usize, marker: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in (floor..marker).rev() {
        match bytes[i] {
            b']' => depth += 1,
            b'[' if depth == 0 => return Some(i),
            b'[' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Walk forward from `start` with paren depth 1 to the balancing `)`.
fn find_closing_paren(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, byte) in bytes.iter().enumerate().skip(start) {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ============ Encoding ============

pub fn encode_component(text: &str) -> String {
    utf8_percent_encode(text, URI_COMPONENT).to_string()
}

/// Strict percent-decoding: fails on a malformed escape or invalid UTF-8.
pub fn decode_component(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(text)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Decode then re-encode, so a canonical payload is a fixed point.
pub fn normalize_payload(raw: &str) -> String {
    match decode_component(raw) {
        Some(decoded) => encode_component(&decoded),
        None => encode_component(raw),
    }
}

// ============ Passes ============

/// Rewrite every `[display](suggestion:payload)` with a balanced payload and
/// canonical encoding. Unmatched delimiters pass through as literal text.
pub fn normalize_suggestion_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in scan(text, SUGGESTION_DELIMITER, true) {
        match segment {
            Segment::Literal(literal) => out.push_str(literal),
            Segment::Link { display, target, .. } => {
                out.push('[');
                out.push_str(display);
                out.push_str(SUGGESTION_DELIMITER);
                out.push_str(&normalize_payload(target));
                out.push(')');
            }
        }
    }
    out
}

/// Replace `[Term](__ANCHOR__)` markers using the generated questions.
pub fn hydrate_anchors(
    text: &str,
    questions: &AnchorQuestions,
    unresolved: UnresolvedAnchorPolicy,
) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in scan(text, ANCHOR_DELIMITER, false) {
        match segment {
            Segment::Literal(literal) => out.push_str(literal),
            Segment::Link { display, .. } => match questions.resolve(display) {
                Some(question) => {
                    out.push('[');
                    out.push_str(display);
                    out.push_str(SUGGESTION_DELIMITER);
                    out.push_str(&normalize_payload(question));
                    out.push(')');
                }
                None => match unresolved {
                    UnresolvedAnchorPolicy::Strip => out.push_str(display),
                    UnresolvedAnchorPolicy::Preserve => {
                        out.push('[');
                        out.push_str(display);
                        out.push_str(ANCHOR_DELIMITER);
                    }
                },
            },
        }
    }
    out
}

/// Drop `Anchor:` labels the model sometimes puts in front of a link.
pub fn strip_anchor_labels(text: &str) -> String {
    ANCHOR_LABEL.replace_all(text, "${1}[").into_owned()
}

/// Final cleanup applied to assistant content before it is shown.
pub fn prepare_for_display(text: &str) -> String {
    normalize_suggestion_links(&strip_anchor_labels(text))
}

/// What clicking an inline link sends back into the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// A resolved anchor: send the generated question.
    Ask(String),
    /// A preserved marker: ask for an explanation of the term.
    Explain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineLink {
    pub display: String,
    pub action: LinkAction,
}

/// Inline links with their byte spans in document order. A link that
/// starts inside an earlier one is skipped.
fn link_spans(text: &str) -> Vec<(Range<usize>, InlineLink)> {
    let mut found: Vec<(Range<usize>, InlineLink)> = Vec::new();

    for segment in scan(text, SUGGESTION_DELIMITER, true) {
        if let Segment::Link { offset, end, display, target } = segment {
            let question = decode_component(target).unwrap_or_else(|| target.to_string());
            found.push((
                offset..end,
                InlineLink {
                    display: display.to_string(),
                    action: LinkAction::Ask(question),
                },
            ));
        }
    }

    for segment in scan(text, ANCHOR_DELIMITER, false) {
        if let Segment::Link { offset, end, display, .. } = segment {
            found.push((
                offset..end,
                InlineLink {
                    display: display.to_string(),
                    action: LinkAction::Explain(clean_term(display)),
                },
            ));
        }
    }

    found.sort_by_key(|(span, _)| span.start);
    let mut covered = 0;
    found.retain(|(span, _)| {
        let keep = span.start >= covered;
        if keep {
            covered = span.end;
        }
        keep
    });
    found
}

/// Inline interactive links in document order.
pub fn extract_links(text: &str) -> Vec<InlineLink> {
    link_spans(text).into_iter().map(|(_, link)| link).collect()
}

/// Plain-text rendering for terminals: every inline link becomes its display
/// text followed by its 1-based number in `extract_links` order.
pub fn render_numbered_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (number, (span, link)) in link_spans(text).into_iter().enumerate() {
        out.push_str(&text[cursor..span.start]);
        out.push_str(&link.display);
        out.push_str(&format!(" [{}]", number + 1));
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_policy_with_empty_questions() {
        let base = "Use [OAuth 2.0](__ANCHOR__) and [JWT](__ANCHOR__), then (maybe) [rest].";
        let result = hydrate_anchors(base, &AnchorQuestions::new(), UnresolvedAnchorPolicy::Strip);
        assert_eq!(result, "Use OAuth 2.0 and JWT, then (maybe) [rest].");
    }

    #[test]
    fn test_strip_keeps_nested_brackets_in_display() {
        let base = "See [array[0] access](__ANCHOR__) here";
        let result = hydrate_anchors(base, &AnchorQuestions::new(), UnresolvedAnchorPolicy::Strip);
        assert_eq!(result, "See array[0] access here");
    }

    #[test]
    fn test_preserve_policy_keeps_marker() {
        let base = "Use [OAuth 2.0](__ANCHOR__) for auth.";
        let result = hydrate_anchors(base, &AnchorQuestions::new(), UnresolvedAnchorPolicy::Preserve);
        assert_eq!(result, base);
    }

    #[test]
    fn test_hydrate_resolves_question() {
        let mut questions = AnchorQuestions::new();
        questions.insert("OAuth 2.0", "How does the token flow work?");
        let result = hydrate_anchors(
            "Use [OAuth 2.0](__ANCHOR__) for auth.",
            &questions,
            UnresolvedAnchorPolicy::Strip,
        );
        assert_eq!(
            result,
            "Use [OAuth 2.0](suggestion:How%20does%20the%20token%20flow%20work%3F) for auth."
        );
    }

    #[test]
    fn test_cleaned_key_lookup() {
        let mut questions = AnchorQuestions::new();
        questions.insert("OAuth 2.0", "Q1");
        assert_eq!(questions.resolve("**OAuth 2.0**"), Some("Q1"));

        let result = hydrate_anchors(
            "[**OAuth 2.0**](__ANCHOR__)",
            &questions,
            UnresolvedAnchorPolicy::Strip,
        );
        assert_eq!(result, "[**OAuth 2.0**](suggestion:Q1)");
    }

    #[test]
    fn test_lookup_precedence() {
        let mut questions = AnchorQuestions::new();
        questions.insert("oauth", "case-insensitive");
        questions.insert("OAuth", "cleaned");
        questions.insert("*OAuth*", "exact");
        assert_eq!(questions.resolve("*OAuth*"), Some("exact"));
        assert_eq!(questions.resolve("_OAuth_"), Some("cleaned"));
        assert_eq!(questions.resolve("OAUTH"), Some("case-insensitive"));
        assert_eq!(questions.resolve("*OAUTH*"), Some("exact"));
        assert_eq!(questions.resolve("_OAUTH_"), Some("case-insensitive"));
        assert_eq!(questions.resolve("SAML"), None);
    }

    #[test]
    fn test_case_insensitive_tie_takes_first_entry() {
        let mut questions = AnchorQuestions::new();
        questions.insert("Rust", "first");
        questions.insert("RUST", "second");
        assert_eq!(questions.resolve("rust"), Some("first"));
    }

    #[test]
    fn test_questions_from_json_drop_invalid_entries() {
        let questions = AnchorQuestions::from_json(&json!({
            "GDPR": "Who enforces it?",
            "email": null,
            "Sharding": 3,
            "ACID": "   ",
        }));
        assert_eq!(questions.len(), 1);
        assert_eq!(questions.resolve("GDPR"), Some("Who enforces it?"));
        assert!(AnchorQuestions::from_json(&json!(["GDPR"])).is_empty());
    }

    #[test]
    fn test_nested_parens_payload_is_kept_whole() {
        let text = "Try [Term](suggestion:What about (edge cases)?) next.";
        let normalized = normalize_suggestion_links(text);
        assert_eq!(
            normalized,
            "Try [Term](suggestion:What%20about%20(edge%20cases)%3F) next."
        );
        let links = extract_links(&normalized);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].display, "Term");
        assert_eq!(links[0].action, LinkAction::Ask("What about (edge cases)?".to_string()));
    }

    #[test]
    fn test_extract_raw_payload_with_nested_parens() {
        let links = extract_links("[Term](suggestion:What about (edge cases)?)");
        assert_eq!(links[0].action, LinkAction::Ask("What about (edge cases)?".to_string()));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let encoded = "What%20is%20it%3F";
        assert_eq!(normalize_payload(encoded), encoded);

        let once = normalize_suggestion_links("[A](suggestion:Why (not) 100%?) and [B [x]](suggestion:ok)");
        let twice = normalize_suggestion_links(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_malformed_escape_is_encoded_raw() {
        assert_eq!(decode_component("100%"), None);
        assert_eq!(decode_component("%E0%A4"), None);
        assert_eq!(normalize_payload("100%"), "100%25");
    }

    #[test]
    fn test_unicode_payload_round_trip() {
        let encoded = normalize_payload("Qu'est-ce que café?");
        assert_eq!(encoded, "Qu'est-ce%20que%20caf%C3%A9%3F");
        assert_eq!(decode_component(&encoded).as_deref(), Some("Qu'est-ce que café?"));
    }

    #[test]
    fn test_missing_opening_bracket_is_literal() {
        let text = "no bracket](suggestion:foo) but [ok](suggestion:bar)";
        assert_eq!(
            normalize_suggestion_links(text),
            "no bracket](suggestion:foo) but [ok](suggestion:bar)"
        );
    }

    #[test]
    fn test_unterminated_payload_is_literal() {
        let text = "[A](suggestion:open (paren and [B](suggestion:fine)";
        let result = normalize_suggestion_links(text);
        assert_eq!(result, "[A](suggestion:open (paren and [B](suggestion:fine)");

        let tail = "[A](suggestion:never closed";
        assert_eq!(normalize_suggestion_links(tail), tail);
    }

    #[test]
    fn test_marker_without_opening_bracket_is_literal() {
        let text = "stray](__ANCHOR__) then [Real](__ANCHOR__)";
        let result = hydrate_anchors(text, &AnchorQuestions::new(), UnresolvedAnchorPolicy::Strip);
        assert_eq!(result, "stray](__ANCHOR__) then Real");
    }

    #[test]
    fn test_strip_anchor_labels() {
        let text = "Intro\n- Anchor: [GDPR](__ANCHOR__)\nAnchor: [CCPA](__ANCHOR__)";
        assert_eq!(strip_anchor_labels(text), "Intro\n[GDPR](__ANCHOR__)\n[CCPA](__ANCHOR__)");
        assert_eq!(strip_anchor_labels("anchor: [X](__ANCHOR__)"), "[X](__ANCHOR__)");
        assert_eq!(strip_anchor_labels("Anchor: plain text"), "Anchor: plain text");
    }

    #[test]
    fn test_extract_links_in_document_order() {
        let text = "[**Sharding**](__ANCHOR__) vs [Replication](suggestion:Why%20replicate%3F)";
        let links = extract_links(text);
        assert_eq!(
            links,
            vec![
                InlineLink {
                    display: "**Sharding**".to_string(),
                    action: LinkAction::Explain("Sharding".to_string()),
                },
                InlineLink {
                    display: "Replication".to_string(),
                    action: LinkAction::Ask("Why replicate?".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_numbered_rendering_hides_link_targets() {
        let text = "Use [OAuth 2.0](__ANCHOR__) or [mTLS](suggestion:When%20is%20mTLS%20(mutual)%20better%3F).";
        let rendered = render_numbered_links(text);
        assert_eq!(rendered, "Use OAuth 2.0 [1] or mTLS [2].");
        assert!(!rendered.contains("(__ANCHOR__)"));
        assert!(!rendered.contains("](suggestion:"));

        assert_eq!(render_numbered_links("No links [here]."), "No links [here].");
    }

    #[test]
    fn test_has_anchor_markers() {
        assert!(has_anchor_markers("a [b](__ANCHOR__)"));
        assert!(!has_anchor_markers("a [b](suggestion:c)"));
    }
}
