//! Shared string-scanning primitives.
//!
//! Depth-tracked balanced-delimiter matching is the one primitive the rest
//! of the engine keeps reaching for: `var(...)` expansion, `calc()`
//! flattening, `@import` statement scanning and `url()` rewriting all use
//! it. Quotes protect delimiters; comments are handled by the dedicated
//! helpers below.

/// A balanced delimiter span: byte index of the opening delimiter and of
/// its matching closing delimiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Balanced {
    pub open: usize,
    pub close: usize,
}

impl Balanced {
    /// The text strictly between the delimiters.
    pub fn body<'a>(&self, text: &'a str) -> &'a str {
        &text[self.open + 1..self.close]
    }
}

/// Find the first balanced `open`...`close` span in `text`, tracking
/// nesting depth and skipping quoted strings. Returns `None` when no
/// complete span exists.
pub fn find_balanced(text: &str, open: char, close: char) -> Option<Balanced> {
    let mut depth = 0_i32;
    let mut first = None;
    let mut quote: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' | '\'' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                Some(_) => {}
            },
            _ if quote.is_some() => {}
            ch if ch == open => {
                if depth == 0 {
                    first = Some(idx);
                }
                depth += 1;
            }
            ch if ch == close => {
                depth -= 1;
                if depth == 0 {
                    return first.map(|start| Balanced {
                        open: start,
                        close: idx,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `text` on top-level commas (outside quotes, parens and brackets),
/// trimming each part and dropping empty parts.
pub fn split_top_level_commas(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' | '\'' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                Some(_) => {}
            },
            '(' | '[' if quote.is_none() => depth += 1,
            ')' | ']' if quote.is_none() => depth -= 1,
            ',' if quote.is_none() && depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Split `text` at the first top-level comma into `(head, Some(tail))`, or
/// `(text, None)` when there is none. Used for `var(name, fallback)`.
pub fn split_once_top_level_comma(text: &str) -> (&str, Option<&str>) {
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' | '\'' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                Some(_) => {}
            },
            '(' | '[' if quote.is_none() => depth += 1,
            ')' | ']' if quote.is_none() => depth -= 1,
            ',' if quote.is_none() && depth == 0 => {
                return (&text[..idx], Some(&text[idx + 1..]));
            }
            _ => {}
        }
    }
    (text, None)
}

/// Remove `/* ... */` comments, leaving quoted strings untouched. An
/// unterminated comment runs to the end of the text.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut idx = 0;
    let mut quote: Option<u8> = None;
    while idx < bytes.len() {
        let byte = bytes[idx];
        match quote {
            Some(open) => {
                if byte == open {
                    quote = None;
                }
            }
            None => {
                if byte == b'"' || byte == b'\'' {
                    quote = Some(byte);
                } else if byte == b'/' && bytes.get(idx + 1) == Some(&b'*') {
                    match text[idx + 2..].find("*/") {
                        Some(end) => {
                            idx += 2 + end + 2;
                            continue;
                        }
                        None => return out,
                    }
                }
            }
        }
        let ch_len = text[idx..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        out.push_str(&text[idx..idx + ch_len]);
        idx += ch_len;
    }
    out
}

/// Whether `selector` contains `anchor` (e.g. `:root`) not immediately
/// followed by a qualifier (`.`, `:`, `#`, `(` or an identifier char).
pub fn has_unqualified_anchor(selector: &str, anchor: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = selector[from..].find(anchor) {
        let end = from + pos + anchor.len();
        let next = selector[end..].chars().next();
        let qualified = matches!(
            next,
            Some(ch) if ch == '.' || ch == ':' || ch == '#' || ch == '('
                || ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
        );
        if !qualified {
            return true;
        }
        from = end;
    }
    false
}

/// Whether a selector targets the root scope (`:root` or `:host`).
pub fn is_root_scope(selector: &str) -> bool {
    has_unqualified_anchor(selector, ":root") || has_unqualified_anchor(selector, ":host")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_skips_nested_and_quoted() {
        let text = "a (b (c) \")\" d) e (f)";
        let span = find_balanced(text, '(', ')').unwrap();
        assert_eq!(span.body(text), "b (c) \")\" d");
    }

    #[test]
    fn balanced_none_when_unclosed() {
        assert!(find_balanced("var(--a", '(', ')').is_none());
    }

    #[test]
    fn selector_split_protects_functional_commas() {
        let parts = split_top_level_commas("p:not(.a, .b), h1[title=\"x,y\"], div");
        assert_eq!(parts, vec!["p:not(.a, .b)", "h1[title=\"x,y\"]", "div"]);
    }

    #[test]
    fn var_argument_split() {
        let (name, fallback) = split_once_top_level_comma("--a, var(--b, blue)");
        assert_eq!(name, "--a");
        assert_eq!(fallback, Some(" var(--b, blue)"));
        assert_eq!(split_once_top_level_comma("--a"), ("--a", None));
    }

    #[test]
    fn comment_stripping() {
        assert_eq!(
            strip_comments("a /* x */ b /* unterminated"),
            "a  b ".to_owned()
        );
        assert_eq!(
            strip_comments("content: '/* not a comment */'"),
            "content: '/* not a comment */'".to_owned()
        );
    }

    #[test]
    fn root_scope_detection() {
        assert!(is_root_scope(":root"));
        assert!(is_root_scope("html, :root"));
        assert!(is_root_scope(":host"));
        assert!(!is_root_scope(":root.theme"));
        assert!(!is_root_scope(":rootish"));
        assert!(!is_root_scope(":host(.dark)"));
        assert!(!is_root_scope("div"));
    }
}
