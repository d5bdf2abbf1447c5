//! Minimal compound-selector matching.
//!
//! The engine only ever queries with expressions of the shape it builds
//! itself (`style,link[rel=stylesheet]`, `[data-cssvars="out"]`,
//! `link[disabled]:not([data-cssvars])`, ...), so this supports compound
//! selectors — type, `#id`, `.class`, `[attr]`, `[attr=value]` and
//! `:not(...)` over simple selectors — joined by top-level commas.
//! Combinators are intentionally not supported.

use crate::{Dom, NodeId};

/// A simple selector component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimpleSelector {
    /// Element tag name (type selector), e.g. `style`.
    Type(String),
    /// Id selector, e.g. `#main`.
    Id(String),
    /// Class selector, e.g. `.themed`.
    Class(String),
    /// Universal selector (`*`).
    Universal,
    /// Attribute selector, e.g. `[href]` or `[rel="stylesheet"]`.
    /// Only the `=` operator is supported.
    Attribute {
        name: String,
        value: Option<String>,
    },
    /// Negation over a list of simple selectors.
    Not(Vec<SimpleSelector>),
}

/// A sequence of simple selectors with no combinators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompoundSelector {
    pub simples: Vec<SimpleSelector>,
}

/// A comma-separated list of compound selectors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectorList {
    compounds: Vec<CompoundSelector>,
}

impl SelectorList {
    /// Parse a selector list. Unparseable parts are dropped; an empty or
    /// blank input yields a list that matches nothing.
    pub fn parse(text: &str) -> Self {
        let compounds = split_top_level_commas(text)
            .into_iter()
            .filter_map(|part| parse_compound(part.trim()))
            .collect();
        Self { compounds }
    }

    /// Whether the list has no selectors (and therefore matches nothing).
    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }

    /// Whether `node` matches any compound in the list.
    pub fn matches(&self, dom: &Dom, node: NodeId) -> bool {
        self.compounds
            .iter()
            .any(|compound| compound_matches(compound, dom, node))
    }
}

fn compound_matches(compound: &CompoundSelector, dom: &Dom, node: NodeId) -> bool {
    compound
        .simples
        .iter()
        .all(|simple| simple_matches(simple, dom, node))
}

fn simple_matches(simple: &SimpleSelector, dom: &Dom, node: NodeId) -> bool {
    match simple {
        SimpleSelector::Universal => dom.tag(node).is_some(),
        SimpleSelector::Type(tag) => dom.tag(node) == Some(tag.as_str()),
        SimpleSelector::Id(id) => dom.attr(node, "id") == Some(id.as_str()),
        SimpleSelector::Class(class) => dom
            .attr(node, "class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class)),
        SimpleSelector::Attribute { name, value } => match value {
            None => dom.attr(node, name).is_some(),
            Some(expected) => dom.attr(node, name) == Some(expected.as_str()),
        },
        SimpleSelector::Not(inner) => !inner
            .iter()
            .any(|simple| simple_matches(simple, dom, node)),
    }
}

/// Split on commas outside quotes, brackets and parens.
fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' | '\'' => match quote {
                Some(open) if open == ch => quote = None,
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
}

fn parse_compound(text: &str) -> Option<CompoundSelector> {
    if text.is_empty() {
        return None;
    }
    let mut simples = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (simple, remainder) = parse_simple(rest)?;
        simples.push(simple);
        rest = remainder;
    }
    Some(CompoundSelector { simples })
}

fn ident_end(text: &str) -> usize {
    text.char_indices()
        .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
        .map_or(text.len(), |(idx, _)| idx)
}

fn parse_simple(text: &str) -> Option<(SimpleSelector, &str)> {
    let mut chars = text.chars();
    match chars.next()? {
        '*' => Some((SimpleSelector::Universal, &text[1..])),
        '#' => {
            let end = 1 + ident_end(&text[1..]);
            (end > 1).then(|| (SimpleSelector::Id(text[1..end].to_owned()), &text[end..]))
        }
        '.' => {
            let end = 1 + ident_end(&text[1..]);
            (end > 1).then(|| (SimpleSelector::Class(text[1..end].to_owned()), &text[end..]))
        }
        '[' => {
            let close = find_matching(text, '[', ']')?;
            let inner = &text[1..close];
            let simple = match inner.split_once('=') {
                Some((name, value)) => SimpleSelector::Attribute {
                    name: name.trim().to_owned(),
                    value: Some(strip_quotes(value.trim()).to_owned()),
                },
                None => SimpleSelector::Attribute {
                    name: inner.trim().to_owned(),
                    value: None,
                },
            };
            Some((simple, &text[close + 1..]))
        }
        ':' => {
            let body = &text[1..];
            let end = ident_end(body);
            let name = &body[..end];
            let after = &body[end..];
            if name == "not" && after.starts_with('(') {
                let close = find_matching(after, '(', ')')?;
                let inner = &after[1..close];
                let simples = split_top_level_commas(inner)
                    .into_iter()
                    .filter_map(|part| {
                        parse_simple(part.trim())
                            .and_then(|(simple, rest)| rest.is_empty().then_some(simple))
                    })
                    .collect();
                Some((SimpleSelector::Not(simples), &after[close + 1..]))
            } else {
                // Unknown pseudo-class: treat as a selector that never
                // matches so excludes stay conservative.
                Some((SimpleSelector::Not(vec![SimpleSelector::Universal]), after))
            }
        }
        ch if ch.is_ascii_alphabetic() => {
            let end = ident_end(text);
            Some((
                SimpleSelector::Type(text[..end].to_ascii_lowercase()),
                &text[end..],
            ))
        }
        _ => None,
    }
}

/// Byte index of the `close` matching the `open` at index 0.
fn find_matching(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' | '\'' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                Some(_) => {}
            },
            ch if ch == open && quote.is_none() => depth += 1,
            ch if ch == close && quote.is_none() => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn dom_with_link() -> (Dom, NodeId, NodeId) {
        let mut dom = Dom::new(Url::parse("https://example.com/").unwrap());
        let root = dom.root();
        let style = dom.create_element(root, "style");
        let link = dom.create_element(root, "link");
        dom.set_attr(link, "rel", "stylesheet");
        dom.set_attr(link, "href", "site.css");
        (dom, style, link)
    }

    #[test]
    fn default_include_matches_both_kinds() {
        let (dom, style, link) = dom_with_link();
        let list = SelectorList::parse("style,link[rel=stylesheet]");
        assert!(dom.matches(style, &list));
        assert!(dom.matches(link, &list));
    }

    #[test]
    fn quoted_attribute_values() {
        let (dom, _, link) = dom_with_link();
        let list = SelectorList::parse("link[rel=\"stylesheet\"]");
        assert!(dom.matches(link, &list));
    }

    #[test]
    fn not_over_attribute_presence() {
        let (mut dom, style, link) = dom_with_link();
        let list = SelectorList::parse("link[rel=stylesheet]:not([data-cssvars])");
        assert!(dom.matches(link, &list));
        dom.set_attr(link, "data-cssvars", "src");
        assert!(!dom.matches(link, &list));
        assert!(!dom.matches(style, &list));
    }

    #[test]
    fn empty_attribute_value_is_distinct_from_presence() {
        let (mut dom, style, _) = dom_with_link();
        dom.set_attr(style, "data-cssvars", "");
        let marked_empty = SelectorList::parse("[data-cssvars=\"\"]");
        let marked_any = SelectorList::parse("[data-cssvars]:not([data-cssvars=\"\"])");
        assert!(dom.matches(style, &marked_empty));
        assert!(!dom.matches(style, &marked_any));
        dom.set_attr(style, "data-cssvars", "skip");
        assert!(!dom.matches(style, &marked_empty));
        assert!(dom.matches(style, &marked_any));
    }

    #[test]
    fn blank_list_matches_nothing() {
        let (dom, style, _) = dom_with_link();
        let list = SelectorList::parse("");
        assert!(list.is_empty());
        assert!(!dom.matches(style, &list));
    }
}
