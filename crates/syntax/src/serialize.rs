//! Canonical serialization of the structural tree.
//!
//! Each node kind has exactly one text form; nodes are emitted in original
//! order with no reordering. Rules whose declaration list is empty are
//! omitted. Comments are dropped unless they carry the ponyfill marker
//! prefix.

use crate::{CssNode, Declaration, MARKER_COMMENT_PREFIX, Stylesheet};
use std::fmt::Write as _;

/// Serialize a stylesheet back to CSS text.
pub fn serialize_stylesheet(sheet: &Stylesheet) -> String {
    let mut out = String::new();
    write_nodes(&mut out, &sheet.nodes);
    out
}

fn write_nodes(out: &mut String, nodes: &[CssNode]) {
    for node in nodes {
        write_node(out, node);
    }
}

fn write_declarations(out: &mut String, declarations: &[Declaration]) {
    for declaration in declarations {
        let _ = write!(out, "{}:{};", declaration.property, declaration.value);
    }
}

fn write_node(out: &mut String, node: &CssNode) {
    match node {
        CssNode::Rule(rule) => {
            if rule.declarations.is_empty() {
                return;
            }
            out.push_str(&rule.selectors.join(","));
            out.push('{');
            write_declarations(out, &rule.declarations);
            out.push('}');
        }
        CssNode::Media { condition, rules } => {
            let _ = write!(out, "@media {condition}{{");
            write_nodes(out, rules);
            out.push('}');
        }
        CssNode::Supports { condition, rules } => {
            let _ = write!(out, "@supports {condition}{{");
            write_nodes(out, rules);
            out.push('}');
        }
        CssNode::Document {
            vendor,
            condition,
            rules,
        } => {
            let _ = write!(
                out,
                "@{}document {condition}{{",
                vendor.as_deref().unwrap_or("")
            );
            write_nodes(out, rules);
            out.push('}');
        }
        CssNode::Host { rules } => {
            out.push_str("@host{");
            write_nodes(out, rules);
            out.push('}');
        }
        CssNode::Keyframes {
            vendor,
            name,
            frames,
        } => {
            let _ = write!(
                out,
                "@{}keyframes {name}{{",
                vendor.as_deref().unwrap_or("")
            );
            for frame in frames {
                out.push_str(&frame.values.join(","));
                out.push('{');
                write_declarations(out, &frame.declarations);
                out.push('}');
            }
            out.push('}');
        }
        CssNode::FontFace { declarations } => {
            out.push_str("@font-face{");
            write_declarations(out, declarations);
            out.push('}');
        }
        CssNode::Page {
            selectors,
            declarations,
        } => {
            out.push_str("@page ");
            out.push_str(&selectors.join(", "));
            out.push('{');
            write_declarations(out, declarations);
            out.push('}');
        }
        CssNode::PageMarginBox { name, declarations } => {
            let _ = write!(out, "@{name}{{");
            write_declarations(out, declarations);
            out.push('}');
        }
        CssNode::Import { prelude } => {
            let _ = write!(out, "@import {prelude};");
        }
        CssNode::Charset { prelude } => {
            let _ = write!(out, "@charset {prelude};");
        }
        CssNode::Namespace { prelude } => {
            let _ = write!(out, "@namespace {prelude};");
        }
        CssNode::CustomMedia { name, media } => {
            let _ = write!(out, "@custom-media {name} {media};");
        }
        CssNode::Other {
            name,
            prelude,
            block,
        } => {
            let _ = write!(out, "@{name}");
            if !prelude.is_empty() {
                let _ = write!(out, " {prelude}");
            }
            match block {
                Some(body) => {
                    let _ = write!(out, "{{{body}}}");
                }
                None => out.push(';'),
            }
        }
        CssNode::Comment(comment) => {
            if comment.starts_with(MARKER_COMMENT_PREFIX) {
                let _ = write!(out, "/*{comment}*/");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParseOptions, parse_stylesheet};

    fn round_trip(css: &str) -> String {
        serialize_stylesheet(&parse_stylesheet(css, &ParseOptions::default()).unwrap())
    }

    fn no_space(text: &str) -> String {
        text.chars().filter(|ch| !ch.is_whitespace()).collect()
    }

    #[test]
    fn round_trip_is_whitespace_equivalent() {
        let css = "
            :root { --main: #333; }
            p, a.link { color: var(--main); margin: 0 auto; }
            @media screen and (min-width: 40em) {
                .grid { width: calc(100% - var(--gutter, 1em)); }
            }
            @supports (display: grid) { .grid { display: grid; } }
            @font-face { font-family: \"Body\"; src: url(body.woff2); }
            @keyframes fade { from { opacity: 0; } to { opacity: 1; } }
            @page :first { margin: 1cm; }
            @import url(\"extra.css\") screen;
            @custom-media --narrow (max-width: 30em);
        ";
        let first = round_trip(css);
        let second = round_trip(&first);
        assert_eq!(no_space(&first), no_space(&second));
        assert_eq!(no_space(css), no_space(&first));
    }

    #[test]
    fn empty_rules_are_omitted() {
        assert_eq!(round_trip("p {} q { color: red }"), "q{color:red;}");
    }

    #[test]
    fn marker_comments_survive_plain_comments_do_not() {
        let sheet = Stylesheet {
            nodes: vec![
                CssNode::Comment("__CSSVARSPONYFILL-0__".to_owned()),
                CssNode::Comment("ordinary".to_owned()),
            ],
        };
        assert_eq!(
            serialize_stylesheet(&sheet),
            "/*__CSSVARSPONYFILL-0__*/".to_owned()
        );
    }
}
