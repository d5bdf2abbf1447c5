//! Structural CSS tree, parser and serializer.
//!
//! The parser builds a tree of rules, declarations and at-rules without
//! interpreting anything it does not have to: selectors, at-rule preludes
//! and declaration values are kept as raw text so that serialization
//! reconstructs syntactically equivalent CSS. Only the pieces the variable
//! resolver rewrites ever change.

#![forbid(unsafe_code)]

pub mod scan;
mod parser;
mod serialize;

pub use parser::{ParseError, ParseOptions, parse_stylesheet};
pub use serialize::serialize_stylesheet;

/// Marker prefix for engine-injected comments; all other comments are
/// dropped on serialization.
pub const MARKER_COMMENT_PREFIX: &str = "__CSSVARSPONYFILL";

/// A single CSS declaration (`property: value`). The value keeps its raw
/// text, including any `!important`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    /// Property name. Custom properties (`--*`) keep their case; all other
    /// names are lowercased.
    pub property: String,
    /// Raw value text, trimmed.
    pub value: String,
}

impl Declaration {
    /// Whether this is a custom-property declaration.
    pub fn is_custom_property(&self) -> bool {
        self.property.starts_with("--")
    }

    /// Whether the value contains a `var(` reference.
    pub fn uses_var(&self) -> bool {
        self.value.contains("var(")
    }
}

/// A style rule: selector list plus declaration block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rule {
    /// Selectors split on top-level commas, trimmed, in source order.
    pub selectors: Vec<String>,
    pub declarations: Vec<Declaration>,
}

impl Rule {
    /// Whether any selector targets the root scope (`:root`, or `:host`
    /// when shadow-scoped) without a trailing qualifier.
    pub fn is_root_scope(&self) -> bool {
        self.selectors.iter().any(|sel| scan::is_root_scope(sel))
    }
}

/// One keyframe block inside `@keyframes` (`0%, 100% { ... }`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keyframe {
    /// Frame selectors (`from`, `to`, percentages).
    pub values: Vec<String>,
    pub declarations: Vec<Declaration>,
}

/// A node of the structural tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CssNode {
    Rule(Rule),
    Media {
        condition: String,
        rules: Vec<CssNode>,
    },
    Supports {
        condition: String,
        rules: Vec<CssNode>,
    },
    Document {
        /// Vendor prefix including dashes (`-moz-`), if any.
        vendor: Option<String>,
        condition: String,
        rules: Vec<CssNode>,
    },
    Host {
        rules: Vec<CssNode>,
    },
    Keyframes {
        vendor: Option<String>,
        name: String,
        frames: Vec<Keyframe>,
    },
    FontFace {
        declarations: Vec<Declaration>,
    },
    Page {
        selectors: Vec<String>,
        declarations: Vec<Declaration>,
    },
    PageMarginBox {
        /// Box name, e.g. `top-left-corner`.
        name: String,
        declarations: Vec<Declaration>,
    },
    Import {
        /// Raw prelude (`url("a.css") screen`).
        prelude: String,
    },
    Charset {
        prelude: String,
    },
    Namespace {
        prelude: String,
    },
    CustomMedia {
        name: String,
        media: String,
    },
    /// At-rule the engine does not model; preserved opaquely.
    Other {
        name: String,
        prelude: String,
        /// Raw block content, or `None` for a statement at-rule.
        block: Option<String>,
    },
    /// Engine-injected marker comment. The parser never produces these.
    Comment(String),
}

impl CssNode {
    /// Whether any declaration in this subtree references `var()`.
    pub fn has_var_usage(&self) -> bool {
        match self {
            Self::Rule(rule) => rule.declarations.iter().any(Declaration::uses_var),
            Self::Media { rules, .. }
            | Self::Supports { rules, .. }
            | Self::Document { rules, .. }
            | Self::Host { rules } => rules.iter().any(Self::has_var_usage),
            Self::Keyframes { frames, .. } => frames
                .iter()
                .any(|frame| frame.declarations.iter().any(Declaration::uses_var)),
            Self::FontFace { declarations }
            | Self::Page { declarations, .. }
            | Self::PageMarginBox { declarations, .. } => {
                declarations.iter().any(Declaration::uses_var)
            }
            _ => false,
        }
    }
}

/// A parsed stylesheet: ordered top-level nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stylesheet {
    pub nodes: Vec<CssNode>,
}

impl Stylesheet {
    /// Visit every declaration list in the tree, depth first, in source
    /// order. Used by the resolver to rewrite values in place.
    pub fn for_each_declarations(&mut self, visit: &mut impl FnMut(&mut Vec<Declaration>)) {
        fn walk(nodes: &mut Vec<CssNode>, visit: &mut impl FnMut(&mut Vec<Declaration>)) {
            for node in nodes {
                match node {
                    CssNode::Rule(rule) => visit(&mut rule.declarations),
                    CssNode::Media { rules, .. }
                    | CssNode::Supports { rules, .. }
                    | CssNode::Document { rules, .. }
                    | CssNode::Host { rules } => walk(rules, visit),
                    CssNode::Keyframes { frames, .. } => {
                        for frame in frames {
                            visit(&mut frame.declarations);
                        }
                    }
                    CssNode::FontFace { declarations }
                    | CssNode::Page { declarations, .. }
                    | CssNode::PageMarginBox { declarations, .. } => visit(declarations),
                    _ => {}
                }
            }
        }
        walk(&mut self.nodes, visit);
    }

    /// Top-level rules in source order (at-rule contents excluded, matching
    /// the scope the variable extractor reads from).
    pub fn top_level_rules(&self) -> impl Iterator<Item = &Rule> {
        self.nodes.iter().filter_map(|node| match node {
            CssNode::Rule(rule) => Some(rule),
            _ => None,
        })
    }
}
