//! Recursive-descent parsing on top of `cssparser`.
//!
//! Preludes and declaration values are captured as raw source slices
//! (`slice_from`), so nothing the engine does not rewrite is reinterpreted.
//! A parse failure aborts the stylesheet it occurred in; the engine decides
//! what to do with the error.

use crate::scan;
use crate::{CssNode, Declaration, Keyframe, Rule, Stylesheet};
use cssparser::AtRuleParser as CssAtRuleParser;
use cssparser::BasicParseErrorKind;
use cssparser::CowRcStr;
use cssparser::ParseError as CssParseError;
use cssparser::ParseErrorKind;
use cssparser::Parser;
use cssparser::ParserInput;
use cssparser::ParserState;
use cssparser::QualifiedRuleParser as CssQualifiedRuleParser;
use cssparser::RuleBodyItemParser as CssRuleBodyItemParser;
use cssparser::RuleBodyParser as CssRuleBodyParser;
use cssparser::StyleSheetParser;
use thiserror::Error;

/// Options controlling what the parser keeps.
#[derive(Clone, Copy, Debug)]
pub struct ParseOptions {
    /// When false, rules and at-rules with no `var()` usage are dropped,
    /// unless a rule declares a custom property under a root-scope
    /// selector. An output-size optimization, not a correctness feature.
    pub preserve_static: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            preserve_static: true,
        }
    }
}

/// Structured CSS parse failure: description plus offending context.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("CSS parse error: {message} at {line}:{column} near `{context}`")]
pub struct ParseError {
    pub message: String,
    /// Zero-based source line of the failure.
    pub line: u32,
    pub column: u32,
    /// Excerpt of the source around the failure.
    pub context: String,
}

type ParserError = String;

/// Parse a stylesheet. The first failure aborts this stylesheet only.
pub fn parse_stylesheet(css: &str, options: &ParseOptions) -> Result<Stylesheet, ParseError> {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut top = RuleListParser { options };
    let mut sheet = Stylesheet::default();
    for item in StyleSheetParser::new(&mut parser, &mut top) {
        match item {
            Ok(Some(node)) => sheet.nodes.push(node),
            Ok(None) => {}
            Err((error, slice)) => return Err(convert_error(&error, slice)),
        }
    }
    Ok(sheet)
}

fn convert_error(error: &CssParseError<'_, ParserError>, context: &str) -> ParseError {
    let message = match &error.kind {
        ParseErrorKind::Basic(basic) => match basic {
            BasicParseErrorKind::UnexpectedToken(_) => "unexpected token".to_owned(),
            BasicParseErrorKind::EndOfInput => "unexpected end of input".to_owned(),
            BasicParseErrorKind::AtRuleInvalid(name) => format!("invalid at-rule @{name}"),
            BasicParseErrorKind::AtRuleBodyInvalid => "invalid at-rule body".to_owned(),
            BasicParseErrorKind::QualifiedRuleInvalid => "invalid rule".to_owned(),
        },
        ParseErrorKind::Custom(message) => message.clone(),
    };
    let mut context = context.trim().to_owned();
    if context.len() > 80 {
        let mut cut = 80;
        while !context.is_char_boundary(cut) {
            cut -= 1;
        }
        context.truncate(cut);
        context.push('…');
    }
    ParseError {
        message,
        line: error.location.line,
        column: error.location.column,
        context,
    }
}

/// Raw at-rule prelude: the keyword (without `@`, original case) and the
/// comment-stripped prelude text.
struct AtPrelude {
    name: String,
    raw: String,
}

/// Parses rule lists: the stylesheet top level and the bodies of
/// `@media`/`@supports`/`@document`/`@host`. Produces `None` for nodes
/// dropped by `preserve_static`.
struct RuleListParser<'opts> {
    options: &'opts ParseOptions,
}

impl RuleListParser<'_> {
    fn keep(&self, node: CssNode) -> Option<CssNode> {
        if self.options.preserve_static {
            return Some(node);
        }
        let keep = match &node {
            CssNode::Rule(rule) => {
                rule.declarations.iter().any(Declaration::uses_var)
                    || (rule.is_root_scope()
                        && rule.declarations.iter().any(Declaration::is_custom_property))
            }
            CssNode::Other { prelude, block, .. } => {
                prelude.contains("var(")
                    || block.as_ref().is_some_and(|body| body.contains("var("))
            }
            other => other.has_var_usage(),
        };
        keep.then_some(node)
    }
}

fn capture_raw<'i>(input: &mut Parser<'i, '_>) -> &'i str {
    let start = input.state();
    while input.next_including_whitespace_and_comments().is_ok() {}
    input.slice_from(start.position())
}

fn margin_box_name(name: &str) -> Option<String> {
    let mut parts = name.split('-');
    let edge = parts.next()?;
    let align = parts.next()?;
    let corner = parts.next();
    if parts.next().is_some() {
        return None;
    }
    let edge_ok = matches!(edge, "top" | "bottom" | "left" | "right");
    let align_ok = matches!(
        align,
        "left" | "center" | "right" | "top" | "middle" | "bottom"
    );
    let corner_ok = corner.is_none_or(|last| last == "corner");
    (edge_ok && align_ok && corner_ok).then(|| name.to_owned())
}

/// Split a vendor prefix off an at-keyword, e.g. `-webkit-keyframes` →
/// `Some("-webkit-")` for suffix `keyframes`.
fn vendor_prefix(name: &str, suffix: &str) -> Option<Option<String>> {
    if name == suffix {
        return Some(None);
    }
    name.strip_suffix(suffix)
        .filter(|prefix| prefix.starts_with('-') && prefix.ends_with('-'))
        .map(|prefix| Some(prefix.to_owned()))
}

impl<'i> CssAtRuleParser<'i> for RuleListParser<'_> {
    type Prelude = AtPrelude;
    type AtRule = Option<CssNode>;
    type Error = ParserError;

    fn parse_prelude<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, CssParseError<'i, Self::Error>> {
        let raw = scan::strip_comments(capture_raw(input));
        Ok(AtPrelude {
            name: name.as_ref().to_owned(),
            raw: raw.trim().to_owned(),
        })
    }

    fn rule_without_block(
        &mut self,
        prelude: Self::Prelude,
        _state: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        let lower = prelude.name.to_ascii_lowercase();
        let node = match lower.as_str() {
            "import" => CssNode::Import {
                prelude: prelude.raw,
            },
            "charset" => CssNode::Charset {
                prelude: prelude.raw,
            },
            "namespace" => CssNode::Namespace {
                prelude: prelude.raw,
            },
            "custom-media" => {
                let (name, media) = prelude
                    .raw
                    .split_once(char::is_whitespace)
                    .unwrap_or((prelude.raw.as_str(), ""));
                CssNode::CustomMedia {
                    name: name.trim().to_owned(),
                    media: media.trim().to_owned(),
                }
            }
            _ => CssNode::Other {
                name: prelude.name,
                prelude: prelude.raw,
                block: None,
            },
        };
        Ok(self.keep(node))
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, CssParseError<'i, Self::Error>> {
        let lower = prelude.name.to_ascii_lowercase();

        let node = if let Some(vendor) = vendor_prefix(&lower, "keyframes") {
            let name = prelude.raw;
            if name.is_empty() {
                return Err(input.new_custom_error("@keyframes missing name".to_owned()));
            }
            CssNode::Keyframes {
                vendor,
                name,
                frames: parse_keyframe_list(input)?,
            }
        } else if let Some(vendor) = vendor_prefix(&lower, "document") {
            CssNode::Document {
                vendor,
                condition: prelude.raw,
                rules: parse_rule_list(input, self.options)?,
            }
        } else {
            match lower.as_str() {
                "media" => CssNode::Media {
                    condition: prelude.raw,
                    rules: parse_rule_list(input, self.options)?,
                },
                "supports" => CssNode::Supports {
                    condition: prelude.raw,
                    rules: parse_rule_list(input, self.options)?,
                },
                "host" => CssNode::Host {
                    rules: parse_rule_list(input, self.options)?,
                },
                "font-face" => CssNode::FontFace {
                    declarations: parse_declaration_list(input)?,
                },
                "page" => CssNode::Page {
                    selectors: scan::split_top_level_commas(&prelude.raw),
                    declarations: parse_declaration_list(input)?,
                },
                _ => {
                    if let Some(name) = margin_box_name(&lower) {
                        CssNode::PageMarginBox {
                            name,
                            declarations: parse_declaration_list(input)?,
                        }
                    } else {
                        // Unknown at-rule: keep the block opaque.
                        CssNode::Other {
                            name: prelude.name,
                            prelude: prelude.raw,
                            block: Some(capture_raw(input).trim().to_owned()),
                        }
                    }
                }
            }
        };
        Ok(self.keep(node))
    }
}

impl<'i> CssQualifiedRuleParser<'i> for RuleListParser<'_> {
    type Prelude = Vec<String>;
    type QualifiedRule = Option<CssNode>;
    type Error = ParserError;

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, CssParseError<'i, Self::Error>> {
        let raw = scan::strip_comments(capture_raw(input));
        let selectors = scan::split_top_level_commas(&raw);
        if selectors.is_empty() {
            return Err(input.new_custom_error("selector missing".to_owned()));
        }
        Ok(selectors)
    }

    fn parse_block<'t>(
        &mut self,
        selectors: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, CssParseError<'i, Self::Error>> {
        let declarations = parse_declaration_list(input)?;
        Ok(self.keep(CssNode::Rule(Rule {
            selectors,
            declarations,
        })))
    }
}

impl<'i> cssparser::DeclarationParser<'i> for RuleListParser<'_> {
    type Declaration = Option<CssNode>;
    type Error = ParserError;

    fn parse_value<'t>(
        &mut self,
        _name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _decl_start: &ParserState,
    ) -> Result<Self::Declaration, CssParseError<'i, Self::Error>> {
        // Declarations are not valid directly inside a rule list.
        Err(input.new_error(BasicParseErrorKind::UnexpectedToken(
            cssparser::Token::Semicolon,
        )))
    }
}

impl<'i> CssRuleBodyItemParser<'i, Option<CssNode>, ParserError> for RuleListParser<'_> {
    fn parse_declarations(&self) -> bool {
        false
    }
    fn parse_qualified(&self) -> bool {
        true
    }
}

fn parse_rule_list<'i>(
    input: &mut Parser<'i, '_>,
    options: &ParseOptions,
) -> Result<Vec<CssNode>, CssParseError<'i, ParserError>> {
    let mut nested = RuleListParser { options };
    let mut rules = Vec::new();
    for item in CssRuleBodyParser::new(input, &mut nested) {
        match item {
            Ok(Some(node)) => rules.push(node),
            Ok(None) => {}
            Err((error, _slice)) => return Err(error),
        }
    }
    Ok(rules)
}

/// Parses `property: value;` lists inside rule blocks, `@font-face`,
/// `@page` and page-margin boxes.
struct DeclListParser;

impl<'i> cssparser::DeclarationParser<'i> for DeclListParser {
    type Declaration = Declaration;
    type Error = ParserError;

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _decl_start: &ParserState,
    ) -> Result<Self::Declaration, CssParseError<'i, Self::Error>> {
        let start = input.position();
        while input.next_including_whitespace_and_comments().is_ok() {}
        let raw = input.slice_from(start);
        // Custom property names are case-sensitive; everything else is not.
        let property = if name.starts_with("--") {
            name.as_ref().to_owned()
        } else {
            name.to_ascii_lowercase()
        };
        Ok(Declaration {
            property,
            value: scan::strip_comments(raw).trim().to_owned(),
        })
    }
}

impl<'i> CssAtRuleParser<'i> for DeclListParser {
    type Prelude = ();
    type AtRule = Declaration; // Not produced
    type Error = ParserError;

    fn parse_prelude<'t>(
        &mut self,
        _name: CowRcStr<'i>,
        _input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, CssParseError<'i, Self::Error>> {
        Ok(())
    }

    fn parse_block<'t>(
        &mut self,
        _prelude: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, CssParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::AtRuleBodyInvalid))
    }

    fn rule_without_block(
        &mut self,
        _prelude: Self::Prelude,
        _state: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        Err(())
    }
}

impl<'i> CssQualifiedRuleParser<'i> for DeclListParser {
    type Prelude = ();
    type QualifiedRule = Declaration; // Not produced
    type Error = ParserError;

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, CssParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::QualifiedRuleInvalid))
    }

    fn parse_block<'t>(
        &mut self,
        _prelude: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, CssParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::QualifiedRuleInvalid))
    }
}

impl<'i> CssRuleBodyItemParser<'i, Declaration, ParserError> for DeclListParser {
    fn parse_declarations(&self) -> bool {
        true
    }
    fn parse_qualified(&self) -> bool {
        false
    }
}

fn parse_declaration_list<'i>(
    input: &mut Parser<'i, '_>,
) -> Result<Vec<Declaration>, CssParseError<'i, ParserError>> {
    let mut body = DeclListParser;
    let mut declarations = Vec::new();
    for item in CssRuleBodyParser::new(input, &mut body) {
        match item {
            Ok(declaration) => declarations.push(declaration),
            Err((error, _slice)) => return Err(error),
        }
    }
    Ok(declarations)
}

/// Parses the body of `@keyframes`: frame selector lists plus declaration
/// blocks.
struct KeyframeListParser;

impl<'i> CssQualifiedRuleParser<'i> for KeyframeListParser {
    type Prelude = Vec<String>;
    type QualifiedRule = Keyframe;
    type Error = ParserError;

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, CssParseError<'i, Self::Error>> {
        let raw = scan::strip_comments(capture_raw(input));
        let values = scan::split_top_level_commas(&raw);
        if values.is_empty() {
            return Err(input.new_custom_error("keyframe selector missing".to_owned()));
        }
        Ok(values)
    }

    fn parse_block<'t>(
        &mut self,
        values: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, CssParseError<'i, Self::Error>> {
        Ok(Keyframe {
            values,
            declarations: parse_declaration_list(input)?,
        })
    }
}

impl<'i> CssAtRuleParser<'i> for KeyframeListParser {
    type Prelude = ();
    type AtRule = Keyframe; // Not produced
    type Error = ParserError;

    fn parse_prelude<'t>(
        &mut self,
        _name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, CssParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::AtRuleBodyInvalid))
    }

    fn parse_block<'t>(
        &mut self,
        _prelude: Self::Prelude,
        _state: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, CssParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::AtRuleBodyInvalid))
    }

    fn rule_without_block(
        &mut self,
        _prelude: Self::Prelude,
        _state: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        Err(())
    }
}

impl<'i> cssparser::DeclarationParser<'i> for KeyframeListParser {
    type Declaration = Keyframe;
    type Error = ParserError;

    fn parse_value<'t>(
        &mut self,
        _name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _decl_start: &ParserState,
    ) -> Result<Self::Declaration, CssParseError<'i, Self::Error>> {
        Err(input.new_error(BasicParseErrorKind::UnexpectedToken(
            cssparser::Token::Semicolon,
        )))
    }
}

impl<'i> CssRuleBodyItemParser<'i, Keyframe, ParserError> for KeyframeListParser {
    fn parse_declarations(&self) -> bool {
        false
    }
    fn parse_qualified(&self) -> bool {
        true
    }
}

fn parse_keyframe_list<'i>(
    input: &mut Parser<'i, '_>,
) -> Result<Vec<Keyframe>, CssParseError<'i, ParserError>> {
    let mut body = KeyframeListParser;
    let mut frames = Vec::new();
    for item in CssRuleBodyParser::new(input, &mut body) {
        match item {
            Ok(frame) => frames.push(frame),
            Err((error, _slice)) => return Err(error),
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(css: &str) -> Stylesheet {
        parse_stylesheet(css, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn plain_rule() {
        let sheet = parse("p , a.link { color : red ; margin:0 }");
        assert_eq!(sheet.nodes.len(), 1);
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.selectors, vec!["p", "a.link"]);
        assert_eq!(
            rule.declarations,
            vec![
                Declaration {
                    property: "color".into(),
                    value: "red".into()
                },
                Declaration {
                    property: "margin".into(),
                    value: "0".into()
                },
            ]
        );
    }

    #[test]
    fn custom_property_case_preserved() {
        let sheet = parse(":root { --Theme-Color: Red; COLOR: blue }");
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.declarations[0].property, "--Theme-Color");
        assert_eq!(rule.declarations[1].property, "color");
    }

    #[test]
    fn media_nests_rules() {
        let sheet = parse("@media screen and (min-width: 100px) { p { color: var(--x) } }");
        let CssNode::Media { condition, rules } = &sheet.nodes[0] else {
            panic!("expected media");
        };
        assert_eq!(condition, "screen and (min-width: 100px)");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn keyframes_with_vendor_prefix() {
        let sheet = parse("@-webkit-keyframes spin { from { left: 0 } 50%,75% { left: 10px } }");
        let CssNode::Keyframes {
            vendor,
            name,
            frames,
        } = &sheet.nodes[0]
        else {
            panic!("expected keyframes");
        };
        assert_eq!(vendor.as_deref(), Some("-webkit-"));
        assert_eq!(name, "spin");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].values, vec!["50%", "75%"]);
    }

    #[test]
    fn statement_at_rules() {
        let sheet = parse("@charset \"utf-8\";@import url(\"a.css\") screen;@namespace svg url(x);");
        assert!(matches!(&sheet.nodes[0], CssNode::Charset { prelude } if prelude == "\"utf-8\""));
        assert!(
            matches!(&sheet.nodes[1], CssNode::Import { prelude } if prelude == "url(\"a.css\") screen")
        );
        assert!(matches!(&sheet.nodes[2], CssNode::Namespace { .. }));
    }

    #[test]
    fn page_and_margin_boxes() {
        let sheet = parse("@page :first { margin: 1cm }@top-left-corner { content: \"x\" }");
        assert!(
            matches!(&sheet.nodes[0], CssNode::Page { selectors, .. } if selectors == &vec![":first".to_owned()])
        );
        assert!(
            matches!(&sheet.nodes[1], CssNode::PageMarginBox { name, .. } if name == "top-left-corner")
        );
    }

    #[test]
    fn unknown_at_rule_preserved_opaquely() {
        let sheet = parse("@layer base { p { color: red } }");
        let CssNode::Other {
            name,
            prelude,
            block,
        } = &sheet.nodes[0]
        else {
            panic!("expected opaque at-rule");
        };
        assert_eq!(name, "layer");
        assert_eq!(prelude, "base");
        assert_eq!(block.as_deref(), Some("p { color: red }"));
    }

    #[test]
    fn selector_commas_inside_quotes_survive() {
        let sheet = parse("a[title=\"x,y\"], b { color: red }");
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.selectors, vec!["a[title=\"x,y\"]", "b"]);
    }

    #[test]
    fn comments_are_stripped_from_values() {
        let sheet = parse("p { color: /* inline */ red }");
        let CssNode::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.declarations[0].value, "red");
    }

    #[test]
    fn preserve_static_false_drops_static_rules() {
        let options = ParseOptions {
            preserve_static: false,
        };
        let sheet = parse_stylesheet(
            ":root { --x: red } p { color: var(--x) } q { color: blue } @media all { r { margin: 0 } }",
            &options,
        )
        .unwrap();
        assert_eq!(sheet.nodes.len(), 2);
        assert!(matches!(&sheet.nodes[0], CssNode::Rule(rule) if rule.is_root_scope()));
        assert!(
            matches!(&sheet.nodes[1], CssNode::Rule(rule) if rule.declarations[0].uses_var())
        );
    }

    #[test]
    fn parse_error_reports_context() {
        let error = parse_stylesheet("p { color red }", &ParseOptions::default()).unwrap_err();
        assert!(!error.message.is_empty());
        assert!(error.context.contains("color"));
    }
}
