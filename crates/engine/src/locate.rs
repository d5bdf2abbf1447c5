//! Source discovery: which elements under the root contribute CSS.

use crate::sync::ATTR_STATE;
use ponyfill_dom::{Dom, NodeId, SelectorList};
use url::Url;

/// Where a pass is relative to this source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingState {
    Unprocessed,
    Fetched,
    Parsed,
    Resolved,
    Applied,
    Skipped,
    Errored,
}

/// How the source's text is obtained.
#[derive(Clone, Debug)]
pub enum SourceKind {
    /// A `style` element; text is its content.
    Inline,
    /// A `link rel=stylesheet`; text is fetched from `href`.
    Linked { href: String },
}

/// One discovered CSS source. Rebuilt every pass; the only state carried
/// between passes lives in `data-cssvars*` attributes on the DOM.
#[derive(Clone, Debug)]
pub struct StyleSource {
    pub node: NodeId,
    pub kind: SourceKind,
    /// Base for resolving relative references: the document URL for inline
    /// sources, the stylesheet's own URL once a linked source is fetched.
    pub base_url: Url,
    pub raw_text: String,
    pub state: ProcessingState,
}

/// Discover sources under `root` in document order. Managed output nodes
/// and (by default) disabled sources are never candidates.
pub fn locate(
    dom: &Dom,
    root: NodeId,
    include: &SelectorList,
    exclude: &SelectorList,
    skip_disabled: bool,
) -> Vec<StyleSource> {
    let mut out = Vec::new();
    for node in dom.elements_in(root) {
        if !include.matches(dom, node) {
            continue;
        }
        if !exclude.is_empty() && exclude.matches(dom, node) {
            continue;
        }
        if dom.attr(node, ATTR_STATE) == Some("out") {
            continue;
        }
        if skip_disabled && dom.attr(node, "disabled").is_some() {
            continue;
        }
        match dom.tag(node) {
            Some("style") => out.push(StyleSource {
                node,
                kind: SourceKind::Inline,
                base_url: dom.url().clone(),
                raw_text: dom.text_content(node),
                state: ProcessingState::Unprocessed,
            }),
            Some("link") => {
                let linked = dom.attr(node, "rel").is_some_and(|rel| {
                    rel.split_whitespace()
                        .any(|part| part.eq_ignore_ascii_case("stylesheet"))
                });
                let href = dom.attr(node, "href").unwrap_or("");
                if !linked || href.is_empty() {
                    continue;
                }
                out.push(StyleSource {
                    node,
                    kind: SourceKind::Linked {
                        href: href.to_owned(),
                    },
                    base_url: dom.url().clone(),
                    raw_text: String::new(),
                    state: ProcessingState::Unprocessed,
                });
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dom() -> Dom {
        Dom::new(Url::parse("https://example.com/").unwrap())
    }

    fn defaults() -> (SelectorList, SelectorList) {
        (
            SelectorList::parse("style,link[rel=stylesheet]"),
            SelectorList::parse(""),
        )
    }

    #[test]
    fn finds_styles_and_stylesheet_links_in_order() {
        let mut dom = dom();
        let root = dom.root();
        let head = dom.create_element(root, "head");
        let link = dom.create_element(head, "link");
        dom.set_attr(link, "rel", "stylesheet");
        dom.set_attr(link, "href", "site.css");
        let preload = dom.create_element(head, "link");
        dom.set_attr(preload, "rel", "preload");
        dom.set_attr(preload, "href", "font.woff2");
        let style = dom.create_element(head, "style");
        dom.set_text_content(style, "p { color: red }");

        let (include, exclude) = defaults();
        let sources = locate(&dom, root, &include, &exclude, true);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].node, link);
        assert!(matches!(&sources[0].kind, SourceKind::Linked { href } if href == "site.css"));
        assert_eq!(sources[1].node, style);
        assert_eq!(sources[1].raw_text, "p { color: red }");
    }

    #[test]
    fn skips_disabled_and_output_nodes() {
        let mut dom = dom();
        let root = dom.root();
        let disabled = dom.create_element(root, "style");
        dom.set_attr(disabled, "disabled", "");
        let managed = dom.create_element(root, "style");
        dom.set_attr(managed, ATTR_STATE, "out");

        let (include, exclude) = defaults();
        assert!(locate(&dom, root, &include, &exclude, true).is_empty());
        let sources = locate(&dom, root, &include, &exclude, false);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].node, disabled);
    }

    #[test]
    fn exclude_list_removes_candidates() {
        let mut dom = dom();
        let root = dom.root();
        let style = dom.create_element(root, "style");
        dom.set_attr(style, "id", "theme");
        let other = dom.create_element(root, "style");

        let include = SelectorList::parse("style");
        let exclude = SelectorList::parse("#theme");
        let sources = locate(&dom, root, &include, &exclude, true);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].node, other);
    }
}
