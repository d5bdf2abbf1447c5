//! End-to-end passes over an in-memory document with a stubbed fetcher.

use css_ponyfill::{CssVars, Dom, FetchError, FetchText, Hooks, NodeId, Options};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

struct StubFetcher(HashMap<String, String>);

impl StubFetcher {
    fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self(
            pages
                .iter()
                .map(|(url, text)| ((*url).to_owned(), (*text).to_owned()))
                .collect(),
        ))
    }
}

impl FetchText for StubFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            self.0
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: url.clone(),
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        })
    }
}

fn logger() {
    drop(env_logger::builder().is_test(true).try_init());
}

fn new_dom() -> Arc<Mutex<Dom>> {
    Arc::new(Mutex::new(Dom::new(
        Url::parse("https://example.com/").unwrap(),
    )))
}

async fn add_style(dom: &Mutex<Dom>, css: &str) -> NodeId {
    let mut dom = dom.lock().await;
    let root = dom.root();
    let style = dom.create_element(root, "style");
    dom.set_text_content(style, css);
    style
}

async fn add_link(dom: &Mutex<Dom>, href: &str) -> NodeId {
    let mut dom = dom.lock().await;
    let root = dom.root();
    let link = dom.create_element(root, "link");
    dom.set_attr(link, "rel", "stylesheet");
    dom.set_attr(link, "href", href);
    link
}

#[tokio::test]
async fn inline_style_resolves_into_output_element() {
    logger();
    let dom = new_dom();
    let style = add_style(&dom, ":root { --color: red; } p { color: var(--color); }").await;

    let engine = CssVars::with_fetcher(
        dom.clone(),
        Options::default(),
        Hooks::default(),
        StubFetcher::new(&[]),
    );
    let outcome = engine.run().await;

    assert!(outcome.changed);
    assert!(!outcome.native);
    assert_eq!(outcome.css_text, "p{color:red;}");
    assert_eq!(outcome.variables.get("--color").map(String::as_str), Some("red"));

    let dom = dom.lock().await;
    assert_eq!(dom.attr(style, "data-cssvars"), Some("src"));
    let out = outcome.out_nodes[0];
    assert_eq!(dom.attr(out, "data-cssvars"), Some("out"));
    assert_eq!(
        dom.attr(out, "data-cssvars-group"),
        dom.attr(style, "data-cssvars-group")
    );
    assert_eq!(dom.text_content(out), "p{color:red;}");
}

#[tokio::test]
async fn user_overrides_beat_document_values() {
    logger();
    let dom = new_dom();
    add_style(&dom, ":root { --color: red; } p { color: var(--color); }").await;

    let options = Options {
        // Unprefixed names are normalized before lookup.
        variables: HashMap::from([("color".to_owned(), "blue".to_owned())]),
        ..Options::default()
    };
    let engine = CssVars::with_fetcher(
        dom.clone(),
        options,
        Hooks::default(),
        StubFetcher::new(&[]),
    );
    let outcome = engine.run().await;
    assert_eq!(outcome.css_text, "p{color:blue;}");
}

#[tokio::test]
async fn second_pass_writes_nothing() {
    logger();
    let dom = new_dom();
    add_style(&dom, ":root { --color: red; } p { color: var(--color); }").await;

    let engine = CssVars::with_fetcher(
        dom.clone(),
        Options::default(),
        Hooks::default(),
        StubFetcher::new(&[]),
    );
    let first = engine.run().await;
    assert!(first.changed);

    let mut updates = { dom.lock().await.updates() };
    let second = engine.run().await;
    assert!(!second.changed);
    assert!(second.source_nodes.is_empty());
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn imports_resolve_against_each_stylesheets_url() {
    logger();
    let dom = new_dom();
    add_link(&dom, "css/main.css").await;

    let fetcher = StubFetcher::new(&[
        (
            "https://example.com/css/main.css",
            "@import url(deep/extra.css);\np { color: var(--p, green); }",
        ),
        (
            "https://example.com/css/deep/extra.css",
            ":root { --p: purple; }\na { background: url(icon.png); }",
        ),
    ]);
    let engine = CssVars::with_fetcher(dom.clone(), Options::default(), Hooks::default(), fetcher);
    let outcome = engine.run().await;

    assert_eq!(
        outcome.css_text,
        "a{background:url(https://example.com/css/deep/icon.png);}p{color:purple;}"
    );
}

#[tokio::test]
async fn import_cycles_terminate() {
    logger();
    let dom = new_dom();
    add_link(&dom, "a.css").await;

    let fetcher = StubFetcher::new(&[
        (
            "https://example.com/a.css",
            "@import url(b.css); .a { width: var(--w, 1px); }",
        ),
        (
            "https://example.com/b.css",
            "@import url(a.css); .b { width: var(--w, 2px); }",
        ),
    ]);
    let engine = CssVars::with_fetcher(dom.clone(), Options::default(), Hooks::default(), fetcher);
    let outcome = engine.run().await;
    assert_eq!(outcome.css_text, ".b{width:2px;}.a{width:1px;}");
}

#[tokio::test]
async fn failed_source_reports_and_pass_continues() {
    logger();
    let dom = new_dom();
    add_link(&dom, "missing.css").await;
    add_link(&dom, "good.css").await;

    let errors: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let hooks = Hooks {
        on_error: Some(Box::new({
            let errors = errors.clone();
            move |message, _, _| errors.lock().unwrap().push(message.to_owned())
        })),
        ..Hooks::default()
    };
    let fetcher = StubFetcher::new(&[(
        "https://example.com/good.css",
        "q { margin: var(--m, 4px); }",
    )]);
    let engine = CssVars::with_fetcher(dom.clone(), Options::default(), hooks, fetcher);
    let outcome = engine.run().await;

    assert_eq!(outcome.css_text, "q{margin:4px;}");
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("missing.css"));
    assert!(errors[0].contains("404"));
}

#[tokio::test]
async fn changed_variables_rerun_previously_processed_sources() {
    logger();
    let dom = new_dom();
    let first_style = add_style(&dom, "p { color: var(--c, black); }").await;

    let engine = CssVars::with_fetcher(
        dom.clone(),
        Options::default(),
        Hooks::default(),
        StubFetcher::new(&[]),
    );
    let first = engine.run().await;
    assert_eq!(first.css_text, "p{color:black;}");
    let out = first.out_nodes[0];

    // A later stylesheet changes the variable the first one fell back on.
    let second_style = add_style(&dom, ":root { --c: white; }").await;
    let second = engine.run().await;

    assert_eq!(second.variables.get("--c").map(String::as_str), Some("white"));
    let dom = dom.lock().await;
    assert_eq!(dom.text_content(out), "p{color:white;}");
    assert_eq!(dom.attr(first_style, "data-cssvars"), Some("src"));
    // The variable-only stylesheet produces no output of its own.
    assert_eq!(dom.attr(second_style, "data-cssvars"), Some("skip"));
}

#[tokio::test]
async fn resolver_warnings_reach_the_hook() {
    logger();
    let dom = new_dom();
    add_style(&dom, "p { color: var(--missing); }").await;

    let warnings: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let hooks = Hooks {
        on_warning: Some(Box::new({
            let warnings = warnings.clone();
            move |warning| warnings.lock().unwrap().push(warning.to_string())
        })),
        ..Hooks::default()
    };
    let engine = CssVars::with_fetcher(
        dom.clone(),
        Options::default(),
        hooks,
        StubFetcher::new(&[]),
    );
    let outcome = engine.run().await;

    // The unresolved reference stays in place as a marker, so the output
    // adds nothing over the source and no output element is installed.
    assert_eq!(outcome.css_text, "p{color:var(--missing);}");
    assert!(outcome.out_nodes.is_empty());
    assert_eq!(
        warnings.lock().unwrap().as_slice(),
        ["variable \"--missing\" is undefined"]
    );
}

#[tokio::test]
async fn shadow_roots_get_their_own_pass() {
    logger();
    let dom = new_dom();
    add_style(&dom, ":root { --accent: coral; }").await;
    let shadow_style = {
        let mut dom = dom.lock().await;
        let root = dom.root();
        let host = dom.create_element(root, "x-card");
        let shadow = dom.attach_shadow(host);
        let style = dom.create_element(shadow, "style");
        dom.set_text_content(
            style,
            ":host { --pad: 2em; } span { margin: var(--pad); color: var(--accent); }",
        );
        style
    };

    let options = Options {
        shadow_dom: true,
        ..Options::default()
    };
    let engine = CssVars::with_fetcher(
        dom.clone(),
        options,
        Hooks::default(),
        StubFetcher::new(&[]),
    );
    let outcome = engine.run().await;
    assert!(outcome.css_text.contains("span{margin:2em;color:coral;}"));

    let dom = dom.lock().await;
    assert_eq!(dom.attr(shadow_style, "data-cssvars"), Some("src"));
}
