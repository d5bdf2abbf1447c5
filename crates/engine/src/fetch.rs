//! Stylesheet text acquisition: HTTP/file fetching, `@import` inlining
//! and `url()` absolutization.
//!
//! All sources of a pass are loaded concurrently, one task per source, and
//! joined into a buffer that preserves document order. Failures never abort
//! the pass: a failed source or import contributes empty text and is
//! reported through the error hook.

use crate::error::FetchError;
use crate::locate::{ProcessingState, SourceKind, StyleSource};
use crate::options::Hooks;
use futures::future::{BoxFuture, join_all};
use ponyfill_dom::NodeId;
use ponyfill_syntax::scan;
use std::collections::HashSet;
use url::Url;

/// Capability to fetch stylesheet text by URL.
pub trait FetchText: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// Default fetcher: `http(s)` via reqwest, `file` via the filesystem.
/// Non-success statuses are errors.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FetchText for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            match url.scheme() {
                "http" | "https" => {
                    let response =
                        self.client
                            .get(url.clone())
                            .send()
                            .await
                            .map_err(|source| FetchError::Request {
                                url: url.clone(),
                                source,
                            })?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(FetchError::Status {
                            url: url.clone(),
                            status,
                        });
                    }
                    response.text().await.map_err(|source| FetchError::Request {
                        url: url.clone(),
                        source,
                    })
                }
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|()| FetchError::Scheme { url: url.clone() })?;
                    tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|source| FetchError::File {
                            url: url.clone(),
                            source,
                        })
                }
                _ => Err(FetchError::Scheme { url: url.clone() }),
            }
        })
    }
}

struct Loaded {
    text: String,
    state: ProcessingState,
    resolved: Option<Url>,
}

/// Per-pass loader. Borrowed state only; the collector itself is rebuilt
/// each pass.
pub(crate) struct Collector<'a> {
    pub fetcher: &'a dyn FetchText,
    pub hooks: &'a Hooks,
    pub update_urls: bool,
    pub silent: bool,
}

impl Collector<'_> {
    /// Fill `raw_text` for every source. Linked sources fetch concurrently;
    /// the join completes only after every fetch settles.
    pub async fn collect(&self, sources: &mut [StyleSource]) {
        let jobs: Vec<_> = sources.iter().map(|source| self.load(source)).collect();
        let results = join_all(jobs).await;
        for (source, loaded) in sources.iter_mut().zip(results) {
            source.raw_text = loaded.text;
            source.state = loaded.state;
            if let Some(url) = loaded.resolved {
                source.base_url = url;
            }
        }
    }

    async fn load(&self, source: &StyleSource) -> Loaded {
        match &source.kind {
            SourceKind::Inline => {
                let mut seen = HashSet::new();
                let text = self
                    .inline_imports(
                        source.raw_text.clone(),
                        source.base_url.clone(),
                        &mut seen,
                        source.node,
                    )
                    .await;
                Loaded {
                    text,
                    state: ProcessingState::Fetched,
                    resolved: None,
                }
            }
            SourceKind::Linked { href } => self.load_linked(source, href).await,
        }
    }

    async fn load_linked(&self, source: &StyleSource, href: &str) -> Loaded {
        let mut url = match source.base_url.join(href) {
            Ok(url) => url,
            Err(error) => {
                self.report(
                    &FetchError::Href {
                        href: href.to_owned(),
                        source: error,
                    },
                    source.node,
                    None,
                );
                return Loaded {
                    text: String::new(),
                    state: ProcessingState::Errored,
                    resolved: None,
                };
            }
        };
        if let Some(callback) = &self.hooks.on_before_send {
            callback(&mut url, source.node);
        }
        match self.fetcher.fetch(&url).await {
            Ok(text) => {
                let text = match &self.hooks.on_success {
                    Some(callback) => callback(&text, source.node, &url).unwrap_or(text),
                    None => text,
                };
                if text.is_empty() {
                    return Loaded {
                        text,
                        state: ProcessingState::Skipped,
                        resolved: Some(url),
                    };
                }
                let text = if self.update_urls {
                    rewrite_urls(&text, &url)
                } else {
                    text
                };
                let mut seen = HashSet::new();
                seen.insert(url.clone());
                let text = self
                    .inline_imports(text, url.clone(), &mut seen, source.node)
                    .await;
                Loaded {
                    text,
                    state: ProcessingState::Fetched,
                    resolved: Some(url),
                }
            }
            Err(error) => {
                self.report(&error, source.node, Some(&url));
                Loaded {
                    text: String::new(),
                    state: ProcessingState::Errored,
                    resolved: Some(url),
                }
            }
        }
    }

    /// Replace each `@import` statement with the fetched target text,
    /// resolved against the importing stylesheet's URL. Iterates until no
    /// unseen import remains; `seen` breaks import cycles (a repeated
    /// target splices to empty). Imports inside comments or strings are
    /// left alone.
    fn inline_imports<'s>(
        &'s self,
        text: String,
        base: Url,
        seen: &'s mut HashSet<Url>,
        node: NodeId,
    ) -> BoxFuture<'s, String> {
        Box::pin(async move {
            let mut out = String::new();
            let mut rest = text.as_str();
            while let Some(import) = find_import(rest) {
                out.push_str(&rest[..import.start]);
                let tail = &rest[import.end..];
                match base.join(&import.target) {
                    Ok(target) if !seen.contains(&target) => {
                        seen.insert(target.clone());
                        let mut url = target;
                        if let Some(callback) = &self.hooks.on_before_send {
                            callback(&mut url, node);
                        }
                        match self.fetcher.fetch(&url).await {
                            Ok(fetched) => {
                                let fetched = match &self.hooks.on_success {
                                    Some(callback) => {
                                        callback(&fetched, node, &url).unwrap_or(fetched)
                                    }
                                    None => fetched,
                                };
                                let fetched = if self.update_urls {
                                    rewrite_urls(&fetched, &url)
                                } else {
                                    fetched
                                };
                                let expanded =
                                    self.inline_imports(fetched, url, &mut *seen, node).await;
                                out.push_str(&expanded);
                            }
                            Err(error) => self.report(&error, node, Some(&url)),
                        }
                    }
                    Ok(_) => {}
                    Err(error) => self.report(
                        &FetchError::Href {
                            href: import.target.clone(),
                            source: error,
                        },
                        node,
                        None,
                    ),
                }
                rest = tail;
            }
            out.push_str(rest);
            out
        })
    }

    fn report(&self, error: &FetchError, node: NodeId, url: Option<&Url>) {
        if !self.silent {
            log::error!("{error}");
        }
        if let Some(callback) = &self.hooks.on_error {
            callback(&error.to_string(), Some(node), url);
        }
    }
}

struct ImportStatement {
    start: usize,
    end: usize,
    target: String,
}

/// First `@import` statement outside comments and strings, spanning up to
/// and including its terminating semicolon.
fn find_import(text: &str) -> Option<ImportStatement> {
    let start = find_token(text, "@import")?;
    let end = start + text[start..].find(';')? + 1;
    let prelude = &text[start + "@import".len()..end - 1];
    Some(ImportStatement {
        start,
        end,
        target: import_target(prelude),
    })
}

fn import_target(prelude: &str) -> String {
    let text = scan::strip_comments(prelude);
    let text = text.trim();
    if text.starts_with("url")
        && let Some(span) = scan::find_balanced(text, '(', ')')
    {
        return strip_quotes(span.body(text)).to_owned();
    }
    if text.starts_with('"') || text.starts_with('\'') {
        return strip_quotes(text.split_whitespace().next().unwrap_or("")).to_owned();
    }
    text.split_whitespace().next().unwrap_or("").to_owned()
}

fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted { &text[1..text.len() - 1] } else { text }
}

/// Find `needle` outside comments and strings, not preceded by an
/// identifier character.
fn find_token(text: &str, needle: &str) -> Option<usize> {
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
                idx += 1;
            }
            None => {
                if byte == b'"' || byte == b'\'' {
                    quote = Some(byte);
                    idx += 1;
                } else if byte == b'/' && bytes.get(idx + 1) == Some(&b'*') {
                    match text[idx + 2..].find("*/") {
                        Some(close) => idx += 2 + close + 2,
                        None => return None,
                    }
                } else if text[idx..].starts_with(needle) && !ident_boundary(bytes, idx) {
                    return Some(idx);
                } else {
                    idx += 1;
                }
            }
        }
    }
    None
}

fn ident_boundary(bytes: &[u8], idx: usize) -> bool {
    idx > 0
        && (bytes[idx - 1].is_ascii_alphanumeric() || bytes[idx - 1] == b'-' || bytes[idx - 1] == b'_')
}

/// Absolutize relative `url(...)` references against `base`, preserving
/// the original quoting. Fragment-only, `data:`, scheme-qualified and
/// protocol-relative targets are left alone.
pub(crate) fn rewrite_urls(text: &str, base: &Url) -> String {
    let mut out = String::new();
    let mut rest = text;
    while let Some(pos) = find_token(rest, "url(") {
        let open = pos + 3;
        let Some(span) = scan::find_balanced(&rest[open..], '(', ')') else {
            break;
        };
        let body_start = open + 1;
        let body_end = open + span.close;
        let body = &rest[body_start..body_end];
        let target = strip_quotes(body);
        let quote = body.trim().chars().next().filter(|ch| *ch == '"' || *ch == '\'');
        out.push_str(&rest[..body_start]);
        match base.join(target) {
            Ok(absolute) if is_relative(target) => {
                if let Some(quote) = quote {
                    out.push(quote);
                    out.push_str(absolute.as_str());
                    out.push(quote);
                } else {
                    out.push_str(absolute.as_str());
                }
            }
            _ => out.push_str(body),
        }
        out.push(')');
        rest = &rest[body_end + 1..];
    }
    out.push_str(rest);
    out
}

fn is_relative(target: &str) -> bool {
    if target.is_empty() || target.starts_with('#') || target.starts_with("//") {
        return false;
    }
    match target.find([':', '/', '?', '#']) {
        Some(idx) => target.as_bytes()[idx] != b':',
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/css/site.css").unwrap()
    }

    #[test]
    fn import_statement_forms() {
        for css in [
            "@import url(\"base.css\");p{}",
            "@import url(base.css);p{}",
            "@import \"base.css\";p{}",
            "@import 'base.css' screen and (min-width: 40em);p{}",
        ] {
            let import = find_import(css).unwrap();
            assert_eq!(import.target, "base.css");
            assert_eq!(&css[import.end..], "p{}");
        }
    }

    #[test]
    fn imports_in_comments_and_strings_are_ignored() {
        assert!(find_import("/* @import url(x.css); */ p{}").is_none());
        assert!(find_import("p::before { content: '@import url(x.css);' }").is_none());
    }

    #[test]
    fn url_rewriting_absolutizes_relative_targets() {
        let out = rewrite_urls(
            "a{background:url(img/bg.png)}b{mask:url(\"../m.svg\")}",
            &base(),
        );
        assert_eq!(
            out,
            "a{background:url(https://cdn.example.com/css/img/bg.png)}\
             b{mask:url(\"https://cdn.example.com/m.svg\")}"
        );
    }

    #[test]
    fn url_rewriting_skips_absolute_and_data_targets() {
        let css = "a{background:url(data:image/png;base64,AA==)}\
                   b{background:url(https://other.example.com/x.png)}\
                   c{background:url(//cdn.example.com/y.png)}\
                   d{clip-path:url(#mask)}";
        assert_eq!(rewrite_urls(css, &base()), css);
    }
}
