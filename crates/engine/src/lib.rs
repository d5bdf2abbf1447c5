//! Client-side CSS custom property resolution for rendering engines
//! without native support.
//!
//! A [`CssVars`] instance is bound to a [`Dom`] and transforms its
//! stylesheets: it discovers `style` and `link rel=stylesheet` sources,
//! fetches and `@import`-inlines their text, resolves every `var()`
//! reference against the document's root-scope declarations (plus caller
//! overrides), and writes the resolved CSS into managed output elements
//! next to each source. With `watch` enabled it reruns itself when the
//! page changes.
//!
//! ```ignore
//! let engine = CssVars::new(dom, Options::default(), Hooks::default());
//! let outcome = engine.run().await;
//! ```

#![forbid(unsafe_code)]

mod error;
mod fetch;
mod locate;
mod options;
mod sync;
mod watch;

pub use error::FetchError;
pub use fetch::{FetchText, HttpFetcher};
pub use locate::{ProcessingState, SourceKind, StyleSource, locate};
pub use options::{Hooks, Options};
pub use sync::PassOutcome;

pub use ponyfill_dom::{Dom, DomUpdate, NodeId, SelectorList};
pub use ponyfill_syntax::ParseError;
pub use ponyfill_variables::Warning;

use ponyfill_variables::VariableStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// State owned by the pass lock. Holding it serializes passes on one
/// engine instance.
pub(crate) struct EngineState {
    /// Document-declared variables cached across passes, plus the user
    /// override layer seeded from [`Options::variables`].
    pub doc_vars: VariableStore,
    /// Effective variable mapping of the previous pass, for change
    /// detection.
    pub prior_variables: HashMap<String, String>,
    /// Source count of the previous pass; a drop invalidates the cache.
    pub prior_source_count: usize,
    /// Monotonic counter handing out `data-cssvars-group` values.
    pub group: u32,
    pub watch_task: Option<JoinHandle<()>>,
}

pub(crate) struct Inner {
    pub dom: Arc<Mutex<Dom>>,
    pub fetcher: Arc<dyn FetchText>,
    pub options: Options,
    pub hooks: Hooks,
    pub state: Mutex<EngineState>,
    /// Nodes the engine has tagged; used by the watcher to tell its own
    /// writes from page mutations.
    pub tracked: Mutex<HashSet<NodeId>>,
    /// Pass tokens issued so far. A pass applies its output only while it
    /// still holds the newest token.
    pub jobs: AtomicU64,
    /// Single debounce slot for watch-triggered reruns.
    pub rerun_pending: AtomicBool,
    /// Set when a tracked node was removed; the next pass drops the
    /// document variable cache.
    pub cache_stale: AtomicBool,
}

/// The ponyfill engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CssVars {
    pub(crate) inner: Arc<Inner>,
}

impl CssVars {
    /// Bind an engine to a document, fetching over HTTP(S) and `file`.
    pub fn new(dom: Arc<Mutex<Dom>>, options: Options, hooks: Hooks) -> Self {
        Self::with_fetcher(dom, options, hooks, Arc::new(HttpFetcher::new()))
    }

    /// Bind an engine with a custom fetch capability.
    pub fn with_fetcher(
        dom: Arc<Mutex<Dom>>,
        options: Options,
        hooks: Hooks,
        fetcher: Arc<dyn FetchText>,
    ) -> Self {
        let mut doc_vars = VariableStore::new();
        for (name, value) in &options.variables {
            doc_vars.insert_user(name, value);
        }
        Self {
            inner: Arc::new(Inner {
                dom,
                fetcher,
                options,
                hooks,
                state: Mutex::new(EngineState {
                    doc_vars,
                    prior_variables: HashMap::new(),
                    prior_source_count: 0,
                    group: 0,
                    watch_task: None,
                }),
                tracked: Mutex::new(HashSet::new()),
                jobs: AtomicU64::new(0),
                rerun_pending: AtomicBool::new(false),
                cache_stale: AtomicBool::new(false),
            }),
        }
    }

    /// Run one pass. Per-source failures surface through the hooks and the
    /// log; the pass itself always completes and `on_complete` /
    /// `on_finally` always fire.
    pub async fn run(&self) -> PassOutcome {
        let started = Instant::now();
        let token = self.inner.jobs.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.inner.state.lock().await;
        if self.inner.options.watch {
            self.spawn_watch(&mut state);
        }
        let outcome = if self.inner.options.native_support && self.inner.options.only_legacy {
            self.native_pass(started).await
        } else {
            self.full_pass(&mut state, token, started).await
        };
        drop(state);
        if let Some(callback) = &self.inner.hooks.on_complete {
            callback(&outcome);
        }
        if let Some(callback) = &self.inner.hooks.on_finally {
            callback(outcome.changed, outcome.native, outcome.elapsed);
        }
        outcome
    }

    /// The target supports custom properties and we were asked to only
    /// help legacy engines: write the caller's overrides as inline custom
    /// properties on the root element and stop.
    async fn native_pass(&self, started: Instant) -> PassOutcome {
        let options = &self.inner.options;
        let mut variables: Vec<(String, String)> = options
            .variables
            .iter()
            .map(|(name, value)| (ponyfill_variables::normalize_name(name), value.clone()))
            .collect();
        variables.sort();

        let mut changed = false;
        if options.update_dom && !variables.is_empty() {
            let mut dom = self.inner.dom.lock().await;
            let root = options.root.unwrap_or(dom.root());
            if let Some(target) = dom.elements_in(root).first().copied() {
                let mut pairs = style_pairs(dom.attr(target, "style").unwrap_or(""));
                for (name, value) in &variables {
                    match pairs.iter_mut().find(|(existing, _)| existing == name) {
                        Some(slot) if slot.1 == *value => {}
                        Some(slot) => {
                            slot.1 = value.clone();
                            changed = true;
                        }
                        None => {
                            pairs.push((name.clone(), value.clone()));
                            changed = true;
                        }
                    }
                }
                if changed {
                    let text = pairs
                        .iter()
                        .map(|(name, value)| format!("{name}:{value}"))
                        .collect::<Vec<_>>()
                        .join(";");
                    dom.set_attr(target, "style", &text);
                }
            }
        }

        PassOutcome {
            css_text: String::new(),
            css_blocks: Vec::new(),
            source_nodes: Vec::new(),
            out_nodes: Vec::new(),
            variables: variables.into_iter().collect(),
            changed,
            native: true,
            keyframes_touched: false,
            elapsed: started.elapsed(),
        }
    }

    /// Forget everything: cached variables, counters, tracked nodes and
    /// any pending watch work. The next [`run`](Self::run) starts fresh.
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(task) = state.watch_task.take() {
            task.abort();
        }
        let mut doc_vars = VariableStore::new();
        for (name, value) in &self.inner.options.variables {
            doc_vars.insert_user(name, value);
        }
        state.doc_vars = doc_vars;
        state.prior_variables.clear();
        state.prior_source_count = 0;
        state.group = 0;
        drop(state);
        self.inner.tracked.lock().await.clear();
        self.inner.jobs.store(0, Ordering::SeqCst);
        self.inner.rerun_pending.store(false, Ordering::SeqCst);
        self.inner.cache_stale.store(false, Ordering::SeqCst);
    }
}

fn style_pairs(text: &str) -> Vec<(String, String)> {
    text.split(';')
        .filter_map(|part| {
            part.split_once(':')
                .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect()
}
