//! The pass pipeline: locate, fetch, parse, resolve, apply.
//!
//! Engine state persists across passes only through `data-cssvars*`
//! attributes on the DOM (plus the document variable cache): `src` marks a
//! processed source, `skip` a source whose output would equal its input,
//! `out` a managed output element. `data-cssvars-group` pairs a source with
//! its output and `data-cssvars-job` records the pass that last touched
//! either.

use crate::fetch::Collector;
use crate::locate::{ProcessingState, locate};
use crate::{CssVars, EngineState};
use ponyfill_dom::{Dom, NodeId, SelectorList};
use ponyfill_syntax::{ParseOptions, Stylesheet, parse_stylesheet, serialize_stylesheet};
use ponyfill_variables::{TransformOptions, extract_root_variables, transform_stylesheet};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Instant;

pub(crate) const ATTR_STATE: &str = "data-cssvars";
pub(crate) const ATTR_GROUP: &str = "data-cssvars-group";
pub(crate) const ATTR_JOB: &str = "data-cssvars-job";

/// Everything one pass produced. Handed to `on_complete` and returned from
/// [`CssVars::run`](crate::CssVars::run).
#[derive(Clone, Debug)]
pub struct PassOutcome {
    /// Concatenation of all transformed blocks, in document order.
    pub css_text: String,
    /// Transformed CSS per processed source (empty blocks omitted).
    pub css_blocks: Vec<String>,
    /// Source elements processed this pass.
    pub source_nodes: Vec<NodeId>,
    /// Managed output elements written or reused this pass.
    pub out_nodes: Vec<NodeId>,
    /// The effective variable mapping the pass resolved against.
    pub variables: HashMap<String, String>,
    /// Whether any DOM write happened.
    pub changed: bool,
    /// Whether the pass short-circuited to native custom property support.
    pub native: bool,
    /// Whether a written block contained `@keyframes` rules. Embedders
    /// that need the legacy animation restart can key off this.
    pub keyframes_touched: bool,
    pub elapsed: std::time::Duration,
}

/// Accumulated result of passing over one tree (document or shadow root).
#[derive(Default)]
pub(crate) struct TreeOutcome {
    pub blocks: Vec<String>,
    pub source_nodes: Vec<NodeId>,
    pub out_nodes: Vec<NodeId>,
    /// Sources left alone because they already carried a state marker.
    pub marked_skips: usize,
    pub wrote: bool,
    pub keyframes_touched: bool,
}

impl TreeOutcome {
    fn merge(&mut self, other: Self) {
        self.blocks.extend(other.blocks);
        self.source_nodes.extend(other.source_nodes);
        self.out_nodes.extend(other.out_nodes);
        self.marked_skips += other.marked_skips;
        self.wrote |= other.wrote;
        self.keyframes_touched |= other.keyframes_touched;
    }
}

struct Prepared {
    node: NodeId,
    source_text: String,
    state: ProcessingState,
    block: String,
    has_keyframes: bool,
}

impl CssVars {
    pub(crate) async fn full_pass(
        &self,
        state: &mut EngineState,
        token: u64,
        started: Instant,
    ) -> PassOutcome {
        let options = &self.inner.options;
        let root = {
            let dom = self.inner.dom.lock().await;
            options.root.unwrap_or(dom.root())
        };
        loop {
            if self.inner.cache_stale.swap(false, Ordering::SeqCst) {
                state.doc_vars.clear_document();
            }
            let mut tree = self.pass_tree(state, root, false, token).await;
            if options.shadow_dom {
                let shadows = { self.inner.dom.lock().await.shadow_roots_in(root) };
                for shadow in shadows {
                    let sub = self.pass_tree(state, shadow, true, token).await;
                    tree.merge(sub);
                }
            }

            let effective = state.doc_vars.effective();
            let grew = effective.len() > state.prior_variables.len();
            let differs = effective.iter().any(|(name, value)| {
                state
                    .prior_variables
                    .get(name)
                    .is_some_and(|prior| prior != value)
            });
            let stale_skips = tree.marked_skips > 0 && (grew || differs);
            state.prior_variables = effective.clone();
            if stale_skips {
                // A marker-skipped source may use a variable that just
                // changed: drop all markers and redo the whole pass.
                let mut dom = self.inner.dom.lock().await;
                reset_markers(&mut dom, root);
                if options.shadow_dom {
                    for shadow in dom.shadow_roots_in(root) {
                        reset_markers(&mut dom, shadow);
                    }
                }
                continue;
            }

            return PassOutcome {
                css_text: tree.blocks.concat(),
                css_blocks: tree.blocks.into_iter().filter(|b| !b.is_empty()).collect(),
                source_nodes: tree.source_nodes,
                out_nodes: tree.out_nodes,
                variables: effective,
                changed: tree.wrote,
                native: false,
                keyframes_touched: tree.keyframes_touched,
                elapsed: started.elapsed(),
            };
        }
    }

    async fn pass_tree(
        &self,
        state: &mut EngineState,
        root: NodeId,
        parse_host: bool,
        token: u64,
    ) -> TreeOutcome {
        let options = &self.inner.options;
        let include = SelectorList::parse(&options.include);
        let exclude = SelectorList::parse(&options.exclude);

        // Read phase.
        let (mut sources, marked_skips) = {
            let mut dom = self.inner.dom.lock().await;
            let orphans = remove_orphan_outputs(&mut dom, root);
            if !orphans.is_empty() {
                state.doc_vars.clear_document();
                // Untrack them so the watcher does not mistake our own
                // cleanup for a page mutation.
                let mut tracked = self.inner.tracked.lock().await;
                for node in &orphans {
                    tracked.remove(node);
                }
            }
            let located = locate(&dom, root, &include, &exclude, options.skip_disabled);
            if !parse_host {
                if located.len() < state.prior_source_count {
                    state.doc_vars.clear_document();
                }
                state.prior_source_count = located.len();
            }
            let mut fresh = Vec::new();
            let mut marked = 0;
            for source in located {
                if dom.attr(source.node, ATTR_STATE).is_some() {
                    marked += 1;
                } else {
                    fresh.push(source);
                }
            }
            (fresh, marked)
        };

        // Fetch phase: concurrent, document order preserved.
        let collector = Collector {
            fetcher: &*self.inner.fetcher,
            hooks: &self.inner.hooks,
            update_urls: options.update_urls,
            silent: options.silent,
        };
        collector.collect(&mut sources).await;

        // Parse and extract root-scope variables.
        let parse_options = ParseOptions {
            preserve_static: options.preserve_static,
        };
        let mut sheets: Vec<Option<Stylesheet>> = Vec::with_capacity(sources.len());
        for source in &mut sources {
            if matches!(
                source.state,
                ProcessingState::Errored | ProcessingState::Skipped
            ) {
                sheets.push(None);
                continue;
            }
            match parse_stylesheet(&source.raw_text, &parse_options) {
                Ok(sheet) => {
                    extract_root_variables(&sheet, parse_host, &mut state.doc_vars);
                    source.state = ProcessingState::Parsed;
                    sheets.push(Some(sheet));
                }
                Err(error) => {
                    if !options.silent {
                        log::error!("{error}");
                    }
                    if let Some(callback) = &self.inner.hooks.on_error {
                        callback(&error.to_string(), Some(source.node), None);
                    }
                    source.state = ProcessingState::Errored;
                    sheets.push(None);
                }
            }
        }

        // Resolve and serialize.
        let variables = state.doc_vars.effective();
        let transform = TransformOptions {
            preserve_vars: options.preserve_vars,
            variables: &variables,
        };
        let mut prepared = Vec::with_capacity(sources.len());
        for (source, slot) in sources.into_iter().zip(sheets.iter_mut()) {
            let Some(sheet) = slot else {
                prepared.push(Prepared {
                    node: source.node,
                    source_text: source.raw_text,
                    state: source.state,
                    block: String::new(),
                    has_keyframes: false,
                });
                continue;
            };
            let warnings = transform_stylesheet(sheet, &transform);
            for warning in &warnings {
                if !options.silent {
                    log::warn!("{warning}");
                }
                if let Some(callback) = &self.inner.hooks.on_warning {
                    callback(warning);
                }
            }
            let has_keyframes = sheet
                .nodes
                .iter()
                .any(|node| matches!(node, ponyfill_syntax::CssNode::Keyframes { .. }));
            prepared.push(Prepared {
                node: source.node,
                source_text: source.raw_text,
                state: ProcessingState::Resolved,
                block: serialize_stylesheet(sheet),
                has_keyframes,
            });
        }

        // Write phase.
        let mut tree = TreeOutcome {
            blocks: prepared.iter().map(|p| p.block.clone()).collect(),
            source_nodes: prepared.iter().map(|p| p.node).collect(),
            marked_skips,
            ..TreeOutcome::default()
        };
        if options.update_dom && self.inner.jobs.load(Ordering::SeqCst) == token {
            let mut dom = self.inner.dom.lock().await;
            let job = token.to_string();
            let mut touched = Vec::new();
            for item in &mut prepared {
                if item.state == ProcessingState::Errored {
                    continue;
                }
                apply_source(&mut dom, state, item, &job, &mut tree);
                touched.push(item.node);
            }
            touched.extend(tree.out_nodes.iter().copied());
            self.inner.tracked.lock().await.extend(touched);
        }
        tree
    }
}

/// Tag one source and install or refresh its output element.
fn apply_source(
    dom: &mut Dom,
    state: &mut EngineState,
    item: &mut Prepared,
    job: &str,
    tree: &mut TreeOutcome,
) {
    let stripped = no_ws(&item.block);
    if stripped.is_empty() || stripped == no_ws(&item.source_text) {
        // Output adds nothing over the source; remember that so the
        // next pass leaves it alone.
        dom.set_attr(item.node, ATTR_STATE, "skip");
        dom.set_attr(item.node, ATTR_JOB, job);
        item.state = ProcessingState::Skipped;
        return;
    }
    let group = match dom.attr(item.node, ATTR_GROUP) {
        Some(group) => group.to_owned(),
        None => {
            state.group += 1;
            let group = state.group.to_string();
            dom.set_attr(item.node, ATTR_GROUP, &group);
            group
        }
    };
    dom.set_attr(item.node, ATTR_STATE, "src");
    dom.set_attr(item.node, ATTR_JOB, job);
    let out = match find_output(dom, item.node, &group) {
        Some(out) => out,
        None => {
            let out = dom.create_element_after(item.node, "style");
            dom.set_attr(out, ATTR_STATE, "out");
            dom.set_attr(out, ATTR_GROUP, &group);
            tree.wrote = true;
            out
        }
    };
    dom.set_attr(out, ATTR_JOB, job);
    if dom.text_content(out) != item.block {
        dom.set_text_content(out, &item.block);
        tree.wrote = true;
        tree.keyframes_touched |= item.has_keyframes;
    }
    tree.out_nodes.push(out);
    item.state = ProcessingState::Applied;
}

fn no_ws(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_whitespace()).collect()
}

/// The managed output element paired with `source` through its group tag.
fn find_output(dom: &Dom, source: NodeId, group: &str) -> Option<NodeId> {
    let scope = dom.parent(source)?;
    dom.elements_in(scope).into_iter().find(|node| {
        dom.attr(*node, ATTR_STATE) == Some("out") && dom.attr(*node, ATTR_GROUP) == Some(group)
    })
}

/// Remove output elements whose paired source is gone.
fn remove_orphan_outputs(dom: &mut Dom, root: NodeId) -> Vec<NodeId> {
    let elements = dom.elements_in(root);
    let mut orphans = Vec::new();
    for node in &elements {
        if dom.attr(*node, ATTR_STATE) != Some("out") {
            continue;
        }
        let group = dom.attr(*node, ATTR_GROUP);
        let paired = elements.iter().any(|other| {
            other != node
                && dom.attr(*other, ATTR_STATE) != Some("out")
                && dom.attr(*other, ATTR_GROUP) == group
        });
        if !paired {
            orphans.push(*node);
        }
    }
    for node in &orphans {
        dom.remove_node(*node);
    }
    orphans
}

fn reset_markers(dom: &mut Dom, root: NodeId) {
    for node in dom.elements_in(root) {
        if matches!(dom.attr(node, ATTR_STATE), Some("src") | Some("skip")) {
            dom.remove_attr(node, ATTR_STATE);
        }
    }
}
