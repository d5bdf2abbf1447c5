//! Mutation watching: rerun the pass when the page changes under us.
//!
//! The watcher subscribes to the DOM's update broadcast and schedules a
//! debounced rerun (single slot, 100 ms) for relevant mutations: a style or
//! link insertion, removal of a node the engine tagged, or a tracked link's
//! `disabled`/`href` flipping. The engine's own writes are recognized by
//! their `data-cssvars*` attributes and ignored.

use crate::sync::ATTR_STATE;
use crate::{CssVars, EngineState};
use ponyfill_dom::DomUpdate;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const DEBOUNCE: Duration = Duration::from_millis(100);

impl CssVars {
    pub(crate) fn spawn_watch(&self, state: &mut EngineState) {
        if state.watch_task.is_some() {
            return;
        }
        let engine = self.clone();
        state.watch_task = Some(tokio::spawn(async move {
            engine.watch_loop().await;
        }));
    }

    async fn watch_loop(self) {
        let mut updates = { self.inner.dom.lock().await.updates() };
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if self.is_relevant(&update).await {
                        self.schedule_rerun();
                    }
                }
                // Missed events: assume something relevant was among them.
                Err(RecvError::Lagged(_)) => self.schedule_rerun(),
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn is_relevant(&self, update: &DomUpdate) -> bool {
        match update {
            DomUpdate::InsertElement { node, tag, .. } if tag == "style" || tag == "link" => {
                let dom = self.inner.dom.lock().await;
                dom.attr(*node, ATTR_STATE) != Some("out")
            }
            DomUpdate::RemoveNode { node } => {
                let tracked = self.inner.tracked.lock().await;
                if tracked.contains(node) {
                    // A tagged source or output is gone; the cached
                    // document variables may no longer hold.
                    self.inner.cache_stale.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
            DomUpdate::SetAttr { node, name, .. } | DomUpdate::RemoveAttr { node, name } => {
                if name.starts_with(ATTR_STATE) || (name != "disabled" && name != "href") {
                    return false;
                }
                let tracked = self.inner.tracked.lock().await.contains(node);
                if !tracked {
                    return false;
                }
                let dom = self.inner.dom.lock().await;
                dom.tag(*node) == Some("link")
            }
            _ => false,
        }
    }

    fn schedule_rerun(&self) {
        if self.inner.rerun_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            engine.inner.rerun_pending.store(false, Ordering::SeqCst);
            drop(engine.run().await);
        });
    }
}
