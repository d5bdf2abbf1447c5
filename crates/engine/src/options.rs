//! Engine configuration and lifecycle hooks.

use crate::PassOutcome;
use ponyfill_dom::NodeId;
use ponyfill_variables::Warning;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Engine configuration. Every field has a default; construct with struct
/// update syntax:
///
/// ```ignore
/// let options = Options {
///     preserve_vars: true,
///     ..Options::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Element to scope the pass to; defaults to the document root.
    pub root: Option<NodeId>,
    /// Selector list for candidate source elements.
    pub include: String,
    /// Selector list removing candidates; empty excludes nothing.
    pub exclude: String,
    /// Caller-supplied variable overrides. Names are normalized to the
    /// `--` prefix and win over document-declared values.
    pub variables: HashMap<String, String>,
    /// Transform only when the target engine lacks native custom property
    /// support (see [`Options::native_support`]).
    pub only_legacy: bool,
    /// Whether the target rendering engine supports custom properties
    /// natively. The embedder states this; the engine does not probe.
    pub native_support: bool,
    /// Process shadow roots under the root element, parsing `:host`
    /// declarations.
    pub shadow_dom: bool,
    /// Keep rules that use no `var()` in the output.
    pub preserve_static: bool,
    /// Keep custom-property declarations and `var()` references alongside
    /// their resolved values.
    pub preserve_vars: bool,
    /// Suppress log output for warnings and per-source errors. Hooks still
    /// fire.
    pub silent: bool,
    /// Write transformed CSS and tracking attributes back to the DOM.
    pub update_dom: bool,
    /// Rewrite relative `url(...)` references in fetched text against the
    /// stylesheet's own URL.
    pub update_urls: bool,
    /// Subscribe to DOM updates and rerun on relevant mutations.
    pub watch: bool,
    /// Ignore sources carrying a `disabled` attribute.
    pub skip_disabled: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: None,
            include: "style,link[rel=stylesheet]".to_owned(),
            exclude: String::new(),
            variables: HashMap::new(),
            only_legacy: true,
            native_support: false,
            shadow_dom: false,
            preserve_static: true,
            preserve_vars: false,
            silent: false,
            update_dom: true,
            update_urls: true,
            watch: false,
            skip_disabled: true,
        }
    }
}

type BeforeSendFn = dyn Fn(&mut Url, NodeId) + Send + Sync;
type SuccessFn = dyn Fn(&str, NodeId, &Url) -> Option<String> + Send + Sync;
type ErrorFn = dyn Fn(&str, Option<NodeId>, Option<&Url>) + Send + Sync;
type WarningFn = dyn Fn(&Warning) + Send + Sync;
type CompleteFn = dyn Fn(&PassOutcome) + Send + Sync;
type FinallyFn = dyn Fn(bool, bool, Duration) + Send + Sync;

/// Lifecycle callbacks. All optional; per-source failures are reported
/// here rather than failing the pass.
#[derive(Default)]
pub struct Hooks {
    /// Called before each network fetch; may rewrite the URL.
    pub on_before_send: Option<Box<BeforeSendFn>>,
    /// Called with fetched text. `None` keeps the text, `Some` replaces
    /// it; replacing with the empty string drops the source.
    pub on_success: Option<Box<SuccessFn>>,
    /// Fetch or parse failure: message, source node, URL when known.
    pub on_error: Option<Box<ErrorFn>>,
    /// Resolver warning (undefined variable, cycle, malformed `var()`).
    pub on_warning: Option<Box<WarningFn>>,
    /// End of a pass, with the full outcome.
    pub on_complete: Option<Box<CompleteFn>>,
    /// Always fires last: `(changed, native, elapsed)`.
    pub on_finally: Option<Box<FinallyFn>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_before_send", &self.on_before_send.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_finally", &self.on_finally.is_some())
            .finish()
    }
}
