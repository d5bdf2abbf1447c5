//! CSS custom property storage and `var()` resolution.
//!
//! The store is two layers: variables declared in the document under a
//! root-scope selector, and caller-supplied overrides. Overrides win.
//! Resolution is recursive string expansion with a resolution stack for
//! cycle detection; values the resolver does not change are left untouched
//! so the sync controller can detect no-ops cheaply.

#![forbid(unsafe_code)]

mod resolve;

pub use resolve::{ResolveContext, Warning, fix_nested_calc, resolve_value};

use ponyfill_syntax::{Declaration, Stylesheet, scan};
use std::collections::HashMap;

/// Normalize a custom property name to include the leading double-hyphen.
/// Names are case-sensitive and stored as given apart from the prefix.
pub fn normalize_name(name: &str) -> String {
    if name.starts_with("--") {
        name.to_owned()
    } else {
        format!("--{}", name.trim_start_matches('-'))
    }
}

/// Two-tier variable mapping: document-declared defaults plus user
/// overrides.
#[derive(Clone, Debug, Default)]
pub struct VariableStore {
    document: HashMap<String, String>,
    user: HashMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document-declared variables (insertion wins last, matching cascade
    /// order within the scanned text).
    pub const fn document(&self) -> &HashMap<String, String> {
        &self.document
    }

    pub fn insert_document(&mut self, name: &str, value: &str) {
        self.document
            .insert(normalize_name(name), value.to_owned());
    }

    /// Drop all cached document variables, forcing rediscovery.
    pub fn clear_document(&mut self) {
        self.document.clear();
    }

    pub fn insert_user(&mut self, name: &str, value: &str) {
        self.user.insert(normalize_name(name), value.to_owned());
    }

    pub fn extend_user<'kv>(&mut self, entries: impl IntoIterator<Item = (&'kv str, &'kv str)>) {
        for (name, value) in entries {
            self.insert_user(name, value);
        }
    }

    /// The effective mapping: document defaults overlaid with user
    /// overrides.
    pub fn effective(&self) -> HashMap<String, String> {
        let mut merged = self.document.clone();
        merged.extend(
            self.user
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        merged
    }
}

/// Collect custom-property declarations from top-level rules whose selector
/// list contains an unqualified `:root` (or `:host` when `parse_host`).
/// Later declarations overwrite earlier ones.
pub fn extract_root_variables(sheet: &Stylesheet, parse_host: bool, store: &mut VariableStore) {
    let anchor = if parse_host { ":host" } else { ":root" };
    for rule in sheet.top_level_rules() {
        if !rule
            .selectors
            .iter()
            .any(|selector| scan::has_unqualified_anchor(selector, anchor))
        {
            continue;
        }
        for declaration in &rule.declarations {
            if declaration.is_custom_property() {
                store.insert_document(&declaration.property, &declaration.value);
            }
        }
    }
}

/// Options for [`transform_stylesheet`].
#[derive(Clone, Copy, Debug)]
pub struct TransformOptions<'vars> {
    /// Keep custom-property declarations and `var()` usage in the output.
    /// When a value resolves, the resolved copy is inserted before the
    /// original so legacy engines read the copy and native engines the
    /// original.
    pub preserve_vars: bool,
    /// The effective variable mapping to resolve against.
    pub variables: &'vars HashMap<String, String>,
}

/// Resolve `var()` references in every declaration of the tree, anywhere in
/// its nesting. Returns the warnings produced while resolving.
pub fn transform_stylesheet(sheet: &mut Stylesheet, options: &TransformOptions<'_>) -> Vec<Warning> {
    let mut warnings = Vec::new();
    sheet.for_each_declarations(&mut |declarations| {
        let mut index = 0;
        while index < declarations.len() {
            let declaration = &declarations[index];
            if !options.preserve_vars && declaration.is_custom_property() {
                declarations.remove(index);
                continue;
            }
            if declaration.uses_var() {
                let mut context = ResolveContext::new(options.variables);
                let resolved = resolve_value(&declaration.value, &mut context);
                warnings.append(&mut context.warnings);
                if resolved != declaration.value {
                    let resolved = fix_nested_calc(&resolved);
                    if options.preserve_vars {
                        let copy = Declaration {
                            property: declaration.property.clone(),
                            value: resolved,
                        };
                        declarations.insert(index, copy);
                        index += 1;
                    } else {
                        declarations[index].value = resolved;
                    }
                }
            }
            index += 1;
        }
    });
    warnings
}
