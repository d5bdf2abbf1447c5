//! Recursive `var()` expansion.
//!
//! Values are expanded by repeatedly locating the first balanced paren
//! span: when the text before it ends with `var` the span is a variable
//! reference, otherwise the body is resolved in place and scanning moves
//! past it. A resolution stack catches circular references so expansion
//! always terminates.

use ponyfill_syntax::scan;
use std::collections::HashMap;
use thiserror::Error;

/// A non-fatal problem found while resolving a value. Resolution continues
/// past every warning.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("variable \"{name}\" is undefined")]
    UndefinedVariable { name: String },
    #[error("circular reference to variable \"{name}\"")]
    CircularReference { name: String },
    #[error("var() must contain a non-whitespace string")]
    EmptyVarFunction,
    #[error("missing closing \")\" in the value \"{value}\"")]
    MissingClosingParen { value: String },
}

/// Mutable state threaded through one value's resolution.
pub struct ResolveContext<'vars> {
    pub variables: &'vars HashMap<String, String>,
    pub warnings: Vec<Warning>,
    stack: Vec<String>,
}

impl<'vars> ResolveContext<'vars> {
    pub fn new(variables: &'vars HashMap<String, String>) -> Self {
        Self {
            variables,
            warnings: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn warn(&mut self, warning: Warning) {
        log::debug!("resolver: {warning}");
        self.warnings.push(warning);
    }
}

/// Expand every `var()` reference in `value`. Unresolvable references are
/// left as `var(...)` markers so callers can detect residual usage.
pub fn resolve_value(value: &str, context: &mut ResolveContext<'_>) -> String {
    if !value.contains("var(") {
        return value.to_owned();
    }
    let Some(span) = scan::find_balanced(value, '(', ')') else {
        context.warn(Warning::MissingClosingParen {
            value: value.to_owned(),
        });
        return value.to_owned();
    };
    let pre = &value[..span.open];
    let body = span.body(value);
    let post = &value[span.close + 1..];
    if pre.ends_with("var") {
        if body.trim().is_empty() {
            context.warn(Warning::EmptyVarFunction);
            return value.to_owned();
        }
        let mut out = pre[..pre.len() - 3].to_owned();
        out.push_str(&resolve_reference(body, context));
        out.push_str(&resolve_value(post, context));
        out
    } else {
        let mut out = pre.to_owned();
        out.push('(');
        out.push_str(&resolve_value(body, context));
        out.push(')');
        out.push_str(&resolve_value(post, context));
        out
    }
}

/// Resolve the body of one `var()` function: a whitespace-stripped name
/// and an optional fallback after the first top-level comma.
fn resolve_reference(body: &str, context: &mut ResolveContext<'_>) -> String {
    let (raw_name, fallback) = scan::split_once_top_level_comma(body);
    let name: String = raw_name.chars().filter(|ch| !ch.is_whitespace()).collect();

    if context.stack.contains(&name) {
        context.warn(Warning::CircularReference { name });
        return use_fallback_or_residual(body, fallback, None, context);
    }
    if let Some(replacement) = context.variables.get(&name).cloned() {
        context.stack.push(name);
        let resolved = resolve_value(&replacement, context);
        context.stack.pop();
        return resolved;
    }
    use_fallback_or_residual(body, fallback, Some(name), context)
}

fn use_fallback_or_residual(
    body: &str,
    fallback: Option<&str>,
    undefined_name: Option<String>,
    context: &mut ResolveContext<'_>,
) -> String {
    match fallback.map(str::trim) {
        Some(tail) if !tail.is_empty() => resolve_value(tail, context),
        _ => {
            if let Some(name) = undefined_name {
                context.warn(Warning::UndefinedVariable { name });
            }
            format!("var({body})")
        }
    }
}

/// Flatten nested `calc()` functions: inside each outer `calc()` body,
/// inner `calc(` becomes a bare paren group. Engines that support `calc()`
/// at all often reject the nested form.
pub fn fix_nested_calc(value: &str) -> String {
    let mut out = String::new();
    let mut rest = value;
    while let Some(pos) = rest.find("calc(") {
        let open = pos + 4;
        let Some(span) = scan::find_balanced(&rest[open..], '(', ')') else {
            break;
        };
        let body_start = open + span.open + 1;
        let body_end = open + span.close;
        out.push_str(&rest[..body_start]);
        out.push_str(&rest[body_start..body_end].replace("calc(", "("));
        out.push(')');
        rest = &rest[body_end + 1..];
    }
    out.push_str(rest);
    out
}
