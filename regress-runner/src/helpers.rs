// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for regress-runner.

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "testcase" if `count` is 1, otherwise "testcases".
    pub fn testcases_str(count: usize) -> &'static str {
        if count == 1 { "testcase" } else { "testcases" }
    }

    /// Returns "context" if `count` is 1, otherwise "contexts".
    pub fn contexts_str(count: usize) -> &'static str {
        if count == 1 { "context" } else { "contexts" }
    }

    /// Returns "file" if `count` is 1, otherwise "files".
    pub fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }
}

/// Replaces every `{name}` in `template` with the matching value from `vars`.
///
/// Placeholders without a matching variable are left untouched, so a template can be rendered
/// in several passes.
pub(crate) fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.iter().find(|(var, _)| *var == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Turns a node ID like `host-1.example.com:8041` into a string usable as part of a file name.
pub(crate) fn sanitize_node_id(node_id: &str) -> String {
    node_id.replace(['.', ':', '-'], "_")
}

/// Returns the last `count` entries of `lines`.
pub(crate) fn tail<T: Clone>(lines: &[T], count: usize) -> Vec<T> {
    lines[lines.len().saturating_sub(count)..].to_vec()
}
