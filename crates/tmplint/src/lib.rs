//! # tmplint - static checks for go-style templates
//!
//! `tmplint` reports template references that will not resolve against a set of values, calls to
//! functions a project does not allow and values a project requires, all without rendering the
//! templates.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `tmplint` works internally.
//!
//! ### Template terms
//!
//! ```text
//! Hello {{ .user.name | upper }}!{{/* a comment */}}
//! {{- range $i, $svc := .services }}
//!   {{ $i }}: {{ $svc.name }}
//! {{- end }}
//! ```
//!
//! - everything outside of `{{ }}` is literal `text`
//! - an `action` holds a `pipeline`: stages separated by `|`, where the result of one stage is
//!   passed to the next as its last argument
//! - `.` is the implicit context ("dot"), `$` is the root of the data, `$x` is a variable
//! - `.a.b` is a `field path`: a base (dot, a variable or a parenthesized pipeline) plus steps
//! - `if`, `range`, `with`, `define` and `block` open a structure that is closed by `end`
//! - `{{-` and `-}}` trim the whitespace next to the action
//!
//! ### Loading values
//!
//! see [tree::Layers]
//!
//! Values come in layers of fixed precedence (defaults file, primary file, overlays, `key=value`
//! overrides and a computed layer). Each layer is converted to a [value::Value] and merged into a
//! single [tree::ValueTree]: maps merge recursively, everything else is replaced by the later
//! layer. The tree remembers which layer set each leaf ([tree::ValueTree::origin]).
//!
//! The computed layer is special: a named sub-template is executed against the lower layers with
//! the small renderer in [render] and its output is read back as yaml.
//!
//! ### Parsing
//!
//! see [template::parse]
//!
//! Every file is parsed once when it is added to [templates::Templates]. The parser never fails as
//! a whole, it records [template::SyntaxError]s and continues with the next action. Expressions it
//! does not understand (arithmetic, unknown tokens) become opaque nodes.
//!
//! After loading, [templates::Templates::defines] collects every `define` of every file into one
//! table. Includes are only resolved against the finished table.
//!
//! ### Extracting references
//!
//! see [extract::extract]
//!
//! The walk keeps a [scope::ScopeStack] of what `.`, `$` and each variable stand for:
//!
//! | **template**                         | **binding of `.`**         | **recorded path**  |
//! |--------------------------------------|----------------------------|--------------------|
//! | `{{ .a.b }}`                         | root                       | `a.b`              |
//! | `{{ with .svc }}{{ .port }}{{ end }}`| `svc`                      | `svc`, `svc.port`  |
//! | `{{ range .items }}{{ .id }}{{ end }}`| element of `items`        | `items`            |
//! | `{{ define "x" }}{{ .y }}{{ end }}`  | dynamic                    | -                  |
//! | `{{ include "x" .svc }}`             | `svc` (inside `x`)         | `svc`, `svc.y`     |
//!
//! Anything below a range element or a dynamic value cannot be checked and is dropped. Function
//! calls are collected regardless of their arguments.
//!
//! ### Linting
//!
//! see [lint::Linter]
//!
//! Files are processed in parallel. Each reference is looked up in the value tree, each call is
//! checked against the [policy::Policy] and the resulting [lint::Finding]s are deduplicated and
//! ordered. The [lint::Outcome] only depends on the findings and the policy.
//!
//! ### Output
//!
//! [report::render] turns the findings into plain text, json or github annotations.
//!
pub mod extract;
pub mod lint;
pub mod policy;
pub mod render;
pub mod report;
pub mod scope;
pub mod template;
pub mod templates;
pub mod tree;
pub mod value;
mod visit;
