//! reference extraction
//!
//! Walks a parsed template depth first with a [ScopeStack] and collects
//! - every statically resolvable field access as a canonical [ReferencePath]
//! - every function call as a [FunctionCall], whether its arguments resolve or not
//! - variables that are used without being declared
//!
//! Field accesses below a range element or a dynamic value cannot be checked against the merged
//! tree and are dropped. Conditions do not guard anything: a field used inside `if` is recorded
//! like any other.
use crate::scope::{Binding, Frame, ScopeStack};
use crate::template::{
    Base, Call, Define, Expr, FieldPath, Literal, Location, Node, Pipeline, SyntaxError,
};
use crate::templates::{DefineTable, Templates};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePath {
    /// canonical dotted path, never empty
    pub path: String,
    pub location: Location,
    /// index into [Templates]
    pub file: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub function: String,
    pub location: Location,
    pub file: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub file: usize,
    pub error: SyntaxError,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub references: Vec<ReferencePath>,
    pub calls: Vec<FunctionCall>,
    /// syntax errors of the file plus scope errors found during the walk
    pub errors: Vec<FileError>,
}

/// Extract references, calls and errors of one file
///
/// `defines` must hold the sub-templates of the whole load unit (see [Templates::defines]).
#[tracing::instrument(level = "trace", skip(templates, defines))]
pub fn extract(templates: &Templates, defines: &DefineTable, file: usize) -> Extraction {
    let template = templates.get(file);
    let mut collector = Collector::new(defines, file);

    collector
        .extraction
        .errors
        .extend(template.parsed.errors.iter().map(|error| FileError {
            file,
            error: error.clone(),
        }));

    let mut scope = ScopeStack::default();
    collector.nodes(&template.parsed.root.nodes, &mut scope);
    assert_eq!(scope.depth(), 1, "scope stack must return to its base frame");

    tracing::debug!(
        path=%template.path.display(),
        references = collector.extraction.references.len(),
        calls = collector.extraction.calls.len(),
        "extracted"
    );
    collector.extraction
}

#[derive(derive_new::new)]
struct Collector<'d> {
    defines: &'d DefineTable,
    /// file the nodes being walked belong to
    file: usize,
    #[new(default)]
    extraction: Extraction,
    /// (define, data) pairs that were already analysed with a concrete base
    #[new(default)]
    refined: HashSet<(String, Binding)>,
    /// defines currently being walked through an include
    #[new(default)]
    active: Vec<String>,
}

impl<'d> Collector<'d> {
    fn nodes(&mut self, nodes: &[Node], scope: &mut ScopeStack) {
        for node in nodes {
            self.node(node, scope);
        }
    }

    fn node(&mut self, node: &Node, scope: &mut ScopeStack) {
        match node {
            Node::Text(_) | Node::Comment(_) | Node::Break(_) | Node::Continue(_) => {}
            Node::Action(action) => {
                self.pipeline(&action.pipeline, scope);
            }
            Node::If(node) => {
                // one frame for all arms: a variable of the condition is visible in `else`
                scope.scoped(Frame::default(), |scope| {
                    for branch in &node.branches {
                        let binding = self.pipeline(&branch.condition, scope);
                        if let Some(variable) = &branch.variable {
                            scope.declare(variable, binding);
                        }
                        self.nodes(&branch.body, scope);
                    }
                    if let Some(otherwise) = &node.otherwise {
                        self.nodes(otherwise, scope);
                    }
                });
            }
            Node::Range(range) => {
                let source = self.pipeline(&range.source, scope);
                let element = match source.path() {
                    Some(path) => Binding::ElementOf(path.to_string()),
                    None => Binding::Dynamic,
                };

                let mut frame = Frame::with_dot(element.clone());
                for variable in [&range.key, &range.value].into_iter().flatten() {
                    frame = frame.bind(variable, element.clone());
                }
                scope.scoped(frame, |scope| self.nodes(&range.body, scope));

                // in `else` the captures hold the ranged value itself
                if let Some(otherwise) = &range.otherwise {
                    let mut frame = Frame::default();
                    for variable in [&range.key, &range.value].into_iter().flatten() {
                        frame = frame.bind(variable, source.clone());
                    }
                    scope.scoped(frame, |scope| self.nodes(otherwise, scope));
                }
            }
            Node::With(with) => {
                let target = self.pipeline(&with.target, scope);

                let mut frame = Frame::with_dot(target.clone());
                if let Some(variable) = &with.variable {
                    frame = frame.bind(variable, target.clone());
                }
                scope.scoped(frame, |scope| self.nodes(&with.body, scope));

                if let Some(otherwise) = &with.otherwise {
                    let mut frame = Frame::default();
                    if let Some(variable) = &with.variable {
                        frame = frame.bind(variable, target);
                    }
                    scope.scoped(frame, |scope| self.nodes(otherwise, scope));
                }
            }
            Node::Bind(bind) => {
                let binding = self.pipeline(&bind.pipeline, scope);
                if bind.declare {
                    scope.declare(&bind.variable, binding);
                } else if !scope.assign(&bind.variable, binding) {
                    self.undefined_variable(&bind.variable, bind.location);
                }
            }
            Node::Define(define) => self.define(define, Binding::Dynamic, scope),
            Node::Include(include) => {
                let data = match &include.data {
                    Some(pipeline) => self.pipeline(pipeline, scope),
                    None => Binding::Dynamic,
                };
                self.include(&include.name, data);
            }
        }
    }

    /// The data passed at invocation is unknown in general, so the body starts out dynamic
    fn define(&mut self, define: &Define, data: Binding, scope: &mut ScopeStack) {
        scope.scoped(Frame::isolated(data), |scope| self.nodes(&define.body, scope));
    }

    /// Re-analyse the included define with a statically known base
    fn include(&mut self, name: &str, data: Binding) {
        if data.path().is_none() {
            return;
        }

        let defines = self.defines;
        let Some(definition) = defines.get(name) else {
            tracing::debug!(name, "include of unknown template");
            return;
        };

        if self.active.iter().any(|active| active == name)
            || !self.refined.insert((name.to_string(), data.clone()))
        {
            return;
        }

        tracing::trace!(name, ?data, "refining define");
        self.active.push(name.to_string());
        let file = std::mem::replace(&mut self.file, definition.file);

        let mut scope = ScopeStack::default();
        self.define(&definition.define, data, &mut scope);

        self.file = file;
        self.active.pop();
    }

    /// Walk all stages. Only a pipeline of a single field or variable keeps its binding.
    fn pipeline(&mut self, pipeline: &Pipeline, scope: &mut ScopeStack) -> Binding {
        let mut bindings: Vec<Binding> = pipeline
            .stages
            .iter()
            .map(|stage| self.expr(stage, scope))
            .collect();

        match bindings.len() {
            1 => bindings.remove(0),
            _ => Binding::Dynamic,
        }
    }

    fn expr(&mut self, expr: &Expr, scope: &mut ScopeStack) -> Binding {
        match expr {
            Expr::Field(field) => self.field(field, scope),
            Expr::Variable(var) => self.variable(&var.name, var.location, scope),
            Expr::Literal(..) => Binding::Dynamic,
            Expr::Pipeline(pipeline) => self.pipeline(pipeline, scope),
            Expr::Call(call) => {
                self.call(call, scope);
                Binding::Dynamic
            }
            Expr::Opaque(opaque) => {
                for child in &opaque.children {
                    self.expr(child, scope);
                }
                Binding::Dynamic
            }
        }
    }

    fn field(&mut self, field: &FieldPath, scope: &mut ScopeStack) -> Binding {
        let base = match &field.base {
            Base::Dot => scope.dot().clone(),
            Base::Variable(name) => self.variable(name, field.location, scope),
            Base::Expr(inner) => {
                self.expr(inner, scope);
                Binding::Dynamic
            }
        };

        let binding = base.extend(&field.steps);
        if !field.steps.is_empty() {
            if let Some(path) = binding.path() {
                self.extraction.references.push(ReferencePath {
                    path: path.to_string(),
                    location: field.location,
                    file: self.file,
                });
            }
        }
        binding
    }

    fn call(&mut self, call: &Call, scope: &mut ScopeStack) {
        self.extraction.calls.push(FunctionCall {
            function: call.function.clone(),
            location: call.location,
            file: self.file,
        });

        let args: Vec<Binding> = call.args.iter().map(|arg| self.expr(arg, scope)).collect();

        // `include "name" data` behaves like `template "name" data`
        if call.function == "include" {
            if let (Some(Expr::Literal(Literal::String(name), _)), Some(data)) =
                (call.args.first(), args.get(1))
            {
                self.include(name, data.clone());
            }
        }
    }

    fn variable(&mut self, name: &str, location: Location, scope: &ScopeStack) -> Binding {
        match scope.lookup(name) {
            Some(binding) => binding.clone(),
            None => {
                self.undefined_variable(name, location);
                Binding::Dynamic
            }
        }
    }

    fn undefined_variable(&mut self, name: &str, location: Location) {
        self.extraction.errors.push(FileError {
            file: self.file,
            error: SyntaxError {
                message: format!("undefined variable `{name}`"),
                location,
            },
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::templates;
    use pretty_assertions::assert_eq;

    fn extract_one(text: &str) -> Extraction {
        let templates = templates! { "main.tpl" => text };
        extract(&templates, &templates.defines(), 0)
    }

    fn paths(extraction: &Extraction) -> Vec<&str> {
        extraction
            .references
            .iter()
            .map(|r| r.path.as_str())
            .collect()
    }

    fn calls(extraction: &Extraction) -> Vec<&str> {
        extraction
            .calls
            .iter()
            .map(|c| c.function.as_str())
            .collect()
    }

    fn errors(extraction: &Extraction) -> Vec<&str> {
        extraction
            .errors
            .iter()
            .map(|e| e.error.message.as_str())
            .collect()
    }

    #[test]
    fn nested_fields() {
        let extraction = extract_one("{{ .a }} {{ .a.b.c }} {{ . }} {{ $ }}");
        assert_eq!(paths(&extraction), vec!["a", "a.b.c"]);
        assert_eq!(extraction.references[1].location, Location { line: 1, column: 13 });
    }

    #[test]
    fn guards_do_not_hide_references() {
        let extraction = extract_one("{{ if .flag }}{{ .inner }}{{ else }}{{ .other }}{{ end }}");
        assert_eq!(paths(&extraction), vec!["flag", "inner", "other"]);
    }

    #[test]
    fn range_elements_are_not_shape_checked() {
        let extraction =
            extract_one("{{ range $i, $v := .items }}{{ $v.id }}{{ .name }}{{ $.top }}{{ end }}");
        assert_eq!(paths(&extraction), vec!["items", "top"]);
        assert!(extraction.errors.is_empty());
    }

    #[test]
    fn range_variables_end_with_the_range() {
        let extraction = extract_one(
            "{{ range .list }}{{ $name := .name }}{{ end }}{{ $name }}{{ .name }}",
        );
        assert_eq!(paths(&extraction), vec!["list", "name"]);
        assert_eq!(errors(&extraction), vec!["undefined variable `$name`"]);
    }

    #[test]
    fn captures_are_visible_in_else() {
        let extraction = extract_one(
            "{{ with $s := .service }}{{ $s.name }}{{ else }}{{ $s.port }}{{ end }}\
             {{ range $i, $v := .items }}{{ $v.id }}{{ else }}{{ len $v }}{{ end }}{{ $s }}",
        );
        assert_eq!(
            paths(&extraction),
            vec!["service", "service.name", "service.port", "items"]
        );
        assert_eq!(calls(&extraction), vec!["len"]);
        assert_eq!(errors(&extraction), vec!["undefined variable `$s`"]);
    }

    #[test]
    fn with_rebinds_context() {
        let extraction =
            extract_one("{{ with .service }}{{ .name }}{{ $.root }}{{ else }}{{ .fallback }}{{ end }}");
        assert_eq!(
            paths(&extraction),
            vec!["service", "service.name", "root", "fallback"]
        );
    }

    #[test]
    fn bound_variables_resolve() {
        let extraction = extract_one(
            r#"{{ $s := .service }}{{ $s.port }}{{ $d := .a | default "x" }}{{ $d.b }}{{ $s = .other }}{{ $s.c }}"#,
        );
        assert_eq!(
            paths(&extraction),
            vec!["service", "service.port", "a", "other", "other.c"]
        );
        assert_eq!(calls(&extraction), vec!["default"]);
    }

    #[test]
    fn calls_with_dynamic_arguments() {
        let extraction = extract_one(r#"{{ env (printf "%s" .a | upper) }}{{ (env "X").y }}"#);
        assert_eq!(calls(&extraction), vec!["env", "printf", "upper", "env"]);
        assert_eq!(paths(&extraction), vec!["a"]);
    }

    #[test]
    fn opaque_expressions_are_still_walked() {
        let extraction = extract_one("{{ .a + (lower .b) }}");
        assert_eq!(paths(&extraction), vec!["a", "b"]);
        assert_eq!(calls(&extraction), vec!["lower"]);
    }

    #[test]
    fn define_bodies_are_opaque() {
        let extraction =
            extract_one(r#"{{ $outer := 1 }}{{ define "x" }}{{ .name }}{{ lower "A" }}{{ $outer }}{{ end }}"#);
        assert!(paths(&extraction).is_empty());
        assert_eq!(calls(&extraction), vec!["lower"]);
        assert_eq!(errors(&extraction), vec!["undefined variable `$outer`"]);
    }

    #[test]
    fn includes_refine_defines_across_files() {
        let templates = templates! {
            "main.tpl" => r#"{{ include "svc" .service }}{{ template "svc" .other }}{{ include "svc" (dict) }}"#,
            "_helpers.tpl" => r#"{{ define "svc" }}{{ .name }}{{ $.port }}{{ end }}"#,
        };
        let extraction = extract(&templates, &templates.defines(), 0);

        let refs: Vec<(&str, usize)> = extraction
            .references
            .iter()
            .map(|r| (r.path.as_str(), r.file))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("service", 0),
                ("service.name", 1),
                ("service.port", 1),
                ("other", 0),
                ("other.name", 1),
                ("other.port", 1),
            ]
        );
    }

    #[test]
    fn recursive_includes_terminate() {
        let extraction = extract_one(
            r#"{{ define "r" }}{{ .x }}{{ include "r" . }}{{ end }}{{ include "r" . }}"#,
        );
        assert_eq!(paths(&extraction), vec!["x"]);
    }

    #[test]
    fn syntax_errors_are_carried() {
        let extraction = extract_one("{{ if .x }}{{ .y }}");
        assert_eq!(errors(&extraction), vec!["unclosed `if`: missing `end`"]);
        assert_eq!(paths(&extraction), vec!["x", "y"]);
    }
}
