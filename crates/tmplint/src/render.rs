//! minimal template executor
//!
//! Used to produce the computed value layer: a named sub-template is executed against the lower
//! layers and its output is read back as yaml. Only the subset of the language needed for that
//! is supported; anything else is a [RenderError].
use crate::template::{Base, Call, Expr, Literal, Location, Node, Pipeline, Range, With};
use crate::templates::DefineTable;
use crate::value::Value;

/// Maximum nesting of `template`/`include` invocations
const MAX_DEPTH: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("no template named `{0}`")]
    UnknownTemplate(String),

    #[error("{location}: function `{name}` is not supported")]
    UnknownFunction { name: String, location: Location },

    #[error("{location}: expression cannot be evaluated")]
    Unsupported { location: Location },

    #[error("{location}: variable `{name}` is not defined")]
    UndefinedVariable { name: String, location: Location },

    #[error("{location}: `{name}` expects {expected} arguments, got {got}")]
    Arguments {
        name: String,
        expected: &'static str,
        got: usize,
        location: Location,
    },

    #[error("{location}: {message}")]
    Invalid { message: String, location: Location },

    #[error("template invocations nested deeper than {MAX_DEPTH}")]
    TooDeep,
}

type Result<T> = std::result::Result<T, RenderError>;

enum Flow {
    Next,
    Break,
    Continue,
}

pub struct Renderer<'d> {
    defines: &'d DefineTable,
}

impl<'d> Renderer<'d> {
    pub fn new(defines: &'d DefineTable) -> Self {
        Self { defines }
    }

    /// Execute the sub-template `name` with `data` as `.` and `$`
    pub fn render_define(&self, name: &str, data: &Value) -> Result<String> {
        tracing::debug!(name, "rendering define");
        self.invoke(name, data.clone(), 0)
    }

    fn invoke(&self, name: &str, data: Value, depth: usize) -> Result<String> {
        if depth >= MAX_DEPTH {
            return Err(RenderError::TooDeep);
        }
        let definition = self
            .defines
            .get(name)
            .ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))?;

        let mut exec = Exec {
            renderer: self,
            depth,
            vars: vec![("$".to_string(), data.clone())],
            out: String::new(),
        };
        exec.nodes(&definition.define.body, &data)?;
        Ok(exec.out)
    }
}

/// State of one template invocation
struct Exec<'r, 'd> {
    renderer: &'r Renderer<'d>,
    depth: usize,
    /// visible variables, innermost last
    vars: Vec<(String, Value)>,
    out: String,
}

impl<'r, 'd> Exec<'r, 'd> {
    fn nodes(&mut self, nodes: &[Node], dot: &Value) -> Result<Flow> {
        for node in nodes {
            match self.node(node, dot)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn node(&mut self, node: &Node, dot: &Value) -> Result<Flow> {
        match node {
            Node::Text(text) => self.out.push_str(&text.text),
            Node::Action(action) => {
                let value = self.pipeline(&action.pipeline, dot)?;
                self.out.push_str(&value.to_string());
            }
            Node::If(node) => {
                let mark = self.vars.len();
                let mut flow = Flow::Next;
                let mut taken = false;
                for branch in &node.branches {
                    let value = self.pipeline(&branch.condition, dot)?;
                    if let Some(variable) = &branch.variable {
                        self.vars.push((variable.clone(), value.clone()));
                    }
                    if value.is_truthy() {
                        flow = self.nodes(&branch.body, dot)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    if let Some(otherwise) = &node.otherwise {
                        flow = self.nodes(otherwise, dot)?;
                    }
                }
                self.vars.truncate(mark);
                return Ok(flow);
            }
            Node::Range(range) => self.range(range, dot)?,
            Node::With(with) => return self.with(with, dot),
            Node::Bind(bind) => {
                let value = self.pipeline(&bind.pipeline, dot)?;
                if bind.declare {
                    self.vars.push((bind.variable.clone(), value));
                } else {
                    let slot = self
                        .vars
                        .iter_mut()
                        .rev()
                        .find(|(name, _)| *name == bind.variable)
                        .ok_or_else(|| RenderError::UndefinedVariable {
                            name: bind.variable.clone(),
                            location: bind.location,
                        })?;
                    slot.1 = value;
                }
            }
            Node::Include(include) => {
                let data = match &include.data {
                    Some(pipeline) => self.pipeline(pipeline, dot)?,
                    None => Value::Null,
                };
                let rendered = self.renderer.invoke(&include.name, data, self.depth + 1)?;
                self.out.push_str(&rendered);
            }
            Node::Break(_) => return Ok(Flow::Break),
            Node::Continue(_) => return Ok(Flow::Continue),
            Node::Define(_) | Node::Comment(_) => {}
        }
        Ok(Flow::Next)
    }

    fn range(&mut self, range: &Range, dot: &Value) -> Result<()> {
        let source = self.pipeline(&range.source, dot)?;
        let elements: Vec<(Value, Value)> = match source.clone() {
            Value::Array(array) => array
                .into_iter()
                .enumerate()
                .map(|(idx, element)| (Value::Integer(idx as i64), element))
                .collect(),
            Value::Object(object) => {
                let mut entries: Vec<(String, Value)> = object.into_iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                entries
                    .into_iter()
                    .map(|(key, value)| (Value::String(key), value))
                    .collect()
            }
            Value::Integer(count) => (0..count.max(0))
                .map(|idx| (Value::Integer(idx), Value::Integer(idx)))
                .collect(),
            Value::Null => vec![],
            other => {
                return Err(RenderError::Invalid {
                    message: format!("cannot range over {}", other.type_name()),
                    location: range.location,
                })
            }
        };

        if elements.is_empty() {
            if let Some(otherwise) = &range.otherwise {
                // declared variables hold the ranged value until `end`
                let mark = self.vars.len();
                for variable in [&range.key, &range.value].into_iter().flatten() {
                    self.vars.push((variable.clone(), source.clone()));
                }
                let flow = self.nodes(otherwise, dot);
                self.vars.truncate(mark);
                flow?;
            }
            return Ok(());
        }

        for (key, element) in elements {
            let mark = self.vars.len();
            match (&range.key, &range.value) {
                (Some(key_var), Some(value_var)) => {
                    self.vars.push((key_var.clone(), key));
                    self.vars.push((value_var.clone(), element.clone()));
                }
                (None, Some(value_var)) => self.vars.push((value_var.clone(), element.clone())),
                _ => {}
            }
            let flow = self.nodes(&range.body, &element);
            self.vars.truncate(mark);
            if let Flow::Break = flow? {
                break;
            }
        }
        Ok(())
    }

    fn with(&mut self, with: &With, dot: &Value) -> Result<Flow> {
        let target = self.pipeline(&with.target, dot)?;
        let mark = self.vars.len();
        if let Some(variable) = &with.variable {
            self.vars.push((variable.clone(), target.clone()));
        }

        let flow = if target.is_truthy() {
            self.nodes(&with.body, &target)
        } else {
            match &with.otherwise {
                Some(otherwise) => self.nodes(otherwise, dot),
                None => Ok(Flow::Next),
            }
        };
        self.vars.truncate(mark);
        flow
    }

    fn pipeline(&mut self, pipeline: &Pipeline, dot: &Value) -> Result<Value> {
        let mut piped = None;
        for stage in &pipeline.stages {
            piped = Some(self.stage(stage, dot, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    /// Evaluate one pipeline stage; the previous result is passed as last argument
    fn stage(&mut self, expr: &Expr, dot: &Value, piped: Option<Value>) -> Result<Value> {
        match (expr, piped) {
            (Expr::Call(call), piped) => self.call(call, dot, piped),
            (expr, None) => self.expr(expr, dot),
            (expr, Some(_)) => Err(RenderError::Invalid {
                message: "only functions can receive piped values".to_string(),
                location: expr.location(),
            }),
        }
    }

    fn expr(&mut self, expr: &Expr, dot: &Value) -> Result<Value> {
        match expr {
            Expr::Field(field) => {
                let base = match &field.base {
                    Base::Dot => dot.clone(),
                    Base::Variable(name) => self.variable(name, field.location)?,
                    Base::Expr(inner) => self.expr(inner, dot)?,
                };
                // missing fields are empty
                Ok(base
                    .lookup(field.steps.iter().map(String::as_str))
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Expr::Variable(var) => self.variable(&var.name, var.location),
            Expr::Literal(literal, _) => Ok(match literal {
                Literal::String(s) => Value::String(s.clone()),
                Literal::Number(n) => Value::infer(n),
                Literal::Bool(b) => Value::Boolean(*b),
                Literal::Nil => Value::Null,
            }),
            Expr::Pipeline(pipeline) => self.pipeline(pipeline, dot),
            Expr::Call(call) => self.call(call, dot, None),
            Expr::Opaque(opaque) => Err(RenderError::Unsupported {
                location: opaque.location,
            }),
        }
    }

    fn variable(&self, name: &str, location: Location) -> Result<Value> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| RenderError::UndefinedVariable {
                name: name.to_string(),
                location,
            })
    }

    fn call(&mut self, call: &Call, dot: &Value, piped: Option<Value>) -> Result<Value> {
        let mut args = call
            .args
            .iter()
            .map(|arg| self.expr(arg, dot))
            .collect::<Result<Vec<_>>>()?;
        args.extend(piped);

        let name = call.function.as_str();
        let got = args.len();
        let arity = |expected: &'static str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(RenderError::Arguments {
                    name: name.to_string(),
                    expected,
                    got,
                    location: call.location,
                })
            }
        };

        let value = match name {
            "quote" | "squote" => {
                let quote = if name == "quote" { '"' } else { '\'' };
                let quoted: Vec<String> = args
                    .iter()
                    .map(|arg| format!("{quote}{arg}{quote}"))
                    .collect();
                Value::String(quoted.join(" "))
            }
            "default" => {
                arity("2", args.len() == 2)?;
                let given = args.pop().unwrap_or(Value::Null);
                let fallback = args.pop().unwrap_or(Value::Null);
                if given.is_truthy() {
                    given
                } else {
                    fallback
                }
            }
            "empty" | "not" => {
                arity("1", args.len() == 1)?;
                Value::Boolean(!args[0].is_truthy())
            }
            "and" => {
                arity("at least 1", !args.is_empty())?;
                let idx = args
                    .iter()
                    .position(|arg| !arg.is_truthy())
                    .unwrap_or(args.len() - 1);
                args.swap_remove(idx)
            }
            "or" => {
                arity("at least 1", !args.is_empty())?;
                let idx = args
                    .iter()
                    .position(Value::is_truthy)
                    .unwrap_or(args.len() - 1);
                args.swap_remove(idx)
            }
            "eq" => {
                arity("at least 2", args.len() >= 2)?;
                Value::Boolean(args[1..].iter().any(|other| *other == args[0]))
            }
            "ne" => {
                arity("2", args.len() == 2)?;
                Value::Boolean(args[0] != args[1])
            }
            "len" => {
                arity("1", args.len() == 1)?;
                let len = match &args[0] {
                    Value::String(s) => s.chars().count(),
                    Value::Array(array) => array.len(),
                    Value::Object(object) => object.len(),
                    Value::Null => 0,
                    other => {
                        return Err(RenderError::Invalid {
                            message: format!("len of {}", other.type_name()),
                            location: call.location,
                        })
                    }
                };
                Value::Integer(len as i64)
            }
            "upper" | "lower" | "trim" => {
                arity("1", args.len() == 1)?;
                let text = args[0].to_string();
                Value::String(match name {
                    "upper" => text.to_uppercase(),
                    "lower" => text.to_lowercase(),
                    _ => text.trim().to_string(),
                })
            }
            "print" => Value::String(sprint(&args)),
            "toJson" => {
                arity("1", args.len() == 1)?;
                let json =
                    serde_json::to_string(&args[0]).map_err(|error| RenderError::Invalid {
                        message: error.to_string(),
                        location: call.location,
                    })?;
                Value::String(json)
            }
            "toYaml" => {
                arity("1", args.len() == 1)?;
                let yaml =
                    serde_yaml::to_string(&args[0]).map_err(|error| RenderError::Invalid {
                        message: error.to_string(),
                        location: call.location,
                    })?;
                Value::String(yaml.trim_end_matches('\n').to_string())
            }
            "indent" | "nindent" => {
                arity("2", args.len() == 2)?;
                let width = match &args[0] {
                    Value::Integer(width) if *width >= 0 => *width as usize,
                    other => {
                        return Err(RenderError::Invalid {
                            message: format!("indent width must be a positive integer, got {other}"),
                            location: call.location,
                        })
                    }
                };
                let pad = " ".repeat(width);
                let text = args[1].to_string().replace('\n', &format!("\n{pad}"));
                let indented = format!("{pad}{text}");
                Value::String(if name == "nindent" {
                    format!("\n{indented}")
                } else {
                    indented
                })
            }
            "include" => {
                arity("2", args.len() == 2)?;
                let data = args.pop().unwrap_or(Value::Null);
                let Some(Value::String(template)) = args.pop() else {
                    return Err(RenderError::Invalid {
                        message: "include needs a template name".to_string(),
                        location: call.location,
                    });
                };
                Value::String(self.renderer.invoke(&template, data, self.depth + 1)?)
            }
            _ => {
                return Err(RenderError::UnknownFunction {
                    name: name.to_string(),
                    location: call.location,
                })
            }
        };
        Ok(value)
    }
}

/// Spaces are added between operands when neither is a string
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (idx, arg) in args.iter().enumerate() {
        let is_string = |value: &Value| matches!(value, Value::String(_));
        if idx > 0 && !is_string(arg) && !is_string(&args[idx - 1]) {
            out.push(' ');
        }
        out.push_str(&arg.to_string());
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::templates;
    use pretty_assertions::assert_eq;

    fn render(text: &str, data: &str) -> Result<String> {
        let templates = templates! { "t.tpl" => format!(r#"{{{{ define "t" }}}}{text}{{{{ end }}}}"#) };
        assert_eq!(templates.get(0).parsed.errors, vec![]);
        let data: serde_yaml::Value = serde_yaml::from_str(data).unwrap();
        Renderer::new(&templates.defines()).render_define("t", &Value::from(data))
    }

    #[test]
    fn fields_and_text() {
        assert_eq!(
            render("name: {{ .service.name }}{{ .missing.deep }}", "service: {name: web}").unwrap(),
            "name: web"
        );
    }

    #[test]
    fn conditionals() {
        let text = "{{ if .a }}a{{ else if .b }}b{{ else }}c{{ end }}";
        assert_eq!(render(text, "a: 1").unwrap(), "a");
        assert_eq!(render(text, "b: yes").unwrap(), "b");
        assert_eq!(render(text, "a: 0").unwrap(), "c");
    }

    #[test]
    fn range_and_variables() {
        let text = "{{ range $i, $v := .items }}{{ $i }}={{ $v }};{{ end }}{{ range .empty }}x{{ else }}none{{ end }}";
        assert_eq!(render(text, "items: [a, b]\nempty: []").unwrap(), "0=a;1=b;none");

        let text = "{{ range $k, $v := .map }}{{ $k }}:{{ $v }} {{ end }}";
        assert_eq!(render(text, "map: {b: 2, a: 1}").unwrap(), "a:1 b:2 ");
    }

    #[test]
    fn break_and_continue() {
        let text = "{{ range .n }}{{ if eq . 1 }}{{ continue }}{{ end }}{{ if eq . 3 }}{{ break }}{{ end }}{{ . }}{{ end }}";
        assert_eq!(render(text, "n: [0, 1, 2, 3, 4]").unwrap(), "02");
    }

    #[test]
    fn with_and_root() {
        let text = "{{ with .svc }}{{ .name }}-{{ $.env }}{{ else }}none{{ end }}";
        assert_eq!(render(text, "svc: {name: web}\nenv: prod").unwrap(), "web-prod");
        assert_eq!(render(text, "env: prod").unwrap(), "none");
    }

    #[test]
    fn captures_are_visible_in_else() {
        let text = "{{ with $x := .flag }}yes{{ else }}{{ $x }}{{ end }}";
        assert_eq!(render(text, "flag: false").unwrap(), "false");

        let text = "{{ range $i, $v := .items }}{{ $v }}{{ else }}{{ len $v }}{{ end }}";
        assert_eq!(render(text, "items: []").unwrap(), "0");
    }

    #[test]
    fn pipelines_and_functions() {
        assert_eq!(
            render(r#"{{ .missing | default "x" | upper | quote }}"#, "{}").unwrap(),
            r#""X""#
        );
        assert_eq!(
            render(r#"{{ $x := 1 }}{{ $x = 2 }}{{ $x }} {{ len .l }} {{ not .t }} {{ or .f "y" }}"#, "l: [1, 2, 3]\nt: true\nf: false").unwrap(),
            "2 3 false y"
        );
        assert_eq!(
            render("{{ .m | toJson }}{{ .m | toYaml | nindent 2 }}", "m: {a: 1}").unwrap(),
            "{\"a\":1}\n  a: 1"
        );
    }

    #[test]
    fn includes() {
        let templates = templates! {
            "t.tpl" => r#"{{ define "outer" }}[{{ include "inner" .x }}|{{ template "inner" .y }}]{{ end }}"#,
            "_h.tpl" => r#"{{ define "inner" }}{{ . }}{{ end }}"#,
        };
        let data = Value::from(serde_yaml::from_str::<serde_yaml::Value>("{x: 1, y: 2}").unwrap());
        assert_eq!(
            Renderer::new(&templates.defines())
                .render_define("outer", &data)
                .unwrap(),
            "[1|2]"
        );
    }

    #[test]
    fn errors() {
        assert!(matches!(
            render("{{ env \"HOME\" }}", "{}"),
            Err(RenderError::UnknownFunction { .. })
        ));
        assert!(matches!(
            render("{{ .a + 1 }}", "{}"),
            Err(RenderError::Unsupported { .. })
        ));
        assert!(matches!(
            render("{{ $y }}", "{}"),
            Err(RenderError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn recursion_is_bounded() {
        let templates = templates! { "t.tpl" => r#"{{ define "r" }}{{ include "r" . }}{{ end }}"# };
        assert!(matches!(
            Renderer::new(&templates.defines()).render_define("r", &Value::Null),
            Err(RenderError::TooDeep)
        ));
    }
}
