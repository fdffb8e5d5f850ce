//! diagnostics
//!
//! Cross references what [extract] found in each template with the [ValueTree] and the
//! [CompiledPolicy] and turns it into an ordered list of [Finding]s plus an [Outcome].
use crate::extract::{extract, Extraction};
use crate::policy::CompiledPolicy;
use crate::template::Location;
use crate::templates::{DefineTable, Templates};
use crate::tree::ValueTree;
use rayon::prelude::*;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum Code {
    SyntaxError,
    UndefinedReference,
    DisallowedFunction,
    MissingRequiredVar,
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Code::SyntaxError => "SyntaxError",
            Code::UndefinedReference => "UndefinedReference",
            Code::DisallowedFunction => "DisallowedFunction",
            Code::MissingRequiredVar => "MissingRequiredVar",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: Code,
    /// canonical path, function name or syntax error message
    pub subject: String,
    pub message: String,
    pub suggestion: Option<String>,
    pub file: Option<PathBuf>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    WarnOnly,
    Fail,
}

impl Outcome {
    pub fn of(findings: &[Finding], policy: &CompiledPolicy) -> Self {
        if findings.is_empty() {
            Outcome::Ok
        } else if findings.iter().any(|f| f.severity == Severity::Error) || policy.fail_on_warn()
        {
            Outcome::Fail
        } else {
            Outcome::WarnOnly
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ok => f.write_str("ok"),
            Outcome::WarnOnly => f.write_str("warnings only"),
            Outcome::Fail => f.write_str("fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Report {
    pub outcome: Outcome,
    pub findings: Vec<Finding>,
}

impl Report {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

#[derive(derive_new::new)]
pub struct Linter<'a> {
    tree: &'a ValueTree,
    policy: &'a CompiledPolicy,
    /// suggestion candidates
    #[new(value = "tree.paths()")]
    paths: Vec<String>,
}

impl<'a> Linter<'a> {
    /// Lint all loaded templates
    #[tracing::instrument(level = "debug", skip_all, fields(files = templates.files().len()))]
    pub fn lint(&self, templates: &Templates) -> Report {
        let defines = templates.defines();
        tracing::debug!(defines = defines.len(), "collected defines");

        let mut ordered: Vec<(usize, Location, Finding)> = (0..templates.files().len())
            .into_par_iter()
            .map(|file| self.lint_file(templates, &defines, file))
            .flatten()
            .collect();

        // a define included from several files yields the same finding more than once
        ordered.sort_by(|(a_file, a_location, a), (b_file, b_location, b)| {
            (a_file, a_location, a.code, &a.subject).cmp(&(b_file, b_location, b.code, &b.subject))
        });
        ordered.dedup_by(|(a_file, a_location, a), (b_file, b_location, b)| {
            (a_file, a_location, a.code, &a.subject) == (b_file, b_location, b.code, &b.subject)
        });

        let mut findings: Vec<Finding> = ordered.into_iter().map(|(_, _, f)| f).collect();
        findings.extend(self.required());

        let outcome = Outcome::of(&findings, self.policy);
        tracing::info!(findings = findings.len(), %outcome, "lint finished");
        Report { outcome, findings }
    }

    /// Findings of one file, keyed by (file, location) for ordering
    ///
    /// The file of a finding may differ from `file` when a define of another file was analysed
    /// through an include.
    fn lint_file(
        &self,
        templates: &Templates,
        defines: &DefineTable,
        file: usize,
    ) -> Vec<(usize, Location, Finding)> {
        let Extraction {
            references,
            calls,
            errors,
        } = extract(templates, defines, file);
        let path_of = |file: usize| Some(templates.get(file).path.clone());

        let syntax = errors.into_iter().map(|error| {
            let finding = Finding {
                severity: Severity::Error,
                code: Code::SyntaxError,
                subject: error.error.message.clone(),
                message: error.error.message,
                suggestion: None,
                file: path_of(error.file),
                location: Some(error.error.location),
            };
            (error.file, error.error.location, finding)
        });

        let undefined = references
            .into_iter()
            .filter(|reference| !self.tree.exists(&reference.path))
            .filter(|reference| !self.policy.is_excluded(&reference.path))
            .map(|reference| {
                let severity = if self.policy.undefined_is_error() {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                let finding = Finding {
                    severity,
                    code: Code::UndefinedReference,
                    message: format!("`.{}` is not defined in the values", reference.path),
                    suggestion: Some(self.suggest(&reference.path)),
                    subject: reference.path,
                    file: path_of(reference.file),
                    location: Some(reference.location),
                };
                (reference.file, reference.location, finding)
            });

        let disallowed = calls
            .into_iter()
            .filter(|call| self.policy.is_disallowed(&call.function))
            .map(|call| {
                let finding = Finding {
                    severity: Severity::Error,
                    code: Code::DisallowedFunction,
                    message: format!("function `{}` is not allowed", call.function),
                    suggestion: Some(format!("remove the call to `{}`", call.function)),
                    subject: call.function,
                    file: path_of(call.file),
                    location: Some(call.location),
                };
                (call.file, call.location, finding)
            });

        syntax.chain(undefined).chain(disallowed).collect()
    }

    /// Required values are a data contract, checked whether referenced or not
    fn required(&self) -> Vec<Finding> {
        self.policy
            .required_vars()
            .filter(|path| !self.tree.exists(path))
            .map(|path| Finding {
                severity: Severity::Error,
                code: Code::MissingRequiredVar,
                subject: path.to_string(),
                message: format!("required value `{path}` is missing"),
                suggestion: Some(self.suggest(path)),
                file: None,
                location: None,
            })
            .collect()
    }

    fn suggest(&self, path: &str) -> String {
        match find_closest(path, &self.paths) {
            Some(closest) => format!("did you mean `.{closest}`?"),
            None => format!("set `{path}` in a values file or with `--set {path}=...`"),
        }
    }
}

fn find_closest<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|c| {
            let dist = strsim::levenshtein(target, c);
            if dist <= 3 {
                Some((c.as_str(), dist))
            } else {
                None
            }
        })
        .min_by_key(|(_, d)| *d)
        .map(|(s, _)| s)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::policy::Policy;
    use crate::templates;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn tree(yaml: &str) -> ValueTree {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        ValueTree::new(Value::from(value))
    }

    fn lint(templates: &Templates, values: &str, policy: Policy) -> Report {
        let tree = tree(values);
        let policy = policy.compile().unwrap();
        Linter::new(&tree, &policy).lint(templates)
    }

    fn strict() -> Policy {
        Policy {
            undefined_check_enabled: true,
            ..Default::default()
        }
    }

    fn summary(report: &Report) -> Vec<(Code, &str)> {
        report
            .findings
            .iter()
            .map(|f| (f.code, f.subject.as_str()))
            .collect()
    }

    #[test]
    fn undefined_reference() {
        let templates = templates! { "hello.tpl" => "Hello {{ .name }}!" };
        let report = lint(&templates, "{}", strict());

        assert_eq!(
            report.findings,
            vec![Finding {
                severity: Severity::Error,
                code: Code::UndefinedReference,
                subject: "name".to_string(),
                message: "`.name` is not defined in the values".to_string(),
                suggestion: Some("set `name` in a values file or with `--set name=...`".to_string()),
                file: Some(PathBuf::from("hello.tpl")),
                location: Some(Location { line: 1, column: 10 }),
            }]
        );
        assert_eq!(report.outcome, Outcome::Fail);
    }

    #[test]
    fn undefined_reference_is_a_warning_by_default() {
        let templates = templates! { "hello.tpl" => "Hello {{ .name }}!" };

        let report = lint(&templates, "{}", Policy::default());
        assert_eq!(report.findings[0].severity, Severity::Warning);
        assert_eq!(report.outcome, Outcome::WarnOnly);

        let fail_on_warn = Policy {
            fail_on_warn: true,
            ..Default::default()
        };
        assert_eq!(lint(&templates, "{}", fail_on_warn).outcome, Outcome::Fail);
    }

    #[test]
    fn guarded_references_are_reported() {
        let templates = templates! { "t.tpl" => "{{ if .flag }}{{ .inner }}{{ end }}" };
        let report = lint(&templates, "flag: true", strict());
        assert_eq!(summary(&report), vec![(Code::UndefinedReference, "inner")]);
    }

    #[test]
    fn disallowed_function_with_dynamic_arguments() {
        let templates = templates! { "t.tpl" => r#"{{ env "HOME" }}{{ env (printf "%s" $.x.y) | upper }}"# };
        let policy = Policy {
            disallow_functions: BTreeSet::from(["env".to_string()]),
            ..Default::default()
        };
        let report = lint(&templates, "x: {y: 1}", policy);

        assert_eq!(
            summary(&report),
            vec![
                (Code::DisallowedFunction, "env"),
                (Code::DisallowedFunction, "env")
            ]
        );
        assert_eq!(report.outcome, Outcome::Fail);
    }

    #[test]
    fn missing_required_var_without_reference() {
        let templates = templates! { "t.tpl" => "static" };
        let policy = Policy {
            required_vars: BTreeSet::from(["service.name".to_string(), "service.replicas".to_string()]),
            ..Default::default()
        };
        let report = lint(&templates, "service: {replicas: 3}", policy);

        assert_eq!(
            summary(&report),
            vec![(Code::MissingRequiredVar, "service.name")]
        );
        assert_eq!(report.findings[0].file, None);
        assert_eq!(report.outcome, Outcome::Fail);
    }

    #[test]
    fn range_elements_are_not_shape_checked() {
        let templates = templates! { "t.tpl" => "{{ range $i, $v := .items }}{{ $v.id }}{{ end }}" };
        let report = lint(&templates, "items: [{name: a}]", strict());
        assert_eq!(report.findings, vec![]);
        assert_eq!(report.outcome, Outcome::Ok);
    }

    #[test]
    fn syntax_errors_do_not_stop_other_files() {
        let templates = templates! {
            "bad.tpl" => "{{ if .x }}",
            "good.tpl" => "{{ .missing }}",
        };
        let report = lint(&templates, "x: 1", Policy::default());

        assert_eq!(
            summary(&report),
            vec![
                (Code::SyntaxError, "unclosed `if`: missing `end`"),
                (Code::UndefinedReference, "missing"),
            ]
        );
        assert_eq!(report.findings[0].severity, Severity::Error);
        assert_eq!(report.outcome, Outcome::Fail);
    }

    #[test]
    fn excluded_paths() {
        let templates = templates! { "t.tpl" => "{{ .global.region }}{{ .local }}" };
        let policy = Policy {
            exclude_globs: vec!["global.*".to_string()],
            ..strict()
        };
        let report = lint(&templates, "{}", policy);
        assert_eq!(summary(&report), vec![(Code::UndefinedReference, "local")]);
    }

    #[test]
    fn suggestions() {
        let templates = templates! { "t.tpl" => "{{ .service.nme }}" };
        let report = lint(&templates, "service: {name: web}", strict());
        assert_eq!(
            report.findings[0].suggestion.as_deref(),
            Some("did you mean `.service.name`?")
        );
    }

    #[test]
    fn everything_resolves() {
        let templates = templates! {
            "main.tpl" => r#"{{ with .service }}{{ .name }}{{ end }}{{ include "port" .service }}"#,
            "_helpers.tpl" => r#"{{ define "port" }}{{ .port | quote }}{{ end }}"#,
        };
        let report = lint(&templates, "service: {name: web, port: 80}", strict());
        assert_eq!(report.findings, vec![]);
        assert_eq!(report.outcome, Outcome::Ok);
    }

    #[test]
    fn else_branches_see_captured_variables() {
        let templates = templates! {
            "main.tpl" => "{{ range $i, $v := .items }}{{ $v }}{{ else }}{{ $v }}{{ end }}\
                           {{ with $x := .a }}{{ $x }}{{ else }}{{ $x }}{{ end }}",
        };
        let report = lint(&templates, "items: [1]\na: 1", strict());
        assert_eq!(report.findings, vec![]);
        assert_eq!(report.outcome, Outcome::Ok);
    }

    #[test]
    fn shared_define_is_reported_once() {
        let templates = templates! {
            "a.tpl" => r#"{{ include "svc" .service }}"#,
            "b.tpl" => r#"{{ template "svc" .service }}"#,
            "_helpers.tpl" => r#"{{ define "svc" }}{{ .missing }}{{ end }}"#,
        };
        let report = lint(&templates, "service: {}", strict());

        assert_eq!(
            summary(&report),
            vec![(Code::UndefinedReference, "service.missing")]
        );
        assert_eq!(
            report.findings[0].file,
            Some(PathBuf::from("_helpers.tpl"))
        );
    }

    #[test]
    fn repeated_runs_are_identical() {
        let templates = templates! {
            "a.tpl" => "{{ .z }}{{ .a }}{{ end }}",
            "b.tpl" => "{{ .y }}",
        };
        let first = lint(&templates, "{}", strict());
        let second = lint(&templates, "{}", strict());
        assert_eq!(first, second);
        assert_eq!(
            summary(&first),
            vec![
                (Code::UndefinedReference, "z"),
                (Code::UndefinedReference, "a"),
                (Code::SyntaxError, "unexpected `end`"),
                (Code::UndefinedReference, "y"),
            ]
        );
    }
}
