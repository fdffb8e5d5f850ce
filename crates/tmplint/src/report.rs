//! output formats for a lint [Report]
//!
//! Pure projections: nothing here looks at templates or values.
use crate::lint::{Finding, Report, Severity};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// human readable, grouped by file
    #[default]
    Text,
    /// `{ outcome, findings }` document
    Json,
    /// github actions workflow commands
    Github,
}

pub fn render(report: &Report, format: Format) -> Result<String, serde_json::Error> {
    Ok(match format {
        Format::Text => text(report),
        Format::Json => {
            let mut json = serde_json::to_string_pretty(report)?;
            json.push('\n');
            json
        }
        Format::Github => github(report),
    })
}

fn text(report: &Report) -> String {
    let mut out = String::new();
    let mut current: Option<Option<&Path>> = None;

    for finding in &report.findings {
        let file = finding.file.as_deref();
        if current != Some(file) {
            if current.is_some() {
                out.push('\n');
            }
            let header = match file {
                Some(path) => path.display().to_string(),
                None => "(values)".to_string(),
            };
            out.push_str(&format!("{header}\n"));
            current = Some(file);
        }

        let location = finding
            .location
            .map(|location| location.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  {location} {}[{}] {}\n",
            finding.severity, finding.code, finding.message
        ));
        if let Some(suggestion) = &finding.suggestion {
            out.push_str(&format!("    help: {suggestion}\n"));
        }
    }

    if !report.findings.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!(
        "{}, {}: {}\n",
        plural(report.count(Severity::Error), "error"),
        plural(report.count(Severity::Warning), "warning"),
        report.outcome
    ));
    out
}

fn plural(count: usize, noun: &str) -> String {
    match count {
        1 => format!("1 {noun}"),
        n => format!("{n} {noun}s"),
    }
}

fn github(report: &Report) -> String {
    report.findings.iter().map(annotation).collect()
}

/// `::error file=a.tpl,line=1,col=4,title=UndefinedReference::message`
fn annotation(finding: &Finding) -> String {
    let level = match finding.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };

    let mut properties = vec![];
    if let Some(file) = &finding.file {
        properties.push(format!("file={}", escape_property(&file.display().to_string())));
    }
    if let Some(location) = finding.location {
        properties.push(format!("line={}", location.line));
        properties.push(format!("col={}", location.column));
    }
    properties.push(format!("title={}", finding.code));

    let mut message = finding.message.clone();
    if let Some(suggestion) = &finding.suggestion {
        message.push_str("\nhelp: ");
        message.push_str(suggestion);
    }

    format!(
        "::{level} {}::{}\n",
        properties.join(","),
        escape_data(&message)
    )
}

fn escape_data(text: &str) -> String {
    text.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn escape_property(text: &str) -> String {
    escape_data(text).replace(':', "%3A").replace(',', "%2C")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lint::{Code, Outcome};
    use crate::template::Location;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn report() -> Report {
        Report {
            outcome: Outcome::Fail,
            findings: vec![
                Finding {
                    severity: Severity::Warning,
                    code: Code::UndefinedReference,
                    subject: "name".to_string(),
                    message: "`.name` is not defined in the values".to_string(),
                    suggestion: Some("did you mean `.names`?".to_string()),
                    file: Some(PathBuf::from("main.tpl")),
                    location: Some(Location { line: 1, column: 10 }),
                },
                Finding {
                    severity: Severity::Error,
                    code: Code::MissingRequiredVar,
                    subject: "a,b".to_string(),
                    message: "required value `a,b` is missing".to_string(),
                    suggestion: None,
                    file: None,
                    location: None,
                },
            ],
        }
    }

    #[test]
    fn text_format() {
        assert_eq!(
            render(&report(), Format::Text).unwrap(),
            "\
main.tpl
  1:10 warning[UndefinedReference] `.name` is not defined in the values
    help: did you mean `.names`?

(values)
  - error[MissingRequiredVar] required value `a,b` is missing

1 error, 1 warning: fail
"
        );
    }

    #[test]
    fn empty_text_report() {
        let report = Report {
            outcome: Outcome::Ok,
            findings: vec![],
        };
        assert_eq!(
            render(&report, Format::Text).unwrap(),
            "0 errors, 0 warnings: ok\n"
        );
    }

    #[test]
    fn json_format() {
        let json: serde_json::Value =
            serde_json::from_str(&render(&report(), Format::Json).unwrap()).unwrap();

        assert_eq!(json["outcome"], "fail");
        assert_eq!(json["findings"][0]["severity"], "warning");
        assert_eq!(json["findings"][0]["code"], "UndefinedReference");
        assert_eq!(json["findings"][0]["location"]["column"], 10);
        assert_eq!(json["findings"][1]["file"], serde_json::Value::Null);
    }

    #[test]
    fn github_format() {
        assert_eq!(
            render(&report(), Format::Github).unwrap(),
            "\
::warning file=main.tpl,line=1,col=10,title=UndefinedReference::`.name` is not defined in the values%0Ahelp: did you mean `.names`?
::error title=MissingRequiredVar::required value `a,b` is missing
"
        );
    }

    #[test]
    fn github_escaping() {
        assert_eq!(escape_data("50%\r\n"), "50%25%0D%0A");
        assert_eq!(escape_property("a:b,c"), "a%3Ab%2Cc");
    }
}
