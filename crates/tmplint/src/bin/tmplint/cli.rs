//! tmplint cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; tmplint ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check templates against values and policy without rendering them
    ///
    /// Exits with 0 when there are no findings, 1 on errors (or warnings
    /// with --fail-on-warn), 2 when there are only warnings and 3 when the
    /// configuration could not be loaded.
    Lint(LintCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct LintCommand {
    #[clap(flatten)]
    pub templates: TemplateArgs,

    #[clap(flatten)]
    pub values: ValueArgs,

    #[clap(flatten)]
    pub policy: PolicyArgs,

    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct TemplateArgs {
    /// Template files or directories
    ///
    /// Directories are scanned for *.tpl, *.tmpl, *.gotmpl, *.yaml, *.yml
    /// and *.txt files. Defaults to the work directory.
    pub paths: Vec<PathBuf>,

    /// Scan directories recursively
    #[clap(short = 'r', long = "recursive")]
    pub recursive: bool,

    #[clap(long = "left-delim", default_value = "{{")]
    pub left_delimiter: String,

    #[clap(long = "right-delim", default_value = "}}")]
    pub right_delimiter: String,
}

#[derive(Parser, Debug)]
pub struct ValueArgs {
    /// Primary data file
    #[clap(short = 'd', long = "data")]
    pub data: Option<PathBuf>,

    /// Overlay values file, later files take precedence
    #[clap(short = 'f', long = "values")]
    pub overlays: Vec<PathBuf>,

    /// Set a value (a.b=c), several may be separated by `,`
    #[clap(long = "set")]
    pub overrides: Vec<String>,

    /// Merge the output of this named template on top of all other values
    #[clap(long = "computed")]
    pub computed: Option<String>,

    /// Do not load values.yaml from the work directory
    #[clap(long = "no-defaults")]
    pub no_defaults: bool,
}

#[derive(Parser, Debug)]
pub struct PolicyArgs {
    /// Policy file (yaml)
    #[clap(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Value path that must exist
    #[clap(long = "require")]
    pub required: Vec<String>,

    /// Function that must not be called
    #[clap(long = "disallow-function")]
    pub disallowed: Vec<String>,

    /// Never report undefined references matching this glob
    #[clap(long = "exclude")]
    pub excludes: Vec<String>,

    /// Report undefined references as errors
    #[clap(long = "strict")]
    pub strict: bool,

    /// Fail on warnings
    #[clap(long = "fail-on-warn")]
    pub fail_on_warn: bool,
}

#[derive(ValueEnum, Clone, Copy, Default, Debug)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Github,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => f.write_str("text"),
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Github => f.write_str("github"),
        }
    }
}

impl From<OutputFormat> for tmplint::report::Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => tmplint::report::Format::Text,
            OutputFormat::Json => tmplint::report::Format::Json,
            OutputFormat::Github => tmplint::report::Format::Github,
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Merged values with the layer each leaf came from
    Values {
        #[clap(flatten)]
        templates: TemplateArgs,

        #[clap(flatten)]
        values: ValueArgs,
    },
    /// Parsed templates
    Ast {
        #[clap(flatten)]
        templates: TemplateArgs,
    },
}
