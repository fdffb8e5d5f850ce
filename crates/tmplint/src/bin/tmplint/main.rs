mod cli;

use std::process::ExitCode;
use tmplint::lint::{Linter, Outcome};
use tmplint::policy::Policy;
use tmplint::template::Delimiters;
use tmplint::templates::Templates;
use tmplint::tree::{LayerKind, Layers, Override, ValueTree};

/// Configuration could not be loaded, nothing was linted
const EXIT_CONFIGURATION: u8 = 3;

fn main() -> ExitCode {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TMPLINT_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                return ExitCode::from(EXIT_CONFIGURATION);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    return ExitCode::from(EXIT_CONFIGURATION);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Lint(lint_cli) => lint(lint_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli).map(|()| ExitCode::SUCCESS),
    };

    match command_result {
        Ok(exit_code) => exit_code,
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            ExitCode::from(EXIT_CONFIGURATION)
        }
    }
}

pub fn lint(cli: cli::LintCommand) -> anyhow::Result<ExitCode> {
    let policy = policy(&cli.policy)?.compile()?;
    let templates = templates(&cli.templates)?;
    let tree = values(&cli.values, &templates)?;

    let report = Linter::new(&tree, &policy).lint(&templates);
    print!("{}", tmplint::report::render(&report, cli.format.into())?);

    Ok(match report.outcome {
        Outcome::Ok => ExitCode::SUCCESS,
        Outcome::Fail => ExitCode::from(1),
        Outcome::WarnOnly => ExitCode::from(2),
    })
}

/// Policy file first, flags on top
fn policy(args: &cli::PolicyArgs) -> anyhow::Result<Policy> {
    let mut policy = match &args.config {
        Some(path) => Policy::load_file(path)?,
        None => Policy::default(),
    };

    policy.merge(Policy {
        required_vars: args.required.iter().cloned().collect(),
        disallow_functions: args.disallowed.iter().cloned().collect(),
        exclude_globs: args.excludes.clone(),
        undefined_check_enabled: false,
        fail_on_warn: args.fail_on_warn,
        strict: args.strict,
    });

    tracing::debug!(?policy, "effective policy");
    Ok(policy)
}

fn templates(args: &cli::TemplateArgs) -> anyhow::Result<Templates> {
    anyhow::ensure!(
        !args.left_delimiter.is_empty() && !args.right_delimiter.is_empty(),
        "Delimiters must not be empty"
    );
    let mut templates = Templates::new(Delimiters::new(
        &args.left_delimiter,
        &args.right_delimiter,
    ));

    if args.paths.is_empty() {
        templates.load_directory(&std::env::current_dir()?, args.recursive)?;
    }

    for path in &args.paths {
        if path.is_dir() {
            templates.load_directory(path, args.recursive)?;
        } else {
            templates.load_file(path)?;
        }
    }

    Ok(templates)
}

fn values(args: &cli::ValueArgs, templates: &Templates) -> anyhow::Result<ValueTree> {
    let mut layers = Layers::default();

    if !args.no_defaults {
        layers.discover_defaults(&std::env::current_dir()?)?;
    }

    if let Some(data) = &args.data {
        layers.load_file(LayerKind::Primary, data)?;
    }

    for overlay in &args.overlays {
        layers.load_file(LayerKind::Overlay, overlay)?;
    }

    let mut overrides = vec![];
    for raw in &args.overrides {
        overrides.extend(Override::parse_list(raw)?);
    }
    layers.insert_overrides(&overrides);

    Ok(match &args.computed {
        Some(name) => layers.resolve_with_computed(&templates.defines(), name)?,
        None => layers.resolve(),
    })
}

/// (tmplint-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    match cli.command {
        Values {
            templates: template_args,
            values: value_args,
        } => {
            let templates = templates(&template_args)?;
            let tree = values(&value_args, &templates)?;
            serde_yaml::to_writer(std::io::stdout(), &tree)?;
        }
        Ast {
            templates: template_args,
        } => {
            let templates = templates(&template_args)?;
            for file in templates.files() {
                println!("# {}", file.path.display());
                println!("{:#?}", file.parsed);
            }
        }
    }

    Ok(())
}
