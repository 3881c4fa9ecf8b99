mod config;
mod project;
mod scaffold;
mod test_runner;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use rocket_compiler::DiagnosticError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rocket", version, about = "Rocket documentation compiler")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log every compilation phase
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new project directory
    New(NewArgs),

    /// Compile a project's content into HTML pages
    Build(BuildArgs),

    /// Run .test.rocket test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct NewArgs {
    /// Project name; also the directory created
    name: String,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Project directory containing config.toml
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Compile and report errors without writing pages
    #[arg(long)]
    check: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.rocket file or directory containing them
    path: PathBuf,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::New(args) => match scaffold::create(&args.name) {
            Ok(root) => eprintln!("created project in {}", root.display()),
            Err(message) => {
                eprintln!("error: {}", message);
                process::exit(1);
            }
        },
        Command::Build(args) => do_build(args, cli.no_color),
        Command::Test(args) => {
            if args.list_categories {
                test_runner::list_categories(&args.path);
                return;
            }
            let exit_code = test_runner::run_tests(&args.path, cli.no_color, &args.category);
            process::exit(exit_code);
        }
    }
}

/// `--verbose` logs at debug level; otherwise `RUST_LOG` decides, falling
/// back to warnings only.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn do_build(args: BuildArgs, no_color: bool) {
    let project = match project::Project::open(&args.project) {
        Ok(project) => project,
        Err(message) => {
            eprintln!("error: {}", message);
            process::exit(1);
        }
    };

    match project.build(args.check, no_color) {
        Ok(summary) => {
            if args.check {
                eprintln!("ok: {} pages compiled", summary.pages);
            } else {
                eprintln!(
                    "ok: {} pages written to {}",
                    summary.pages,
                    project.output_dir().display()
                );
            }
        }
        Err(message) => {
            eprintln!("error: {}", message);
            process::exit(1);
        }
    }
}

fn color_choice(no_color: bool) -> ColorChoice {
    if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

/// Print every diagnostic to stderr with its source location.
pub(crate) fn emit_diagnostics(
    files: &SimpleFiles<String, String>,
    errors: &[DiagnosticError],
    no_color: bool,
) {
    let writer = StandardStream::stderr(color_choice(no_color));
    let config = term::Config::default();
    for error in errors {
        let diagnostic = error.to_diagnostic();
        if term::emit_to_write_style(&mut writer.lock(), &config, files, &diagnostic).is_err() {
            // The diagnostic points outside the known files.
            eprintln!("error: {}", error);
        }
    }
}
