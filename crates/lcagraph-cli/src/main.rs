//! lcagraph CLI
//!
//! Command-line front end for the model compiler:
//! - `check`: compile a model configuration and report diagnostics
//! - `compile`: print (or emit as JSON) the compiled activity graph
//! - `processes`: list the activities of a compiled model depth-first
//! - `params`: list the parameters a model exposes

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use lcagraph_model::{
    compile_model, process_table, CompiledModel, CompilerOptions, Diagnostic, ModelConfig,
    ParamValue, ReferenceDb,
};
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Parser)]
#[command(name = "lcagraph")]
#[command(
    author,
    version,
    about = "lcagraph: compile declarative LCA models into parameterized activity graphs"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a model and report diagnostics without printing the graph.
    Check {
        #[command(flatten)]
        input: ModelInput,
        /// Treat diagnostics as errors.
        #[arg(long)]
        strict: bool,
    },

    /// Compile a model and print its activities and symbolic exchanges.
    Compile {
        #[command(flatten)]
        input: ModelInput,
        /// Emit the compiled model as JSON.
        #[arg(long)]
        json: bool,
        /// Write output to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Evaluate every exchange with `name=value` bindings (repeatable).
        /// Unset parameters take their defaults.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },

    /// List the activities of a compiled model, depth-first.
    Processes {
        #[command(flatten)]
        input: ModelInput,
        /// Also list background inputs of the copied activities.
        #[arg(long)]
        all: bool,
        /// Emit rows as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the parameters of a compiled model.
    Params {
        #[command(flatten)]
        input: ModelInput,
        /// Emit parameters as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ModelInput {
    /// Model configuration (YAML)
    config: PathBuf,
    /// Background reference data (JSON)
    #[arg(short, long)]
    reference: PathBuf,
    /// Name of the foreground namespace
    #[arg(long, default_value = "Foreground DB")]
    foreground: String,
}

impl ModelInput {
    fn options(&self) -> CompilerOptions {
        CompilerOptions {
            foreground: self.foreground.clone(),
            ..CompilerOptions::default()
        }
    }

    fn compile(&self) -> Result<CompiledModel> {
        let config = ModelConfig::from_path(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        let reference = ReferenceDb::from_path(&self.reference)
            .with_context(|| format!("failed to load {}", self.reference.display()))?;
        tracing::debug!(
            config = %self.config.display(),
            databases = reference.databases().count(),
            "compiling model"
        );
        compile_model(&config, &reference, &self.options())
            .with_context(|| format!("failed to compile {}", self.config.display()))
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { input, strict } => cmd_check(&input, strict),
        Commands::Compile {
            input,
            json,
            out,
            set,
        } => cmd_compile(&input, json, out.as_deref(), &set),
        Commands::Processes { input, all, json } => cmd_processes(&input, all, json),
        Commands::Params { input, json } => cmd_params(&input, json),
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{} {}", "warning:".yellow().bold(), diagnostic);
    }
}

fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn cmd_check(input: &ModelInput, strict: bool) -> Result<()> {
    println!("{} {}", "Checking".green().bold(), input.config.display());
    let model = input.compile()?;
    print_diagnostics(&model.diagnostics);

    if strict && !model.diagnostics.is_empty() {
        return Err(anyhow!(
            "{} diagnostic(s) reported in strict mode",
            model.diagnostics.len()
        ));
    }

    println!(
        "{} {} activities, {} parameters, {} method(s)",
        "ok".green().bold(),
        model.reachable().len(),
        model.parameters.len(),
        model.methods.len()
    );
    if let Some(scenarios) = &model.scenarios {
        println!(
            "  {} {} scenario(s) over {}",
            "→".yellow(),
            scenarios.records().len(),
            model.background
        );
    }
    Ok(())
}

fn parse_assignments(set: &[String]) -> Result<HashMap<String, ParamValue>> {
    set.iter()
        .map(|assignment| {
            let (name, value) = assignment
                .split_once('=')
                .ok_or_else(|| anyhow!("expected NAME=VALUE, got `{assignment}`"))?;
            let value = match value.trim().parse::<f64>() {
                Ok(number) => ParamValue::Float(number),
                Err(_) => ParamValue::Label(value.trim().to_string()),
            };
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

fn cmd_compile(input: &ModelInput, json: bool, out: Option<&Path>, set: &[String]) -> Result<()> {
    let model = input.compile()?;
    print_diagnostics(&model.diagnostics);

    if json {
        let text = serde_json::to_string_pretty(&model)?;
        return emit(&format!("{text}\n"), out);
    }

    let text = if set.is_empty() {
        report::render_graph(&model)
    } else {
        let values = parse_assignments(set)?;
        let bindings = model.parameters.bindings(&values)?;
        let edges = model
            .evaluate_edges(&bindings)
            .context("failed to evaluate exchanges")?;
        report::render_evaluated(&edges)
    };
    emit(&text, out)
}

fn cmd_processes(input: &ModelInput, all: bool, json: bool) -> Result<()> {
    let model = input.compile()?;
    print_diagnostics(&model.diagnostics);
    let rows = process_table(&model, !all);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", report::render_processes(&rows));
    }
    Ok(())
}

fn cmd_params(input: &ModelInput, json: bool) -> Result<()> {
    let model = input.compile()?;
    print_diagnostics(&model.diagnostics);
    if json {
        println!("{}", serde_json::to_string_pretty(&model.parameters)?);
    } else {
        print!("{}", report::render_params(&model.parameters));
    }
    Ok(())
}
