//! Command Runner - run external commands in staged working directories.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use command_runner::classifier::{PatternError, ProtocolPatterns};
use command_runner::config::{ConfigError, ConfigLoader, RunnerConfig};
use command_runner::display;
use command_runner::rdfox::{RdfoxError, RdfoxRunner};
use command_runner::supervisor::{
    CommandSpec, GateState, RunReport, SupervisorBuilder, SupervisorError, WaitPolicy,
};
use command_runner::workdir::{InputSource, StagedInputs, WorkdirError};

#[derive(Parser)]
#[command(
    name = "command-runner",
    about = "Run external commands in staged working directories",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an arbitrary command.
    Run {
        #[command(flatten)]
        staging: StagingArgs,
        /// When `start` returns: after a readiness signal, on exit, or at once.
        #[arg(long, default_value_t = WaitPolicy::Exit)]
        wait: WaitPolicy,
        /// Regex whose first capture group signals readiness.
        #[arg(long)]
        ready_pattern: Option<String>,
        /// Regex for lines that report an error.
        #[arg(long)]
        error_pattern: Option<String>,
        /// Line sent to the command before it is terminated.
        #[arg(long)]
        quit_token: Option<String>,
        /// Run the command through the shell.
        #[arg(long)]
        shell: bool,
        /// The command and its arguments.
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Run an RDFox script.
    Rdfox {
        #[command(flatten)]
        staging: StagingArgs,
        /// File with one RDFox shell command per line.
        #[arg(long)]
        script: Option<PathBuf>,
        /// RDFox shell command, appended after the script file (repeatable).
        #[arg(short = 'c', long = "command")]
        commands: Vec<String>,
        /// RDFox executable.
        #[arg(long)]
        executable: Option<String>,
        /// Override the wait policy inferred from the script.
        #[arg(long)]
        wait: Option<WaitPolicy>,
    },
}

#[derive(Args)]
struct StagingArgs {
    /// Copy a file or directory into the working directory (TARGET=SOURCE).
    #[arg(short, long = "input", value_parser = parse_pair)]
    inputs: Vec<(String, String)>,
    /// Write literal text into the working directory (TARGET=TEXT).
    #[arg(long = "text", value_parser = parse_pair)]
    texts: Vec<(String, String)>,
    /// Print an output file after the run (LABEL=PATH).
    #[arg(short, long = "output", value_parser = parse_pair)]
    outputs: Vec<(String, String)>,
    /// Run in this directory instead of a temporary one.
    #[arg(long)]
    working_dir: Option<PathBuf>,
    /// Seconds to wait for readiness or exit.
    #[arg(long)]
    timeout: Option<u64>,
    /// Keep the temporary working directory.
    #[arg(long)]
    keep: bool,
    /// Echo every output line.
    #[arg(long)]
    echo: bool,
    /// Print output lines and errors in full instead of truncating them.
    #[arg(long)]
    raw: bool,
}

impl StagingArgs {
    fn staged_inputs(&self) -> StagedInputs {
        let files = self
            .inputs
            .iter()
            .map(|(target, source)| (PathBuf::from(target), InputSource::from(PathBuf::from(source))));
        let texts = self
            .texts
            .iter()
            .map(|(target, text)| (PathBuf::from(target), InputSource::text(text.clone())));
        files.chain(texts).collect()
    }

    fn outputs(&self) -> BTreeMap<String, PathBuf> {
        self.outputs
            .iter()
            .map(|(label, path)| (label.clone(), PathBuf::from(path)))
            .collect()
    }

    fn apply_to(&self, config: &mut RunnerConfig) {
        if let Some(dir) = &self.working_dir {
            config.working_dir = Some(dir.clone());
        }
        if let Some(secs) = self.timeout {
            config.wait_timeout_secs = Some(secs);
        }
        config.keep_working_dir |= self.keep;
    }
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Rdfox(#[from] RdfoxError),
    #[error(transparent)]
    Output(#[from] WorkdirError),
    #[error("Failed to read script {path}: {source}")]
    Script {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let loader = cli.config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load()?;

    match cli.command {
        Commands::Run {
            staging,
            wait,
            ready_pattern,
            error_pattern,
            quit_token,
            shell,
            command,
        } => {
            staging.apply_to(&mut config);

            let mut patterns = config.patterns.apply(ProtocolPatterns::new())?;
            if let Some(p) = &ready_pattern {
                patterns = patterns.with_readiness(p)?;
            }
            if let Some(p) = &error_pattern {
                patterns = patterns.with_line_error(p)?;
            }
            let spec = if shell {
                CommandSpec::shell(command.join(" "))
            } else {
                CommandSpec::argv(command)
            };

            let mut builder = config
                .configure(SupervisorBuilder::new())
                .inputs(staging.staged_inputs())
                .command(spec.clone())
                .patterns(patterns)
                .wait_policy(wait);
            if let Some(token) = quit_token {
                builder = builder.quit_token(token);
            }
            if staging.echo {
                let raw = staging.raw;
                builder = builder.observer(move |line: &str| display::print_output_line(line, raw));
            }

            let mut supervisor = builder.build()?;
            display::print_run_start(&spec.display(), supervisor.working_dir());

            let started = supervisor.start().await;
            if started.is_ok() && wait == WaitPolicy::Ready {
                if let GateState::Ready(id) = supervisor.readiness().state() {
                    display::print_ready(&id);
                    wait_for_interrupt().await;
                }
            }
            let collected = match &started {
                Ok(()) => Some(supervisor.working_area().read_files(&staging.outputs())),
                Err(_) => None,
            };

            let stopped = supervisor.stop().await;
            let report = supervisor.report();
            let returncode = supervisor.returncode();
            started?;
            finish(&report, returncode, collected, stopped.map(|_| ()), staging.raw)
        }
        Commands::Rdfox {
            staging,
            script,
            commands,
            executable,
            wait,
        } => {
            staging.apply_to(&mut config);

            let mut lines = Vec::new();
            if let Some(path) = &script {
                let text = std::fs::read_to_string(path).map_err(|e| CliError::Script {
                    path: path.clone(),
                    source: e,
                })?;
                lines.extend(text.lines().map(str::to_string));
            }
            lines.extend(commands);

            let mut builder = RdfoxRunner::builder(lines)
                .inputs(staging.staged_inputs())
                .config(config);
            if let Some(exe) = executable {
                builder = builder.executable(exe);
            }
            if let Some(wait) = wait {
                builder = builder.wait_policy(wait);
            }
            if staging.echo {
                let raw = staging.raw;
                builder = builder.observer(move |line: &str| display::print_output_line(line, raw));
            }

            let mut runner = builder.build()?;
            display::print_run_start("RDFox", runner.working_dir());

            let started = runner.start().await;
            if started.is_ok() && runner.wait_policy() == WaitPolicy::Ready {
                if let Some(url) = runner.endpoint().base_url() {
                    display::print_ready(url.as_str());
                    wait_for_interrupt().await;
                }
            }
            let collected = match &started {
                Ok(()) => Some(
                    runner
                        .supervisor()
                        .working_area()
                        .read_files(&staging.outputs()),
                ),
                Err(_) => None,
            };

            let stopped = runner.stop().await;
            let report = runner.report();
            let returncode = runner.supervisor().returncode();
            started?;
            finish(&report, returncode, collected, stopped.map(|_| ()), staging.raw)
        }
    }
}

/// Print collected outputs and the report, and pick the exit code.
fn finish<E>(
    report: &RunReport,
    returncode: Option<i32>,
    collected: Option<Result<BTreeMap<String, String>, WorkdirError>>,
    stopped: Result<(), E>,
    raw_mode: bool,
) -> Result<ExitCode, CliError>
where
    CliError: From<E>,
{
    if let Some(collected) = collected {
        for (label, content) in collected? {
            display::print_collected(&label, &content);
        }
    }
    display::print_report(report, returncode, raw_mode);
    stopped?;

    if returncode.is_some_and(|c| c > 0) || !report.errors.is_empty() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn wait_for_interrupt() {
    tracing::info!("Running until interrupted (Ctrl-C)");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
    }
}
