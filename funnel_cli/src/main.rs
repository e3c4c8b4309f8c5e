use funnel_core::{FunnelConfig, Session};

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Feeds generated test cases to a target and archives the ones that crash it",
    long_about = None,
    override_usage = "funnel [OPTIONS] -- /path/to/target -in @@ -out /dev/null"
)]
struct Cli {
    /// TOML file with defaults; command-line values win over it.
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Name of the staged test file inside the destination directory.
    #[clap(long = "fn", value_name = "NAME")]
    file_name: Option<String>,
    /// Directory to stage tests in; crashes land in its `crashes/` folder.
    #[clap(long, value_parser)]
    dest: Option<PathBuf>,
    /// Seed corpus for a locally launched radamsa.
    #[clap(long = "src", value_parser, conflicts_with = "server")]
    corpus: Option<PathBuf>,
    /// Address of an already running radamsa server.
    #[clap(long)]
    server: Option<String>,
    /// Unix socket of a service that fixes up tests before they run.
    #[clap(long = "fix", value_parser)]
    fixer: Option<PathBuf>,
    /// Timeout in seconds for one run of the target.
    #[clap(short = 't', long = "timeout", value_name = "SECS")]
    timeout_secs: Option<u64>,
    /// Stop after this many tests.
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[clap(short, long)]
    verbose: bool,
    /// Target command; every `@@` is replaced with the staged file path.
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> FunnelConfig {
        FunnelConfig {
            file_name: self.file_name.clone(),
            dest: self.dest.clone(),
            corpus: self.corpus.clone(),
            server: self.server.clone(),
            fixer: self.fixer.clone(),
            timeout_secs: self.timeout_secs,
            command: self.command.clone(),
            max_iterations: self.iterations,
            report_interval_secs: None,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", fatal_message(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let file_config = match &cli.config_file {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            FunnelConfig::load_from_file(path)?
        }
        None => {
            let default_path = PathBuf::from("funnel.toml");
            if default_path.exists() {
                info!(path = %default_path.display(), "loading default configuration");
                FunnelConfig::load_from_file(&default_path)?
            } else {
                FunnelConfig::default()
            }
        }
    };

    let settings = file_config.merge(cli.overrides()).validate()?;
    let session = Session::bootstrap(settings)?;
    session.run()?;
    Ok(())
}

fn fatal_message(err: &anyhow::Error) -> String {
    format!("[FATAL] {err:#}")
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
