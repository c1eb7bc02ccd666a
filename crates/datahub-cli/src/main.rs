//! Test harness for the data hub: exercises the configuration loader and
//! the destination-handler path against fixture files.

use clap::Parser;

mod destination;
mod parser;

#[derive(Debug, Parser)]
#[command(name = "datahub-cli", about = "Data hub test harness")]
struct Cli {
    /// Log filter directives, e.g. "warn", "datahub=debug" to trace
    /// sample drops and routing, or "datahub_config=info" to follow the
    /// load phases.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the config-load test matrix.
    Parser {
        /// Tree preparation: 0 = empty hub, 1 = pre-populated hub.
        #[arg(long, default_value_t = 0)]
        datahub: u8,
        /// Index of the test case to run.
        #[arg(long, default_value_t = 2)]
        config: usize,
    },
    /// Exercise the destination-handler path.
    Destination,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(cli.log_level.as_str())
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let result = match cli.command {
        Command::Parser { datahub, config } => parser::run(datahub, config),
        Command::Destination => destination::run(),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "test failed");
        eprintln!("FAILED: {err}");
        std::process::exit(1);
    }
    println!("PASSED");
}
