use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use recoding_support::normalize::ReportInput;
use recoding_support::{run_pipeline, Config, PipelineError, ReferenceFilter};

#[derive(Parser, Debug)]
#[command(name = "support_cli")]
#[command(about = "Tabulate clade support and posterior predictive z-scores for recoding runs")]
struct Args {
    /// Directory holding the *.chain.treelist and *.chain.ppred files.
    dir: PathBuf,
    /// Trees dropped from the start of every chain.
    #[arg(long, default_value_t = 200)]
    burnin: usize,
    /// Posterior probability that counts as strong support, in (0, 1].
    #[arg(long, default_value_t = 0.95, value_parser = parse_threshold)]
    threshold: f64,
    /// Worker threads (default: available cores minus one).
    #[arg(short = 'j', long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    threads: Option<usize>,
    /// Alphabet sizes kept in the table.
    #[arg(long, value_delimiter = ',', default_values_t = [20u32, 6])]
    states: Vec<u32>,
    /// Axis breakpoints passed on to the figures.
    #[arg(long, value_delimiter = ',')]
    x_breaks: Option<Vec<f64>>,
    /// Pre-tabulated summary table (tab separated).
    #[arg(long)]
    summary: Option<PathBuf>,
    #[arg(long, default_value = "CAT-GTR")]
    reference_model: String,
    #[arg(long, default_value = "Whelan")]
    reference_dataset: String,
    #[arg(long, default_value = "SR6")]
    reference_recoding: String,
    /// Emit the full JSON report instead of the TSV table.
    #[arg(long)]
    json: bool,
    /// Write to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(format!("{} is not a probability in (0, 1]", value))
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn config_from_args(args: &Args) -> Config {
    let mut config = Config {
        burnin: args.burnin,
        support_threshold: args.threshold,
        states_to_consider: args.states.clone(),
        reference: ReferenceFilter {
            model: args.reference_model.clone(),
            dataset: args.reference_dataset.clone(),
            recoding: args.reference_recoding.clone(),
        },
        summary_table: args.summary.clone(),
        ..Config::default()
    };
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(breaks) = &args.x_breaks {
        config.x_breaks = breaks.clone();
    }
    config
}

fn run(args: &Args) -> Result<(), PipelineError> {
    let config = config_from_args(args);
    let output = run_pipeline(&args.dir, &config)?;

    let rendered = if args.json {
        let input = ReportInput::new(&output.table, &output.supports, &output.summary, &config);
        let mut text = serde_json::to_string_pretty(&input)?;
        text.push('\n');
        text
    } else {
        output.table.to_tsv()
    };

    match &args.output {
        Some(path) => {
            fs::write(path, rendered).map_err(|e| PipelineError::io(path, e))?;
            info!(path = %path.display(), "table written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .map_err(|e| PipelineError::io("<stdout>", e))?;
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    if let Err(err) = run(&args) {
        eprintln!("support_cli: {}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["support_cli", "runs"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn defaults_follow_config() {
        let config = config_from_args(&parse(&[]).unwrap());
        let default = Config::default();
        assert_eq!(config.burnin, 200);
        assert_eq!(config.support_threshold, 0.95);
        assert_eq!(config.threads, default.threads);
        assert_eq!(config.states_to_consider, vec![20, 6]);
        assert_eq!(config.x_breaks, default.x_breaks);
        assert_eq!(config.reference, default.reference);
    }

    #[test]
    fn overrides_reach_config() {
        let args = parse(&["-j", "3", "--threshold", "0.9", "--states", "6", "--x-breaks", "0,0.5,1"]).unwrap();
        let config = config_from_args(&args);
        assert_eq!(config.threads, 3);
        assert_eq!(config.support_threshold, 0.9);
        assert_eq!(config.states_to_consider, vec![6]);
        assert_eq!(config.x_breaks, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(parse(&["--threads", "0"]).is_err());
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        assert!(parse(&["--threshold", "1.5"]).is_err());
        assert!(parse(&["--threshold", "0"]).is_err());
        assert!(parse(&["--threshold", "abc"]).is_err());
        assert!(parse(&["--threshold", "1"]).is_ok());
    }
}
