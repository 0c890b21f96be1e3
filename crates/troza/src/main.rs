use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use log::{LevelFilter, error, info};
use troza::{
    config::{ChunkRule, Config},
    orchestrator::BuildOrchestrator,
};

/// Split a Python program into chunks that are loaded on demand
#[derive(Parser, Debug)]
#[command(name = "troza", author, version, about, long_about = None)]
struct Cli {
    /// Program entry point
    #[arg(short, long)]
    entry: PathBuf,

    /// Directory to write chunks and the manifest into
    #[arg(short, long)]
    output: PathBuf,

    /// Config file, applied over user and project config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace); the build report is always shown
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Warn about unresolved imports instead of failing
    #[arg(long)]
    allow_unresolved: bool,

    /// Add a content hash to chunk file names
    #[arg(long)]
    content_hash: bool,

    /// Derive chunks from the directory layout when none are configured
    #[arg(long)]
    auto_chunks: bool,

    /// With --auto-chunks, also group modules whose imports overlap by more than THRESHOLD
    #[arg(long, value_name = "THRESHOLD")]
    auto_chunk_similarity: Option<f64>,

    /// Extra chunk rule as NAME=PATTERN (repeatable)
    #[arg(long = "chunk", value_name = "NAME=PATTERN", value_parser = parse_chunk_arg)]
    chunks: Vec<(String, String)>,
}

fn parse_chunk_arg(value: &str) -> Result<(String, String)> {
    let (name, pattern) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=PATTERN, got '{value}'"))?;
    if name.is_empty() || pattern.is_empty() {
        return Err(anyhow!("expected NAME=PATTERN, got '{value}'"));
    }
    Ok((name.to_string(), pattern.to_string()))
}

/// Log target of the post-build report
const REPORT_TARGET: &str = "troza::report";

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // RUST_LOG overrides the -v level
    env_logger::Builder::new()
        .filter_level(level)
        .filter_module(REPORT_TARGET, level.max(LevelFilter::Info))
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn apply_cli(config: &mut Config, cli: Cli) {
    config.allow_unresolved |= cli.allow_unresolved;
    config.content_hash |= cli.content_hash;
    config.auto_chunks |= cli.auto_chunks;
    if let Some(threshold) = cli.auto_chunk_similarity {
        config.auto_chunk_similarity = Some(threshold);
    }

    for (name, pattern) in cli.chunks {
        if let Some(rule) = config.chunks.iter_mut().find(|rule| rule.name == name) {
            rule.includes.push(pattern);
        } else {
            config.chunks.push(ChunkRule::new(name).with_include(pattern));
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let entry = cli.entry.clone();
    let output = cli.output.clone();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_cli(&mut config, cli);

    let plan = BuildOrchestrator::new(config).build(&entry, &output)?;

    info!(
        target: REPORT_TARGET,
        "Bundled {} module(s) into {} chunk(s) in {}",
        plan.graph.len(),
        plan.chunks.len(),
        output.display()
    );
    for line in plan.summary().to_string().lines() {
        info!(target: REPORT_TARGET, "{line}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunk_arg() {
        assert_eq!(
            parse_chunk_arg("admin=.*/admin/.*").unwrap(),
            ("admin".to_string(), ".*/admin/.*".to_string())
        );
        assert!(parse_chunk_arg("admin").is_err());
        assert!(parse_chunk_arg("=x").is_err());
    }

    #[test]
    fn test_cli_chunks_extend_config() {
        let cli = Cli::parse_from([
            "troza",
            "--entry",
            "app.py",
            "--output",
            "dist",
            "--chunk",
            "admin=/admin/",
            "--chunk",
            "reports=/reports/",
            "--content-hash",
            "--auto-chunk-similarity",
            "0.4",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);

        let mut config = Config {
            chunks: vec![ChunkRule::new("admin").with_include("/staff/")],
            ..Config::default()
        };
        apply_cli(&mut config, cli);

        assert!(config.content_hash);
        assert_eq!(config.auto_chunk_similarity, Some(0.4));
        assert_eq!(
            config.chunks,
            vec![
                ChunkRule::new("admin")
                    .with_include("/staff/")
                    .with_include("/admin/"),
                ChunkRule::new("reports").with_include("/reports/"),
            ]
        );
    }
}
