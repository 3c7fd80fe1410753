//! Command-line front-end
//!
//! `wcet BINARY [ENTRY] -s SCRIPT [-f FLOWFACTS]...` per the external
//! interface: loads an ELF binary, builds its CFG, annotates block/edge
//! timing, constructs and solves the IPET system, and prints the resulting
//! worst-case execution time in cycles. Exit code 0 on success, otherwise the
//! error kind's code (configuration=1, input=2, analysis=3, invariant=4), per
//! §7's error taxonomy.

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use wcet_core::cfg::collector::{self, CollectorOptions};
use wcet_core::config::Config;
use wcet_core::error::WcetError;
use wcet_core::flowfacts::{f4, FlowFacts};
use wcet_core::ipet::{compute_wcet, ReferenceIlpSystem};
use wcet_core::loader::elf::{ElfLoader, OpaqueDecoder};
use wcet_core::loader::Loader;
use wcet_core::timing::{self, TrivialTiming};

#[derive(Parser)]
#[command(name = "wcet")]
#[command(about = "Worst-case execution time analysis for embedded binaries")]
#[command(version)]
struct Cli {
    /// Path to the binary under analysis (ELF).
    binary: PathBuf,

    /// Task entry point: a symbol name, a `0x`-prefixed address, or omitted
    /// to use the binary's declared entry point.
    entry: Option<String>,

    /// Script file of `KEY=VALUE` configuration lines (the same property
    /// mechanism as `-p`), simplifying the full processor-selection script
    /// format down to plain parameters - this crate ships a fixed analysis
    /// sequence rather than a scriptable processor pipeline.
    #[arg(short = 's', long = "script")]
    script: Option<PathBuf>,

    /// Flow-fact file(s) in F4 format.
    #[arg(short = 'f', long = "flowfacts")]
    flowfacts: Vec<PathBuf>,

    /// Script parameter `KEY=VALUE`, may be repeated.
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,

    /// Log verbosity targets (accepted for interface compatibility; actual
    /// filtering is done via `RUST_LOG`).
    #[arg(long = "log")]
    log: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(wcet) => {
            println!("WCET: {wcet} cycles");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code_of(&err))
        }
    }
}

fn exit_code_of(err: &WcetError) -> u8 {
    match err {
        WcetError::Configuration { .. } => 1,
        WcetError::Input { .. } => 2,
        WcetError::Analysis { .. } => 3,
        WcetError::Invariant { .. } => 4,
    }
}

fn run(cli: &Cli) -> wcet_core::Result<u64> {
    let pb = spinner("Loading binary...");
    let bytes = std::fs::read(&cli.binary)
        .map_err(|e| WcetError::input(cli.binary.display().to_string(), e.to_string()))?;
    let loader = ElfLoader::parse(&bytes, OpaqueDecoder { instruction_size: 4 })?;
    pb.finish_and_clear();

    let entry_address = resolve_entry(&loader, cli.entry.as_deref())?;

    let pb = spinner("Reading flow facts...");
    let mut flow_facts = FlowFacts::new();
    for path in &cli.flowfacts {
        let source = std::fs::read_to_string(path)
            .map_err(|e| WcetError::input(path.display().to_string(), e.to_string()))?;
        let parsed = f4::parse(&source, &path.display().to_string())?;
        flow_facts.merge(parsed);
    }
    pb.finish_and_clear();

    let config = build_config(cli)?;

    let pb = spinner("Building control-flow graph...");
    let options = CollectorOptions::default();
    let mut collection = collector::collect(&loader, entry_address, &[], &flow_facts, &options)?;
    pb.finish_and_clear();

    let pb = spinner("Annotating timing...");
    let timing_model = TrivialTiming::from_config(&config);
    timing::annotate(&mut collection, &timing_model);
    pb.finish_and_clear();

    let pb = spinner("Solving IPET system...");
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &flow_facts, &[])?;
    pb.finish_and_clear();

    Ok(wcet as u64)
}

fn resolve_entry(loader: &dyn Loader, entry: Option<&str>) -> wcet_core::Result<u32> {
    match entry {
        None => Ok(loader.entry()),
        Some(text) => {
            if let Some(hex) = text.strip_prefix("0x") {
                u32::from_str_radix(hex, 16)
                    .map_err(|_| WcetError::input("entry", format!("not a valid hex address: {text}")))
            } else {
                loader
                    .symbol(text)
                    .ok_or_else(|| WcetError::input("entry", format!("symbol not found: {text}")))
            }
        }
    }
}

fn build_config(cli: &Cli) -> wcet_core::Result<Config> {
    let mut config = Config::new();
    if let Some(script) = &cli.script {
        let source = std::fs::read_to_string(script)
            .map_err(|e| WcetError::input(script.display().to_string(), e.to_string()))?;
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            config = apply_param(config, line)?;
        }
    }
    for param in &cli.params {
        config = apply_param(config, param)?;
    }
    Ok(config)
}

fn apply_param(config: Config, text: &str) -> wcet_core::Result<Config> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| WcetError::configuration("cli", format!("malformed parameter: {text}")))?;
    Ok(config.with_param(key.trim(), value.trim()))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb
}
