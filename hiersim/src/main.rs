use std::fs::File;
use std::io::BufReader;
use std::process;
use std::time::Instant;

use clap::Parser;
use hierlib::config::HierarchyConfig;
use hierlib::io::{load_trace, validate_trace};
use hierlib::simulator::Simulator;

#[derive(Parser, Debug)]
#[command(about = String::from("Trace-driven cache hierarchy simulator"))]
struct Args {
    /// JSON hierarchy configuration file, an alternative to the geometry
    /// flags
    #[arg(long, conflicts_with_all = ["ic", "dc", "l2"])]
    config: Option<String>,

    /// Instruction cache geometry, sets:ways:linesz[:policy]
    #[arg(long)]
    ic: Option<String>,

    /// Data cache geometry, sets:ways:linesz[:policy]
    #[arg(long)]
    dc: Option<String>,

    /// Shared second-level cache geometry, sets:ways:linesz[:policy]
    #[arg(long)]
    l2: Option<String>,

    /// Write a line to stderr for every miss
    #[arg(long)]
    log: bool,

    /// Print the result as JSON in addition to the per-cache reports
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    performance: bool,

    /// Check the trace against the record grammar before simulating
    #[arg(long)]
    validate: bool,

    trace: String,
}

fn main() {
    // Config errors carry the usage text; either way the message belongs on
    // stderr and the exit code is 1
    if let Err(message) = run() {
        eprintln!("{message}");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let start = Instant::now();
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => {
            let config_file = File::open(path)
                .map_err(|e| format!("Couldn't open the config file at path {path}: {e}"))?;
            serde_json::from_reader(BufReader::new(config_file))
                .map_err(|e| format!("Couldn't parse the config file: {e}"))?
        }
        None => HierarchyConfig {
            icache: args.ic.clone(),
            dcache: args.dc.clone(),
            l2: args.l2.clone(),
            log: false,
        },
    };
    config.log |= args.log;
    let mut simulator = Simulator::new(&config)?;
    let trace_file = File::open(&args.trace)
        .map_err(|e| format!("Couldn't open the trace file at path {}: {e}", args.trace))?;
    let trace = load_trace(trace_file)?;
    if args.validate {
        validate_trace(&trace)?;
    }
    let result = simulator.simulate(&trace)?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result)
                .map_err(|e| format!("Couldn't serialise the output {e}"))?
        );
    }
    if args.performance {
        let simulation_time = simulator.get_execution_time();
        let total_time = start.elapsed();
        println!(
            "Simulation time: {}s",
            simulation_time.as_nanos() as f64 / 1e9
        );
        println!(
            "Total execution time (includes parsing, configuration, and output): {}s",
            total_time.as_nanos() as f64 / 1e9
        );
    }
    // The per-cache reports print when the simulator drops
    Ok(())
}
