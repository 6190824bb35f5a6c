// SPDX-License-Identifier: Apache-2.0
//! Command-line front end for the logic-locking engine.
//!
//! Reads a gate-level Verilog netlist, runs the analysis and
//! optimization, and prints a locking script: one line per key gate to
//! insert, plus the key in hex. The netlist file is never modified.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use netlistdb::NetlistDB;
use netlock::cells::LockLeafPins;
use netlock::error::LockError;
use netlock::locking::{
    self, LockingOptions, LockingSolution, OptimizationTarget,
};

#[derive(Parser)]
#[command(name = "netlock", about = "netlock — logic locking for gate-level netlists")]
struct Cli {
    /// Gate-level Verilog netlist synthesized to the locking cell
    /// library (NOT/BUF/AND/NAND/OR/NOR/XOR/XNOR/MUX/DFF).
    netlist_verilog: PathBuf,

    /// Top module name in the netlist.
    ///
    /// If not specified, the top module is guessed from the hierarchy;
    /// the guess must be unique.
    #[clap(long)]
    top_module: Option<String>,

    /// Optimization target: pairwise, corruption, or hybrid.
    #[clap(long, default_value = "pairwise")]
    target: String,

    /// Key-bit budget as a percentage of lockable cells.
    #[clap(long, default_value_t = 5.0)]
    key_percent: f64,

    /// Absolute key-bit budget (overrides --key-percent).
    #[clap(long)]
    key_bits: Option<usize>,

    /// Number of test vectors for the analysis (at least 4; rounded up
    /// to a multiple of 64).
    #[clap(long, default_value_t = 64)]
    nb_test_vectors: usize,

    /// Explicit key as nibble-little-endian hex. Drawn from the OS
    /// entropy source when omitted.
    #[clap(long)]
    key: Option<String>,

    /// Analyze only: print the coverage-vs-locked-cells table and exit
    /// without producing a locking script.
    #[clap(long)]
    report: bool,

    /// Lock the named gate's output with an XOR/XNOR key gate, skipping
    /// the optimizer. May be repeated.
    #[clap(long)]
    lock_gate: Vec<String>,

    /// Mix the outputs of two named gates through a key-driven MUX,
    /// skipping the optimizer. May be repeated.
    #[clap(long, num_args = 2, value_names = ["NAME1", "NAME2"])]
    mix_gate: Vec<String>,
}

fn run(cli: &Cli) -> Result<(), LockError> {
    let explicit = !cli.lock_gate.is_empty() || !cli.mix_gate.is_empty();
    if cli.report && explicit {
        return Err(LockError::InvalidConfiguration(
            "--report cannot be combined with --lock-gate/--mix-gate".into(),
        ));
    }

    // Locking more than one module at once would hand out duplicate
    // keys, so an ambiguous top is a configuration error, not a netlist
    // defect.
    if cli.top_module.is_none() {
        let source = std::fs::read_to_string(&cli.netlist_verilog).map_err(|e| {
            LockError::InvalidConfiguration(format!(
                "cannot read {}: {}",
                cli.netlist_verilog.display(),
                e
            ))
        })?;
        let roots = root_modules(&source);
        if roots.len() > 1 {
            return Err(LockError::InvalidConfiguration(format!(
                "multiple modules selected ({}); pass --top-module to pick one",
                roots.join(", ")
            )));
        }
    }

    let db = NetlistDB::from_sverilog_file(
        &cli.netlist_verilog,
        cli.top_module.as_deref(),
        &LockLeafPins,
    )
    .map_err(|e| {
        LockError::MalformedNetlist(format!(
            "cannot build netlist from {}: {:?}",
            cli.netlist_verilog.display(),
            e
        ))
    })?;
    clilog::info!(
        "netlist {}: {} cells, {} pins",
        cli.netlist_verilog.display(),
        db.num_cells,
        db.num_pins
    );

    let opts = LockingOptions {
        target: cli.target.parse::<OptimizationTarget>()?,
        key_percent: cli.key_percent,
        key_bits: cli.key_bits,
        nb_test_vectors: cli.nb_test_vectors,
        key: cli.key.clone(),
    };

    if cli.report {
        let report = locking::run_report(&db, &opts)?;
        print!("{}", report);
        return Ok(());
    }

    let solution = if explicit {
        let pairs: Vec<(String, String)> = cli
            .mix_gate
            .chunks_exact(2)
            .map(|c| (c[0].clone(), c[1].clone()))
            .collect();
        locking::lock_explicit(&db, &cli.lock_gate, &pairs, cli.key.as_deref())?
    } else {
        locking::run_logic_locking(&db, &opts)?
    };
    print_script(&solution);
    Ok(())
}

/// Emit the locking script consumed by the netlist rewriter: one line
/// per inserted key gate, then the key.
fn print_script(solution: &LockingSolution) {
    for (i, gate) in solution.locked.iter().enumerate() {
        let style = if gate.key_bit { "xnor" } else { "xor" };
        println!("lock {} {} key[{}]", style, gate.name, i);
    }
    for (j, pair) in solution.mixed.iter().enumerate() {
        println!(
            "mix mux {} {} key[{}]",
            pair.name_a,
            pair.name_b,
            solution.locked.len() + j
        );
    }
    println!("key {}", solution.key_hex());
    clilog::info!(
        "locked {} signals, mixed {} pairs, {} key bits",
        solution.locked.len(),
        solution.mixed.len(),
        solution.num_key_bits()
    );
}

/// Names of modules declared in the source but never instantiated by
/// another one.
///
/// The real parse happens inside the netlist database; this scan only
/// decides whether guessing a top module is unambiguous. In a
/// structural netlist a hierarchical module occurs either right after
/// the `module` keyword (its declaration) or as the head of an
/// instantiation, so any other occurrence of a declared name marks it
/// as instantiated.
fn root_modules(source: &str) -> Vec<String> {
    let mut text = String::with_capacity(source.len());
    for line in source.lines() {
        text.push_str(line.split("//").next().unwrap_or(""));
        text.push('\n');
    }
    let tokens: Vec<&str> = text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .filter(|t| !t.is_empty())
        .collect();
    let mut declared = Vec::new();
    for w in tokens.windows(2) {
        if w[0] == "module" && !declared.contains(&w[1]) {
            declared.push(w[1]);
        }
    }
    declared
        .iter()
        .filter(|&&name| {
            !tokens
                .windows(2)
                .any(|w| w[1] == name && w[0] != "module")
        })
        .map(|&name| name.to_string())
        .collect()
}

fn main() -> ExitCode {
    clilog::init_stderr_color_debug();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            clilog::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
