// SPDX-License-Identifier: Apache-2.0
//! Logic-locking driver.
//!
//! Orchestrates one engine run over a module: enumerate candidates,
//! generate test vectors, build the AIG, run the configured optimizer,
//! and return the selected signals with their key bits. The netlist is
//! never mutated; the caller inserts the XOR/XNOR/MUX key gates.

use crate::analyzer::LockingAnalyzer;
use crate::clique;
use crate::coverage::{self, corruption_cover};
use crate::error::LockError;
use crate::key::{key_from_hex, key_to_hex, random_key};
use netlistdb::{Direction, GeneralHierName, NetlistDB};
use std::fmt;
use std::str::FromStr;

/// Test vectors are reproducible across runs on purpose; only the key
/// itself draws from a secure source.
const TEST_VECTOR_SEED: u64 = 1;

/// What the optimizer maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationTarget {
    /// Total clique weight in the pairwise-security graph.
    #[default]
    Pairwise,
    /// Output-corruption coverage.
    Corruption,
    /// The largest pairwise clique, then corruption coverage on top.
    Hybrid,
}

impl FromStr for OptimizationTarget {
    type Err = LockError;

    fn from_str(s: &str) -> Result<OptimizationTarget, LockError> {
        match s {
            "pairwise" => Ok(OptimizationTarget::Pairwise),
            "corruption" => Ok(OptimizationTarget::Corruption),
            "hybrid" => Ok(OptimizationTarget::Hybrid),
            _ => Err(LockError::InvalidConfiguration(format!(
                "unknown optimization target `{}`",
                s
            ))),
        }
    }
}

impl fmt::Display for OptimizationTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            OptimizationTarget::Pairwise => "pairwise",
            OptimizationTarget::Corruption => "corruption",
            OptimizationTarget::Hybrid => "hybrid",
        })
    }
}

/// Engine configuration, typically filled from the command line.
#[derive(Debug, Clone)]
pub struct LockingOptions {
    pub target: OptimizationTarget,
    /// Key-bit budget as a percentage of lockable cells.
    pub key_percent: f64,
    /// Absolute key-bit budget; overrides the percentage when set.
    pub key_bits: Option<usize>,
    /// Number of test vectors; rounded up to a multiple of 64.
    pub nb_test_vectors: usize,
    /// Explicit key in hex; a fresh random key is drawn when absent.
    pub key: Option<String>,
}

impl Default for LockingOptions {
    fn default() -> LockingOptions {
        LockingOptions {
            target: OptimizationTarget::default(),
            key_percent: 5.0,
            key_bits: None,
            nb_test_vectors: 64,
            key: None,
        }
    }
}

/// One XOR/XNOR locking site: insert XOR when the key bit is 0, XNOR
/// when it is 1.
#[derive(Debug, Clone)]
pub struct LockedGate {
    pub cell: usize,
    pub name: String,
    pub key_bit: bool,
}

/// One MUX mixing site: the key bit selects which of the two cell
/// outputs passes through.
#[derive(Debug, Clone)]
pub struct MixedPair {
    pub cell_a: usize,
    pub name_a: String,
    pub cell_b: usize,
    pub name_b: String,
    pub key_bit: bool,
}

/// The pure result of an engine run, handed to the gate inserter.
#[derive(Debug, Clone, Default)]
pub struct LockingSolution {
    pub locked: Vec<LockedGate>,
    pub mixed: Vec<MixedPair>,
    /// Key bits for `locked` then `mixed`, in order.
    pub key: Vec<bool>,
}

impl LockingSolution {
    pub fn key_hex(&self) -> String {
        key_to_hex(&self.key)
    }

    pub fn num_key_bits(&self) -> usize {
        self.key.len()
    }
}

/// Run the full optimization pipeline on one module.
pub fn run_logic_locking(
    db: &NetlistDB,
    opts: &LockingOptions,
) -> Result<LockingSolution, LockError> {
    validate(opts)?;
    let mut analyzer = LockingAnalyzer::from_netlistdb(db)?;
    let budget = resolve_budget(opts, analyzer.candidates.len())?;
    analyzer.gen_test_vectors(opts.nb_test_vectors, TEST_VECTOR_SEED)?;
    clilog::info!(
        "locking {} of {} candidates, target {}, {} test vectors",
        budget,
        analyzer.candidates.len(),
        opts.target,
        analyzer.nb_test_vectors()
    );

    let selection = select(&analyzer, opts.target, budget);
    let key = match &opts.key {
        Some(hex) => {
            let mut bits = key_from_hex(hex, budget)?;
            bits.truncate(selection.len());
            bits
        }
        None => random_key(selection.len()),
    };

    let locked = selection
        .iter()
        .zip(&key)
        .map(|(&idx, &key_bit)| LockedGate {
            cell: analyzer.candidates[idx].cell,
            name: analyzer.candidate_name(idx),
            key_bit,
        })
        .collect();
    Ok(LockingSolution {
        locked,
        mixed: Vec::new(),
        key,
    })
}

/// Candidate indices selected for the given target, best first within
/// each optimizer's ordering.
fn select(analyzer: &LockingAnalyzer, target: OptimizationTarget, budget: usize) -> Vec<usize> {
    match target {
        OptimizationTarget::Pairwise => {
            let graph = analyzer.compute_pairwise_graph();
            let sol = clique::optimize_greedy(&graph, budget);
            clilog::info!(
                "pairwise solution: {} cliques, {} cells, {} satisfied constraints",
                sol.cliques.len(),
                sol.num_selected(),
                sol.value()
            );
            sol.selected().into_iter().map(|v| v as usize).collect()
        }
        OptimizationTarget::Corruption => {
            let matrix = analyzer.compute_corruption_matrix();
            let selection = coverage::optimize_coverage(&matrix, budget, &[]);
            clilog::info!(
                "corruption solution: {} cells, {:.1}% coverage",
                selection.len(),
                100.0 * corruption_cover(&matrix, &selection)
            );
            selection
        }
        OptimizationTarget::Hybrid => {
            let base = analyzer.compute_base_outputs();
            let singles = analyzer.compute_single_toggle_outputs();
            let graph = analyzer.compute_pairwise_graph_from(&base, &singles);
            let cliques = clique::optimize_greedy(&graph, budget);
            let prefix: Vec<usize> = cliques
                .largest_clique()
                .map(|c| c.iter().map(|&v| v as usize).collect())
                .unwrap_or_default();
            let matrix = analyzer.compute_corruption_matrix_from(&base, &singles);
            let selection = coverage::optimize_coverage(&matrix, budget, &prefix);
            clilog::info!(
                "hybrid solution: {}-clique prefix, {} cells, {:.1}% coverage",
                prefix.len(),
                selection.len(),
                100.0 * corruption_cover(&matrix, &selection)
            );
            selection
        }
    }
}

/// Explicit locking: XOR-lock the named gates and MUX-mix the named
/// pairs, bypassing the optimizer entirely.
pub fn lock_explicit(
    db: &NetlistDB,
    lock_names: &[String],
    mix_pairs: &[(String, String)],
    key: Option<&str>,
) -> Result<LockingSolution, LockError> {
    let nbits = lock_names.len() + mix_pairs.len();
    if nbits == 0 {
        return Err(LockError::InvalidConfiguration(
            "no gates named for explicit locking".into(),
        ));
    }
    let key = match key {
        Some(hex) => key_from_hex(hex, nbits)?,
        None => random_key(nbits),
    };

    let mut locked = Vec::with_capacity(lock_names.len());
    for (name, &key_bit) in lock_names.iter().zip(&key) {
        let cell = resolve_cell(db, name)?;
        locked.push(LockedGate {
            cell,
            name: name.clone(),
            key_bit,
        });
    }
    let mut mixed = Vec::with_capacity(mix_pairs.len());
    for ((name_a, name_b), &key_bit) in mix_pairs.iter().zip(&key[lock_names.len()..]) {
        let cell_a = resolve_cell(db, name_a)?;
        let cell_b = resolve_cell(db, name_b)?;
        mixed.push(MixedPair {
            cell_a,
            name_a: name_a.clone(),
            cell_b,
            name_b: name_b.clone(),
            key_bit,
        });
    }
    Ok(LockingSolution { locked, mixed, key })
}

/// Find a cell by name and check it has an output to lock.
fn resolve_cell(db: &NetlistDB, name: &str) -> Result<usize, LockError> {
    let cell = (1..db.num_cells)
        .find(|&c| db.cellnames[c].dbg_fmt_hier().to_string() == name)
        .ok_or_else(|| {
            LockError::SelectionImpossible(format!("no cell named `{}` in module", name))
        })?;
    db.cell2pin
        .iter_set(cell)
        .find(|&p| db.pindirect[p] == Direction::O)
        .ok_or_else(|| {
            LockError::MalformedNetlist(format!("cell {} has no output pin", name))
        })?;
    Ok(cell)
}

/// One row of the analysis report: coverage after locking the first
/// `locked` cells of the selection.
#[derive(Debug, Clone)]
pub struct CoverageRow {
    pub locked: usize,
    pub cell: String,
    pub cover: f64,
}

/// Analysis-only output: the selection the optimizer would make and the
/// coverage curve along it. Nothing is locked.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    pub target: OptimizationTarget,
    pub nb_candidates: usize,
    pub nb_test_vectors: usize,
    pub rows: Vec<CoverageRow>,
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "=== Locking report: target {}, {} candidates, {} test vectors ===",
            self.target, self.nb_candidates, self.nb_test_vectors
        )?;
        writeln!(f, "{:>6}  {:<32} {:>9}", "locked", "cell", "coverage")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>6}  {:<32} {:>8.2}%",
                row.locked,
                row.cell,
                100.0 * row.cover
            )?;
        }
        Ok(())
    }
}

/// Analyze the module and produce the coverage-vs-locked-cells table for
/// the configured target.
pub fn run_report(db: &NetlistDB, opts: &LockingOptions) -> Result<CoverageReport, LockError> {
    validate(opts)?;
    let mut analyzer = LockingAnalyzer::from_netlistdb(db)?;
    let budget = resolve_budget(opts, analyzer.candidates.len())?;
    analyzer.gen_test_vectors(opts.nb_test_vectors, TEST_VECTOR_SEED)?;

    let base = analyzer.compute_base_outputs();
    let singles = analyzer.compute_single_toggle_outputs();
    let matrix = analyzer.compute_corruption_matrix_from(&base, &singles);
    let selection = match opts.target {
        OptimizationTarget::Corruption => coverage::optimize_coverage(&matrix, budget, &[]),
        OptimizationTarget::Pairwise | OptimizationTarget::Hybrid => {
            let graph = analyzer.compute_pairwise_graph_from(&base, &singles);
            let cliques = clique::optimize_greedy(&graph, budget);
            match opts.target {
                OptimizationTarget::Pairwise => {
                    cliques.selected().into_iter().map(|v| v as usize).collect()
                }
                _ => {
                    let prefix: Vec<usize> = cliques
                        .largest_clique()
                        .map(|c| c.iter().map(|&v| v as usize).collect())
                        .unwrap_or_default();
                    coverage::optimize_coverage(&matrix, budget, &prefix)
                }
            }
        }
    };

    let rows = selection
        .iter()
        .enumerate()
        .map(|(i, &idx)| CoverageRow {
            locked: i + 1,
            cell: analyzer.candidate_name(idx),
            cover: corruption_cover(&matrix, &selection[..=i]),
        })
        .collect();
    Ok(CoverageReport {
        target: opts.target,
        nb_candidates: analyzer.candidates.len(),
        nb_test_vectors: analyzer.nb_test_vectors(),
        rows,
    })
}

fn validate(opts: &LockingOptions) -> Result<(), LockError> {
    if !(0.0..=100.0).contains(&opts.key_percent) {
        return Err(LockError::InvalidConfiguration(format!(
            "key percentage {} is outside [0, 100]",
            opts.key_percent
        )));
    }
    if opts.nb_test_vectors < 4 {
        return Err(LockError::InvalidConfiguration(format!(
            "at least 4 test vectors are required, got {}",
            opts.nb_test_vectors
        )));
    }
    Ok(())
}

fn resolve_budget(opts: &LockingOptions, nb_candidates: usize) -> Result<usize, LockError> {
    let mut budget = match opts.key_bits {
        Some(bits) => bits,
        None => (opts.key_percent / 100.0 * nb_candidates as f64).round() as usize,
    };
    if budget > nb_candidates {
        clilog::warn!(
            "key budget {} exceeds the {} lockable cells, clamping",
            budget,
            nb_candidates
        );
        budget = nb_candidates;
    }
    if budget == 0 {
        return Err(LockError::InvalidConfiguration(
            "key-bit budget is zero; raise the percentage or pass an absolute budget".into(),
        ));
    }
    Ok(budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::LockLeafPins;
    use crate::sim::{Simulator, ToggleSet, VectorBatch};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn load(name: &str) -> NetlistDB {
        let path = PathBuf::from(format!("tests/netlists/{}", name));
        assert!(path.exists(), "{} not found", path.display());
        NetlistDB::from_sverilog_file(&path, None, &LockLeafPins)
            .expect("cannot build netlist")
    }

    fn opts(target: OptimizationTarget, key_bits: usize) -> LockingOptions {
        LockingOptions {
            target,
            key_bits: Some(key_bits),
            nb_test_vectors: 256,
            ..Default::default()
        }
    }

    #[test]
    fn test_aig_matches_reference_evaluation() {
        // The lowered full adder must agree bit-for-bit with the word
        // formulas for sum and carry on a packed batch.
        let db = load("full_adder.v");
        let analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();

        let mut slot: HashMap<String, usize> = HashMap::new();
        for (i, &pin) in analyzer.comb_inputs.iter().enumerate() {
            slot.insert(db.pinnames[pin].1.to_string(), i);
        }
        let a = 0xAAAA_5555_0F0F_3C3Cu64;
        let b = 0xCCCC_3333_00FF_55AAu64;
        let cin = 0xF0F0_F0F0_FF00_9696u64;
        let mut words = vec![0u64; analyzer.comb_inputs.len()];
        words[slot["a"]] = a;
        words[slot["b"]] = b;
        words[slot["cin"]] = cin;

        let mut sim = Simulator::new(&analyzer.aig);
        sim.run(&VectorBatch::new(words), &ToggleSet::empty());
        for (o, &pin) in analyzer.comb_outputs.iter().enumerate() {
            let got = sim.value_of(analyzer.output_lits[o]);
            match db.pinnames[pin].1.as_str() {
                "sum" => assert_eq!(got, a ^ b ^ cin),
                "cout" => assert_eq!(got, (a & b) | ((a ^ b) & cin)),
                other => panic!("unexpected output {}", other),
            }
        }
    }

    #[test]
    fn test_two_inverters_are_separable_singletons() {
        // Disjoint cones: each inverter is observable on its own output,
        // so no pairwise edge exists and the budget is filled with
        // singletons in candidate order.
        let db = load("two_inv.v");
        let analyzer = {
            let mut a = LockingAnalyzer::from_netlistdb(&db).unwrap();
            a.gen_test_vectors(64, TEST_VECTOR_SEED).unwrap();
            a
        };
        let graph = analyzer.compute_pairwise_graph();
        assert_eq!(graph.num_vertices, 2);
        assert_eq!(graph.num_edges(), 0);

        let sol = run_logic_locking(&db, &opts(OptimizationTarget::Pairwise, 2)).unwrap();
        assert_eq!(sol.locked.len(), 2);
        assert_eq!(sol.key.len(), 2);
    }

    #[test]
    fn test_buffer_chain_graph_is_empty() {
        let db = load("buf_chain.v");
        let mut analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();
        analyzer.gen_test_vectors(64, TEST_VECTOR_SEED).unwrap();
        assert_eq!(analyzer.candidates.len(), 3);
        let graph = analyzer.compute_pairwise_graph();
        assert_eq!(graph.num_edges(), 0);
        // Singletons, ordered by candidate index.
        let sol = clique::optimize_greedy(&graph, 3);
        assert_eq!(sol.cliques, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_xor_tree_pruned_by_same_impact() {
        // Every candidate toggle flips the single XOR output identically,
        // so the redundancy rule leaves the graph empty.
        let db = load("xor_pair.v");
        let mut analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();
        analyzer.gen_test_vectors(64, TEST_VECTOR_SEED).unwrap();
        assert_eq!(analyzer.candidates.len(), 3);
        let graph = analyzer.compute_pairwise_graph();
        assert_eq!(graph.num_edges(), 0);
    }

    #[test]
    fn test_and_tree_pairwise_selects_the_clique() {
        // The four buffered fan-ins of the AND tree interlock pairwise;
        // with a budget of 4 the optimizer locks exactly that clique.
        let db = load("and_tree.v");
        let sol = run_logic_locking(&db, &opts(OptimizationTarget::Pairwise, 4)).unwrap();
        let mut names: Vec<&str> = sol.locked.iter().map(|g| g.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["u0", "u1", "u2", "u3"]);
    }

    #[test]
    fn test_and_tree_clique_feasibility() {
        let db = load("and_tree.v");
        let mut analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();
        analyzer.gen_test_vectors(256, TEST_VECTOR_SEED).unwrap();
        let graph = analyzer.compute_pairwise_graph();
        let sol = clique::optimize_greedy(&graph, 7);
        for c in &sol.cliques {
            assert!(graph.is_clique(c));
        }
        assert!(sol.num_selected() <= 7);
    }

    #[test]
    fn test_full_adder_corruption_picks_max_coverage() {
        let db = load("full_adder.v");
        let mut analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();
        analyzer.gen_test_vectors(256, TEST_VECTOR_SEED).unwrap();
        let matrix = analyzer.compute_corruption_matrix();
        let best = (0..matrix.num_candidates())
            .max_by_key(|&c| matrix.row_popcount(c))
            .unwrap();
        let selection = coverage::optimize_coverage(&matrix, 1, &[]);
        assert_eq!(selection, vec![best]);
        // The first XOR disturbs the sum on every vector and the carry on
        // some, beating both primary-output cells.
        assert_eq!(analyzer.candidate_name(best), "x0");
    }

    #[test]
    fn test_hybrid_locks_clique_then_fills_by_coverage() {
        let db = load("and_tree.v");
        let mut analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();
        analyzer.gen_test_vectors(256, TEST_VECTOR_SEED).unwrap();
        let base = analyzer.compute_base_outputs();
        let singles = analyzer.compute_single_toggle_outputs();
        let graph = analyzer.compute_pairwise_graph_from(&base, &singles);
        let prefix: Vec<usize> = clique::optimize_greedy(&graph, 6)
            .largest_clique()
            .unwrap()
            .iter()
            .map(|&v| v as usize)
            .collect();
        assert_eq!(prefix.len(), 4);

        let sol = run_logic_locking(&db, &opts(OptimizationTarget::Hybrid, 6)).unwrap();
        assert!(sol.locked.len() <= 6);
        let selected_cells: Vec<&str> = sol.locked.iter().map(|g| g.name.as_str()).collect();
        // The mandatory clique prefix comes first.
        for (i, &idx) in prefix.iter().enumerate() {
            assert_eq!(selected_cells[i], analyzer.candidate_name(idx));
        }
    }

    #[test]
    fn test_sequential_boundary_classification() {
        let db = load("dff_loop.v");
        let analyzer = LockingAnalyzer::from_netlistdb(&db).unwrap();
        // The flip-flop Q output counts as a combinational input and its
        // D input as a combinational output next to the primary output.
        assert_eq!(analyzer.comb_outputs.len(), 2);
        assert_eq!(analyzer.candidates.len(), 2);
    }

    #[test]
    fn test_explicit_lock_and_mix() {
        let db = load("full_adder.v");
        let sol = lock_explicit(
            &db,
            &["x0".to_string(), "a0".to_string()],
            &[("x1".to_string(), "a1".to_string())],
            Some("2"),
        )
        .unwrap();
        assert_eq!(sol.locked.len(), 2);
        assert_eq!(sol.mixed.len(), 1);
        assert_eq!(sol.key, vec![false, true, false]);
        assert!(!sol.locked[0].key_bit);
        assert!(sol.locked[1].key_bit);
        assert_eq!(sol.key_hex(), "2");
    }

    #[test]
    fn test_explicit_lock_unknown_name() {
        let db = load("full_adder.v");
        let err = lock_explicit(&db, &["nope".to_string()], &[], None).unwrap_err();
        assert!(matches!(err, LockError::SelectionImpossible(_)));
    }

    #[test]
    fn test_invalid_configuration() {
        let db = load("full_adder.v");
        let bad_percent = LockingOptions {
            key_percent: 120.0,
            ..Default::default()
        };
        assert!(matches!(
            run_logic_locking(&db, &bad_percent),
            Err(LockError::InvalidConfiguration(_))
        ));
        let few_vectors = LockingOptions {
            nb_test_vectors: 2,
            key_bits: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            run_logic_locking(&db, &few_vectors),
            Err(LockError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_explicit_key_too_short() {
        let db = load("and_tree.v");
        let o = LockingOptions {
            key: Some("1".to_string()),
            key_bits: Some(6),
            nb_test_vectors: 64,
            ..Default::default()
        };
        assert!(matches!(
            run_logic_locking(&db, &o),
            Err(LockError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_unsupported_cell_is_fatal() {
        let db = load("unsupported.v");
        assert!(matches!(
            LockingAnalyzer::from_netlistdb(&db),
            Err(LockError::UnsupportedCell { .. })
        ));
    }

    #[test]
    fn test_combinational_cycle_is_fatal() {
        let db = load("cycle.v");
        assert!(matches!(
            LockingAnalyzer::from_netlistdb(&db),
            Err(LockError::MalformedNetlist(_))
        ));
    }

    #[test]
    fn test_report_coverage_is_monotone() {
        let db = load("and_tree.v");
        let report = run_report(&db, &opts(OptimizationTarget::Corruption, 5)).unwrap();
        assert!(!report.rows.is_empty());
        let mut last = 0.0;
        for row in &report.rows {
            assert!(row.cover >= last);
            last = row.cover;
        }
        let rendered = format!("{}", report);
        assert!(rendered.contains("coverage"));
    }
}
