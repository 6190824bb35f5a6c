// SPDX-License-Identifier: Apache-2.0
//! Security analysis of locking candidates.
//!
//! The analyzer classifies the module boundary (combinational inputs are
//! primary inputs plus flip-flop outputs; combinational outputs are
//! primary outputs plus flip-flop inputs), enumerates lockable signals,
//! builds the AIG once, and drives the bit-parallel simulator to derive
//! two metrics per candidate set: the pairwise-security graph and the
//! per-output per-vector corruption bitmaps.

use crate::aig::{Aig, AigFromNetlist};
use crate::cells::CellKind;
use crate::clique::PairwiseGraph;
use crate::coverage::CorruptionMatrix;
use crate::error::LockError;
use crate::sim::{Simulator, ToggleSet, VectorBatch};
use indexmap::IndexSet;
use netlistdb::{Direction, GeneralHierName, NetlistDB};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

/// A lockable signal: the output of a supported combinational cell.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Netlist cell id.
    pub cell: usize,
    /// The cell's output pin.
    pub pin: usize,
    /// AIG node computing the signal.
    pub node: usize,
}

/// Per-module analysis state, built once and read-only afterwards.
pub struct LockingAnalyzer<'a> {
    pub db: &'a NetlistDB,
    pub aig: Aig,
    /// Literal for every netlist pin in the combinational cone.
    pub pin2lit: Vec<usize>,
    /// Combinational input pins, in AIG input order.
    pub comb_inputs: IndexSet<usize>,
    /// Combinational output pins.
    pub comb_outputs: Vec<usize>,
    /// Literals of the combinational outputs, parallel to `comb_outputs`.
    pub output_lits: Vec<usize>,
    pub candidates: Vec<Candidate>,
    batches: Vec<VectorBatch>,
    num_vectors: usize,
}

impl<'a> LockingAnalyzer<'a> {
    /// Classify the module boundary, enumerate candidates, and build the
    /// AIG. Fails on unsupported cell types, combinational cycles, and
    /// undriven pins.
    pub fn from_netlistdb(db: &'a NetlistDB) -> Result<LockingAnalyzer<'a>, LockError> {
        let mut comb_inputs = IndexSet::new();
        let mut comb_outputs = Vec::new();

        // Top-level ports: cell 0 drives primary inputs into the module
        // and absorbs primary outputs.
        for pin in 0..db.num_pins {
            if db.pin2cell[pin] != 0 {
                continue;
            }
            match db.pindirect[pin] {
                Direction::O => {
                    comb_inputs.insert(pin);
                }
                Direction::I => comb_outputs.push(pin),
                _ => {}
            }
        }

        // Flip-flops are boundary pins: Q joins the inputs, D the outputs.
        let mut lockable = Vec::new();
        for cellid in 1..db.num_cells {
            let celltype = db.celltypes[cellid].as_str();
            let kind = CellKind::from_celltype(celltype).ok_or_else(|| {
                LockError::UnsupportedCell {
                    cell: db.cellnames[cellid].dbg_fmt_hier().to_string(),
                    cell_type: celltype.to_string(),
                }
            })?;
            if kind == CellKind::Dff {
                for pin in db.cell2pin.iter_set(cellid) {
                    match db.pinnames[pin].1.as_str() {
                        "Q" => {
                            comb_inputs.insert(pin);
                        }
                        "D" => comb_outputs.push(pin),
                        _ => {}
                    }
                }
                continue;
            }
            if kind.is_lockable() {
                let pin = db
                    .cell2pin
                    .iter_set(cellid)
                    .find(|&p| db.pindirect[p] == Direction::O)
                    .ok_or_else(|| {
                        LockError::MalformedNetlist(format!(
                            "cell {} has no output pin",
                            db.cellnames[cellid].dbg_fmt_hier()
                        ))
                    })?;
                lockable.push((cellid, pin));
            }
        }

        let AigFromNetlist { aig, pin2lit } =
            AigFromNetlist::build(db, &comb_inputs, &comb_outputs)?;
        let output_lits = comb_outputs.iter().map(|&p| pin2lit[p]).collect();

        let mut candidates = Vec::with_capacity(lockable.len());
        for (cell, pin) in lockable {
            let lit = pin2lit[pin];
            if lit == usize::MAX {
                clilog::warn!(
                    "cell {} drives no combinational output, skipping",
                    db.cellnames[cell].dbg_fmt_hier()
                );
                continue;
            }
            if lit >> 1 == 0 {
                clilog::warn!(
                    "cell {} computes a constant, skipping",
                    db.cellnames[cell].dbg_fmt_hier()
                );
                continue;
            }
            candidates.push(Candidate {
                cell,
                pin,
                node: lit >> 1,
            });
        }

        clilog::info!(
            "analyzer: {} inputs, {} outputs, {} candidates, {} AIG nodes",
            comb_inputs.len(),
            comb_outputs.len(),
            candidates.len(),
            aig.num_nodes()
        );

        Ok(LockingAnalyzer {
            db,
            aig,
            pin2lit,
            comb_inputs,
            comb_outputs,
            output_lits,
            candidates,
            batches: Vec::new(),
            num_vectors: 0,
        })
    }

    /// Generate `nb` random test vectors, rounded up to a whole number of
    /// 64-wide batches. Each input bit is Bernoulli(1/2) under the seeded
    /// generator, so an identical seed reproduces the analysis exactly.
    pub fn gen_test_vectors(&mut self, nb: usize, seed: u64) -> Result<(), LockError> {
        if nb < 4 {
            return Err(LockError::InvalidConfiguration(format!(
                "at least 4 test vectors are required, got {}",
                nb
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let nb_batches = nb.div_ceil(64);
        self.batches = (0..nb_batches)
            .map(|_| VectorBatch::new((0..self.aig.inputs.len()).map(|_| rng.gen()).collect()))
            .collect();
        self.num_vectors = nb_batches * 64;
        Ok(())
    }

    pub fn nb_test_vectors(&self) -> usize {
        self.num_vectors
    }

    /// Toggle-free output words, `[batch][output]`.
    pub fn compute_base_outputs(&self) -> Vec<Vec<u64>> {
        base_outputs(&self.aig, &self.output_lits, &self.batches)
    }

    /// Single-toggle output words per candidate, `[candidate][batch][output]`.
    /// Rows are independent and computed in parallel.
    pub fn compute_single_toggle_outputs(&self) -> Vec<Vec<Vec<u64>>> {
        let nodes: Vec<usize> = self.candidates.iter().map(|c| c.node).collect();
        single_toggle_outputs(&self.aig, &self.output_lits, &nodes, &self.batches)
    }

    /// Pairwise-security graph over the candidates (convenience form).
    pub fn compute_pairwise_graph(&self) -> PairwiseGraph {
        let base = self.compute_base_outputs();
        let singles = self.compute_single_toggle_outputs();
        self.compute_pairwise_graph_from(&base, &singles)
    }

    /// Pairwise-security graph from precomputed base and single-toggle
    /// passes; only the joint pass is simulated per pair.
    pub fn compute_pairwise_graph_from(
        &self,
        base: &[Vec<u64>],
        singles: &[Vec<Vec<u64>>],
    ) -> PairwiseGraph {
        let nodes: Vec<usize> = self.candidates.iter().map(|c| c.node).collect();
        let timer = clilog::stimer!("pairwise security graph");
        let graph = pairwise_graph(
            &self.aig,
            &self.output_lits,
            &nodes,
            &self.batches,
            base,
            singles,
        );
        clilog::finish!(timer);
        clilog::info!(
            "pairwise graph: {} vertices, {} edges",
            graph.num_vertices,
            graph.num_edges()
        );
        graph
    }

    /// Corruption matrix over the candidates (convenience form).
    pub fn compute_corruption_matrix(&self) -> CorruptionMatrix {
        let base = self.compute_base_outputs();
        let singles = self.compute_single_toggle_outputs();
        self.compute_corruption_matrix_from(&base, &singles)
    }

    /// Corruption matrix from precomputed passes: row bit (o, t) is set
    /// iff toggling the candidate flips output o on test vector t.
    pub fn compute_corruption_matrix_from(
        &self,
        base: &[Vec<u64>],
        singles: &[Vec<Vec<u64>>],
    ) -> CorruptionMatrix {
        corruption_matrix(self.output_lits.len(), base, singles)
    }

    /// Direct form of the pairwise predicate, mainly for inspection.
    pub fn is_pairwise_secure(&self, i: usize, j: usize) -> bool {
        let base = self.compute_base_outputs();
        let nodes = [self.candidates[i].node, self.candidates[j].node];
        let singles = single_toggle_outputs(&self.aig, &self.output_lits, &nodes, &self.batches);
        let mut sim = Simulator::new(&self.aig);
        pair_verdict(
            &mut sim,
            &self.output_lits,
            &self.batches,
            &base,
            &singles[0],
            &singles[1],
            nodes[0],
            nodes[1],
        )
    }

    /// Human-readable candidate name for reports and scripts.
    pub fn candidate_name(&self, idx: usize) -> String {
        self.db.cellnames[self.candidates[idx].cell]
            .dbg_fmt_hier()
            .to_string()
    }
}

/// Toggle-free reference pass, `[batch][output]`.
pub fn base_outputs(aig: &Aig, output_lits: &[usize], batches: &[VectorBatch]) -> Vec<Vec<u64>> {
    assert!(!batches.is_empty(), "test vectors must be generated first");
    let mut sim = Simulator::new(aig);
    batches
        .iter()
        .map(|batch| {
            sim.run(batch, &ToggleSet::empty());
            sim.outputs(output_lits)
        })
        .collect()
}

/// One toggle pass per node, `[node][batch][output]`, in parallel.
pub fn single_toggle_outputs(
    aig: &Aig,
    output_lits: &[usize],
    nodes: &[usize],
    batches: &[VectorBatch],
) -> Vec<Vec<Vec<u64>>> {
    nodes
        .par_iter()
        .map_init(
            || Simulator::new(aig),
            |sim, &node| {
                let toggles = ToggleSet::single(node);
                batches
                    .iter()
                    .map(|batch| {
                        sim.run(batch, &toggles);
                        sim.outputs(output_lits)
                    })
                    .collect()
            },
        )
        .collect()
}

/// Build the pairwise-security graph. The candidate-pair loop is
/// embarrassingly parallel over the read-only AIG.
pub fn pairwise_graph(
    aig: &Aig,
    output_lits: &[usize],
    nodes: &[usize],
    batches: &[VectorBatch],
    base: &[Vec<u64>],
    singles: &[Vec<Vec<u64>>],
) -> PairwiseGraph {
    let n = nodes.len();
    let pairs: Vec<(u32, u32)> = (0..n as u32)
        .flat_map(|i| (i + 1..n as u32).map(move |j| (i, j)))
        .collect();
    let verdicts: Vec<Option<(u32, u32)>> = pairs
        .par_iter()
        .map_init(
            || Simulator::new(aig),
            |sim, &(i, j)| {
                pair_verdict(
                    sim,
                    output_lits,
                    batches,
                    base,
                    &singles[i as usize],
                    &singles[j as usize],
                    nodes[i as usize],
                    nodes[j as usize],
                )
                .then_some((i, j))
            },
        )
        .collect();
    PairwiseGraph::from_edges(n, verdicts.into_iter().flatten())
}

/// The pairwise-security predicate for one candidate pair.
///
/// Per output word and batch, with f the output under a toggle set:
///   sens_a = (f(∅) ^ f({a})) | (f({b}) ^ f({a,b}))
///   sens_b = (f(∅) ^ f({b})) | (f({a}) ^ f({a,b}))
/// The pair is rejected as soon as any bit position is sensitive to one
/// signal but not the other. Pairs whose single-toggle outputs agree
/// everywhere are rejected as redundant: they would survive the
/// sensitivity test yet add no key ambiguity (buffer chains, xor trees).
#[allow(clippy::too_many_arguments)]
fn pair_verdict(
    sim: &mut Simulator,
    output_lits: &[usize],
    batches: &[VectorBatch],
    base: &[Vec<u64>],
    single_a: &[Vec<u64>],
    single_b: &[Vec<u64>],
    node_a: usize,
    node_b: usize,
) -> bool {
    let toggles = ToggleSet::pair(node_a, node_b);
    let mut same_impact = true;
    for (k, batch) in batches.iter().enumerate() {
        sim.run(batch, &toggles);
        for (o, &lit) in output_lits.iter().enumerate() {
            let both = sim.value_of(lit);
            let none = base[k][o];
            let fa = single_a[k][o];
            let fb = single_b[k][o];
            let sens_a = (none ^ fa) | (fb ^ both);
            let sens_b = (none ^ fb) | (fa ^ both);
            if sens_a != sens_b {
                return false;
            }
            if fa != fb {
                same_impact = false;
            }
        }
    }
    !same_impact
}

/// Corruption rows from the cached passes: `row[o * batches + k] =
/// base[k][o] ^ single[k][o]`.
pub fn corruption_matrix(
    num_outputs: usize,
    base: &[Vec<u64>],
    singles: &[Vec<Vec<u64>>],
) -> CorruptionMatrix {
    let nb_batches = base.len();
    let rows = singles
        .iter()
        .map(|single| {
            let mut row = vec![0u64; num_outputs * nb_batches];
            for (k, outs) in single.iter().enumerate() {
                for (o, &word) in outs.iter().enumerate() {
                    row[o * nb_batches + k] = base[k][o] ^ word;
                }
            }
            row
        })
        .collect();
    CorruptionMatrix::new(num_outputs, nb_batches, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aig::Aig;

    fn one_batch(columns: &[u64]) -> Vec<VectorBatch> {
        vec![VectorBatch::new(columns.to_vec())]
    }

    fn graph_for(
        aig: &Aig,
        output_lits: &[usize],
        nodes: &[usize],
        batches: &[VectorBatch],
    ) -> PairwiseGraph {
        let base = base_outputs(aig, output_lits, batches);
        let singles = single_toggle_outputs(aig, output_lits, nodes, batches);
        pairwise_graph(aig, output_lits, nodes, batches, &base, &singles)
    }

    #[test]
    fn test_and_fanins_are_pairwise_secure() {
        // y = a AND b with both fan-in signals as candidates. Whenever
        // toggling one signal disturbs y, so does toggling the other
        // (the disturbed cases are exactly those where the joint toggle
        // matters), yet their impact differs on vectors where a != b.
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let y = aig.and2(a, b);
        let batches = one_batch(&[0b0011, 0b0101]);
        let g = graph_for(&aig, &[y], &[a >> 1, b >> 1], &batches);
        assert_eq!(g.num_edges(), 1);
        assert!(g.has_edge(0, 1));
    }

    #[test]
    fn test_disjoint_cones_are_separable() {
        // Two inverters on disjoint inputs driving disjoint outputs: each
        // output is sensitive to exactly one of the toggles, so the
        // sensitivity profiles disagree and the pair is separable.
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let x = a ^ 1;
        let y = b ^ 1;
        let batches = one_batch(&[0b0011, 0b0101]);
        let g = graph_for(&aig, &[x, y], &[x >> 1, y >> 1], &batches);
        assert_eq!(g.num_edges(), 0);
    }

    #[test]
    fn test_buffer_chain_is_redundant() {
        // Buffers collapse onto the driving node, so all three chain taps
        // denote the same AIG node; the same-impact rule rejects every
        // pair and the graph stays empty.
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let y = aig.and2(a, b);
        let node = y >> 1;
        let batches = one_batch(&[0b0110, 0b1010]);
        let g = graph_for(&aig, &[y], &[node, node, node], &batches);
        assert_eq!(g.num_edges(), 0);
    }

    #[test]
    fn test_xor_tree_is_pruned() {
        // y = p XOR q: toggling p, q, or y itself flips y identically on
        // every vector. All three pairs fall to the same-impact rule —
        // locking more than one of them would add no key ambiguity.
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let y = aig.xor2(a, b);
        let nodes = [a >> 1, b >> 1, y >> 1];
        let batches = one_batch(&[0b0011, 0b0101]);
        let g = graph_for(&aig, &[y], &nodes, &batches);
        assert_eq!(g.num_edges(), 0);
    }

    #[test]
    fn test_mux_select_pairs_with_data() {
        // y = MUX(a, b, s). The select masks one data leg per vector, so
        // the two data toggles are never sensitive together and stay
        // separable; the select toggle disturbs y exactly when the data
        // legs differ, which always coincides with a sensitive data leg.
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let s = aig.add_input(2);
        let y = aig.mux(a, b, s);
        let nodes = [a >> 1, b >> 1, s >> 1];
        // All 8 input combinations inside one batch.
        let batches = one_batch(&[0b10101010, 0b11001100, 0b11110000]);
        let g = graph_for(&aig, &[y], &nodes, &batches);
        assert!(!g.has_edge(0, 1));
        assert!(g.has_edge(0, 2));
        assert!(g.has_edge(1, 2));
        assert_eq!(g.num_edges(), 2);
    }

    #[test]
    fn test_and_tree_forms_clique() {
        // A 4-input AND tree interlocks all four fan-in signals: the
        // pairwise graph over them is complete.
        let mut aig = Aig::new();
        let ins: Vec<usize> = (0..4).map(|p| aig.add_input(p)).collect();
        let n1 = aig.and2(ins[0], ins[1]);
        let n2 = aig.and2(ins[2], ins[3]);
        let y = aig.and2(n1, n2);
        let nodes: Vec<usize> = ins.iter().map(|&l| l >> 1).collect();
        // All 16 input combinations.
        let batches = one_batch(&[0xAAAA, 0xCCCC, 0xF0F0, 0xFF00]);
        let g = graph_for(&aig, &[y], &nodes, &batches);
        assert_eq!(g.num_edges(), 6);
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert!(g.has_edge(i, j));
            }
        }
    }

    #[test]
    fn test_pairwise_symmetry_and_irreflexivity() {
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let y = aig.and2(a, b);
        let batches = one_batch(&[0b0011, 0b0101]);
        let base = base_outputs(&aig, &[y], &batches);
        let nodes = [a >> 1, b >> 1];
        let singles = single_toggle_outputs(&aig, &[y], &nodes, &batches);
        let mut sim = Simulator::new(&aig);
        let ab = pair_verdict(
            &mut sim, &[y], &batches, &base, &singles[0], &singles[1], nodes[0], nodes[1],
        );
        let ba = pair_verdict(
            &mut sim, &[y], &batches, &base, &singles[1], &singles[0], nodes[1], nodes[0],
        );
        assert!(ab);
        assert_eq!(ab, ba);
        // A signal paired with itself always has the same impact.
        let aa = pair_verdict(
            &mut sim, &[y], &batches, &base, &singles[0], &singles[0], nodes[0], nodes[0],
        );
        assert!(!aa);
    }

    #[test]
    fn test_corruption_rows() {
        // Toggling the AND node itself flips the output on every vector;
        // toggling a fan-in flips it only where the other fan-in is 1.
        let mut aig = Aig::new();
        let a = aig.add_input(0);
        let b = aig.add_input(1);
        let y = aig.and2(a, b);
        let batches = one_batch(&[0b0011, 0b0101]);
        let base = base_outputs(&aig, &[y], &batches);
        let singles = single_toggle_outputs(&aig, &[y], &[y >> 1, a >> 1], &batches);
        let m = corruption_matrix(1, &base, &singles);
        assert_eq!(m.row(0), &[!0u64]);
        assert_eq!(m.row(1) [0] & 0xF, 0b0101);
    }
}
