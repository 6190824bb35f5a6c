// SPDX-License-Identifier: Apache-2.0
//! Bit-parallel combinational simulator.
//!
//! One simulation call evaluates the whole AIG on a batch of 64 packed
//! test vectors: every value is a 64-bit word, bit `t` belonging to test
//! vector `t` of the batch. Because AND fan-ins reference strictly
//! lower-indexed nodes, a single left-to-right sweep of the node array
//! suffices.

use crate::aig::{Aig, AigDriver};
use smallvec::SmallVec;

/// 64 test vectors packed into one word per combinational input, in AIG
/// input order.
#[derive(Debug, Clone, Default)]
pub struct VectorBatch {
    pub words: Vec<u64>,
}

impl VectorBatch {
    pub fn new(words: Vec<u64>) -> VectorBatch {
        VectorBatch { words }
    }
}

/// A set of AIG nodes whose computed value is complemented during one
/// simulation pass. The toggle is applied after the node value is
/// computed: it models cutting the wire and feeding the opposite value
/// to every consumer downstream.
#[derive(Debug, Clone, Default)]
pub struct ToggleSet {
    nodes: SmallVec<[usize; 4]>,
}

impl ToggleSet {
    pub fn empty() -> ToggleSet {
        ToggleSet::default()
    }

    pub fn single(node: usize) -> ToggleSet {
        let mut t = ToggleSet::default();
        t.insert(node);
        t
    }

    pub fn pair(a: usize, b: usize) -> ToggleSet {
        let mut t = ToggleSet::default();
        t.insert(a);
        t.insert(b);
        t
    }

    /// Insert a node, keeping the set sorted and duplicate-free.
    pub fn insert(&mut self, node: usize) {
        if let Err(pos) = self.nodes.binary_search(&node) {
            self.nodes.insert(pos, node);
        }
    }

    pub fn contains(&self, node: usize) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Reusable simulation state: one value word per AIG node.
pub struct Simulator<'a> {
    aig: &'a Aig,
    values: Vec<u64>,
}

impl<'a> Simulator<'a> {
    pub fn new(aig: &'a Aig) -> Simulator<'a> {
        Simulator {
            aig,
            values: vec![0; aig.num_nodes()],
        }
    }

    /// Evaluate the AIG on one batch with the given toggle set.
    pub fn run(&mut self, batch: &VectorBatch, toggles: &ToggleSet) {
        assert_eq!(batch.words.len(), self.aig.inputs.len());
        for (slot, &node) in self.aig.inputs.iter().enumerate() {
            self.values[node] = batch.words[slot];
        }
        for node in 0..self.aig.num_nodes() {
            let v = match self.aig.drivers[node] {
                AigDriver::Tie0 => 0,
                AigDriver::Input(_) => self.values[node],
                AigDriver::AndGate(l1, l2) => self.fetch(l1) & self.fetch(l2),
            };
            self.values[node] = if toggles.contains(node) { !v } else { v };
        }
    }

    #[inline]
    fn fetch(&self, lit: usize) -> u64 {
        let inv = if lit & 1 != 0 { !0u64 } else { 0 };
        self.values[lit >> 1] ^ inv
    }

    /// Word value of a literal after [`Simulator::run`].
    #[inline]
    pub fn value_of(&self, lit: usize) -> u64 {
        self.fetch(lit)
    }

    /// Collect the values of the given output literals.
    pub fn outputs(&self, lits: &[usize]) -> Vec<u64> {
        lits.iter().map(|&l| self.fetch(l)).collect()
    }
}
