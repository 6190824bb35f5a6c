// SPDX-License-Identifier: Apache-2.0
//! And-inverter graph format
//!
//! The combinational logic of one module is lowered to an AIG whose nodes
//! live in a single append-only array in topological order. Edges are
//! literals: the low bit is the inversion flag, the remaining bits index a
//! node. Node 0 is tied to constant zero, so literal 0 is `0` and literal
//! 1 is `1`.

use crate::cells::CellKind;
use crate::error::LockError;
use indexmap::{IndexMap, IndexSet};
use netlistdb::{Direction, NetlistDB};

/// Constant-zero literal (node 0, uninverted).
pub const LIT_ZERO: usize = 0;
/// Constant-one literal (node 0, inverted).
pub const LIT_ONE: usize = 1;

/// Work item for the iterative netlist traversal.
/// Two-phase: Visit pushes dependencies, Process computes the literal.
#[derive(Clone, Copy)]
enum WorkItem {
    Visit(usize),
    Process(usize),
}

/// The driver of an AIG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AigDriver {
    /// Tied to constant zero. Only node 0 has this driver.
    Tie0,
    /// A combinational input, carrying its netlist pin id.
    Input(usize),
    /// A two-input AND gate. Fan-in literals carry the inversion bit
    /// in their LSB and always reference lower-indexed nodes.
    AndGate(usize, usize),
}

/// An and-inverter graph.
#[derive(Debug, Default)]
pub struct Aig {
    /// Node drivers, indexed by node. `drivers[0]` is [`AigDriver::Tie0`].
    pub drivers: Vec<AigDriver>,
    /// Input node indices in creation order. A test-vector batch assigns
    /// one 64-bit word per entry, in this order.
    pub inputs: Vec<usize>,
    /// Structural-hash cache for AND gates.
    and_cache: IndexMap<(usize, usize), usize>,
}

impl Aig {
    pub fn new() -> Aig {
        Aig {
            drivers: vec![AigDriver::Tie0],
            inputs: Vec::new(),
            and_cache: IndexMap::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.drivers.len()
    }

    pub fn num_and_gates(&self) -> usize {
        self.and_cache.len()
    }

    /// Add an input node and return its (uninverted) literal.
    pub fn add_input(&mut self, pin: usize) -> usize {
        let node = self.drivers.len();
        self.drivers.push(AigDriver::Input(pin));
        self.inputs.push(node);
        node << 1
    }

    /// Add an AND of two literals, with constant folding and structural
    /// hashing. Inputs commute; the cache key is the sorted pair.
    pub fn and2(&mut self, a: usize, b: usize) -> usize {
        if a == LIT_ZERO || b == LIT_ZERO || (a ^ b) == 1 {
            return LIT_ZERO;
        }
        if a == LIT_ONE || a == b {
            return b;
        }
        if b == LIT_ONE {
            return a;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        if let Some(&node) = self.and_cache.get(&(a, b)) {
            return node << 1;
        }
        let node = self.drivers.len();
        self.drivers.push(AigDriver::AndGate(a, b));
        self.and_cache.insert((a, b), node);
        node << 1
    }

    pub fn or2(&mut self, a: usize, b: usize) -> usize {
        self.and2(a ^ 1, b ^ 1) ^ 1
    }

    pub fn nand2(&mut self, a: usize, b: usize) -> usize {
        self.and2(a, b) ^ 1
    }

    pub fn nor2(&mut self, a: usize, b: usize) -> usize {
        self.or2(a, b) ^ 1
    }

    /// `a XOR b = (a AND !b) OR (!a AND b)`.
    pub fn xor2(&mut self, a: usize, b: usize) -> usize {
        let p = self.and2(a, b ^ 1);
        let q = self.and2(a ^ 1, b);
        self.or2(p, q)
    }

    pub fn xnor2(&mut self, a: usize, b: usize) -> usize {
        self.xor2(a, b) ^ 1
    }

    /// `MUX(a, b, s) = (s AND b) OR (!s AND a)`: `a` when `s`=0.
    pub fn mux(&mut self, a: usize, b: usize, s: usize) -> usize {
        let p = self.and2(s, b);
        let q = self.and2(s ^ 1, a);
        self.or2(p, q)
    }

    /// Check the topological-order invariant: AND fan-ins reference
    /// strictly lower-indexed nodes.
    pub fn is_topo_sorted(&self) -> bool {
        self.drivers.iter().enumerate().all(|(i, d)| match *d {
            AigDriver::AndGate(a, b) => (a >> 1) < i && (b >> 1) < i,
            _ => true,
        })
    }
}

/// An AIG built from a netlist, together with the pin-to-literal map.
#[derive(Debug)]
pub struct AigFromNetlist {
    pub aig: Aig,
    /// Literal for every netlist pin in the combinational cone;
    /// `usize::MAX` for pins that were never reached (e.g. clock pins).
    pub pin2lit: Vec<usize>,
}

impl AigFromNetlist {
    /// Build the AIG for the combinational logic between `comb_inputs`
    /// and `comb_outputs` of the module in `db`.
    ///
    /// Input nodes are created for `comb_inputs` in iteration order, so
    /// batch words line up with that order. Traversal starts from each
    /// combinational output and walks driver cells; a combinational
    /// cycle or an undriven cell input is fatal, as is any cell type
    /// outside the supported library.
    pub fn build(
        db: &NetlistDB,
        comb_inputs: &IndexSet<usize>,
        comb_outputs: &[usize],
    ) -> Result<AigFromNetlist, LockError> {
        let mut aig = Aig::new();
        let mut pin2lit = vec![usize::MAX; db.num_pins];
        for &pin in comb_inputs {
            pin2lit[pin] = aig.add_input(pin);
        }

        let mut instack = vec![false; db.num_pins];
        let mut walk = NetlistWalk {
            db,
            aig: &mut aig,
            pin2lit: &mut pin2lit,
            instack: &mut instack,
        };
        for &pin in comb_outputs {
            walk.run(pin)?;
        }
        Ok(AigFromNetlist { aig, pin2lit })
    }
}

struct NetlistWalk<'a> {
    db: &'a NetlistDB,
    aig: &'a mut Aig,
    pin2lit: &'a mut Vec<usize>,
    instack: &'a mut Vec<bool>,
}

impl NetlistWalk<'_> {
    fn run(&mut self, start_pin: usize) -> Result<(), LockError> {
        let mut work_stack = vec![WorkItem::Visit(start_pin)];

        while let Some(item) = work_stack.pop() {
            match item {
                WorkItem::Visit(pin) => {
                    if self.pin2lit[pin] != usize::MAX {
                        continue;
                    }
                    if self.instack[pin] {
                        return Err(LockError::MalformedNetlist(format!(
                            "combinational cycle through pin {}",
                            crate::cells::fmt_pin(&self.db.pinnames[pin])
                        )));
                    }
                    self.instack[pin] = true;

                    if self.db.pindirect[pin] == Direction::I {
                        // A cell input or primary output port: resolve
                        // through the net to the driving pin.
                        let netid = self.db.pin2net[pin];
                        if Some(netid) == self.db.net_zero {
                            self.pin2lit[pin] = LIT_ZERO;
                            self.instack[pin] = false;
                        } else if Some(netid) == self.db.net_one {
                            self.pin2lit[pin] = LIT_ONE;
                            self.instack[pin] = false;
                        } else if let Some(driver) = self.net_driver(netid) {
                            work_stack.push(WorkItem::Process(pin));
                            work_stack.push(WorkItem::Visit(driver));
                        } else {
                            return Err(LockError::MalformedNetlist(format!(
                                "pin {} has no driver on its net",
                                crate::cells::fmt_pin(&self.db.pinnames[pin])
                            )));
                        }
                        continue;
                    }

                    // An output pin. Primary inputs and flip-flop outputs
                    // were pre-seeded as AIG inputs, so only supported
                    // combinational cells remain.
                    let cellid = self.db.pin2cell[pin];
                    if cellid == 0 {
                        // A top-level port missed by classification;
                        // treat it as a fresh input.
                        self.pin2lit[pin] = self.aig.add_input(pin);
                        self.instack[pin] = false;
                        continue;
                    }
                    let celltype = self.db.celltypes[cellid].as_str();
                    let kind = CellKind::from_celltype(celltype).ok_or_else(|| {
                        LockError::UnsupportedCell {
                            cell: self.db.cellnames[cellid].to_string(),
                            cell_type: celltype.to_string(),
                        }
                    })?;
                    debug_assert!(kind.is_combinational(), "flip-flop outputs are pre-seeded");

                    work_stack.push(WorkItem::Process(pin));
                    for dep in self.db.cell2pin.iter_set(cellid) {
                        if self.db.pindirect[dep] == Direction::I {
                            work_stack.push(WorkItem::Visit(dep));
                        }
                    }
                }

                WorkItem::Process(pin) => {
                    if self.db.pindirect[pin] == Direction::I {
                        let netid = self.db.pin2net[pin];
                        let driver = self.net_driver(netid).expect("driver checked in Visit");
                        self.pin2lit[pin] = self.pin2lit[driver];
                        self.instack[pin] = false;
                        continue;
                    }
                    let cellid = self.db.pin2cell[pin];
                    let celltype = self.db.celltypes[cellid].as_str();
                    let kind = CellKind::from_celltype(celltype).expect("checked in Visit");
                    self.pin2lit[pin] = self.eval_cell(cellid, kind)?;
                    self.instack[pin] = false;
                }
            }
        }
        Ok(())
    }

    /// Find the driving pin of a net: an output-direction pin, or a
    /// top-level port pin (cell 0).
    fn net_driver(&self, netid: usize) -> Option<usize> {
        let start = self.db.net2pin.start[netid];
        let end = if netid + 1 < self.db.net2pin.start.len() {
            self.db.net2pin.start[netid + 1]
        } else {
            self.db.net2pin.items.len()
        };
        self.db.net2pin.items[start..end]
            .iter()
            .copied()
            .find(|&np| self.db.pindirect[np] == Direction::O || self.db.pin2cell[np] == 0)
    }

    /// Lower one combinational cell to AND+inversion from its already
    /// resolved input literals.
    fn eval_cell(&mut self, cellid: usize, kind: CellKind) -> Result<usize, LockError> {
        let mut port_lit = [usize::MAX; 4];
        let mut sel_lit = usize::MAX;
        for pinid in self.db.cell2pin.iter_set(cellid) {
            if self.db.pindirect[pinid] != Direction::I {
                continue;
            }
            let lit = self.pin2lit[pinid];
            match self.db.pinnames[pinid].1.as_str() {
                "A" => port_lit[0] = lit,
                "B" => port_lit[1] = lit,
                "C" => port_lit[2] = lit,
                "D" => port_lit[3] = lit,
                "S" => sel_lit = lit,
                _ => {}
            }
        }

        let missing = |port: &str| {
            LockError::MalformedNetlist(format!(
                "cell {} is missing input port {}",
                self.db.cellnames[cellid],
                port
            ))
        };
        let a = port_lit[0];
        if a == usize::MAX {
            return Err(missing("A"));
        }

        Ok(match kind {
            CellKind::Not => a ^ 1,
            CellKind::Buf => a,
            CellKind::Mux => {
                let b = port_lit[1];
                if b == usize::MAX {
                    return Err(missing("B"));
                }
                if sel_lit == usize::MAX {
                    return Err(missing("S"));
                }
                self.aig.mux(a, b, sel_lit)
            }
            CellKind::And | CellKind::Nand | CellKind::Or | CellKind::Nor | CellKind::Xor
            | CellKind::Xnor => {
                if port_lit[1] == usize::MAX {
                    return Err(missing("B"));
                }
                // Multi-input gates reduce left to right over A, B, C, D.
                let mut acc = a;
                for &lit in port_lit[1..].iter().filter(|&&l| l != usize::MAX) {
                    acc = match kind {
                        CellKind::And | CellKind::Nand => self.aig.and2(acc, lit),
                        CellKind::Or | CellKind::Nor => self.aig.or2(acc, lit),
                        CellKind::Xor | CellKind::Xnor => self.aig.xor2(acc, lit),
                        _ => unreachable!(),
                    };
                }
                match kind {
                    CellKind::Nand | CellKind::Nor | CellKind::Xnor => acc ^ 1,
                    _ => acc,
                }
            }
            CellKind::Dff => unreachable!("sequential outputs are pre-seeded inputs"),
        })
    }
}
