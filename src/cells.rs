// SPDX-License-Identifier: Apache-2.0
//! Primitive cell library supported by the locking engine.
//!
//! The engine operates on netlists synthesized to a small library of
//! single-output gates. Cell types may carry an arity or drive suffix
//! (`AND2`, `NAND3_1`); matching strips trailing digits and drive
//! strength before lookup.

use arcstr::Substr;
use netlistdb::{Direction, DirectionProvider, HierName};

/// Format a pin name tuple for error messages: `hier/pin` or `hier/pin[idx]`.
pub fn fmt_pin(pin: &(HierName, Substr, Option<isize>)) -> String {
    match pin.2 {
        Some(idx) => format!("{}/{}[{}]", pin.0, pin.1, idx),
        None => format!("{}/{}", pin.0, pin.1),
    }
}

/// Closed enumeration of the supported primitive cell types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Not,
    Buf,
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Xnor,
    Mux,
    Dff,
}

impl CellKind {
    /// Look up a cell type from its netlist macro name.
    ///
    /// `AND`, `AND2`, `AND4_1` all resolve to [`CellKind::And`].
    pub fn from_celltype(celltype: &str) -> Option<CellKind> {
        match base_cell_type(celltype) {
            "NOT" | "INV" => Some(CellKind::Not),
            "BUF" => Some(CellKind::Buf),
            "AND" => Some(CellKind::And),
            "NAND" => Some(CellKind::Nand),
            "OR" => Some(CellKind::Or),
            "NOR" => Some(CellKind::Nor),
            "XOR" => Some(CellKind::Xor),
            "XNOR" => Some(CellKind::Xnor),
            "MUX" => Some(CellKind::Mux),
            "DFF" => Some(CellKind::Dff),
            _ => None,
        }
    }

    /// Whether the cell computes a combinational function of its inputs.
    pub fn is_combinational(self) -> bool {
        self != CellKind::Dff
    }

    /// Whether the cell output is a locking candidate.
    ///
    /// Every combinational output qualifies, buffers included: a buffer
    /// chain is a legitimate (if useless) candidate set and the analyzer
    /// is responsible for pruning it.
    pub fn is_lockable(self) -> bool {
        self.is_combinational()
    }
}

/// Strip an arity/drive suffix: `NAND3_1` -> `NAND`, `AND2` -> `AND`.
pub fn base_cell_type(celltype: &str) -> &str {
    let no_drive = match celltype.rsplit_once('_') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_digit()) => head,
        _ => celltype,
    };
    no_drive.trim_end_matches(|c: char| c.is_ascii_digit())
}

/// Pin directions for the locking cell library.
///
/// Gates read `A`/`B`/`C`/`D` (plus `S` on muxes) and drive `Y`;
/// flip-flops read `D`/`CLK` and drive `Q`.
pub struct LockLeafPins;

impl DirectionProvider for LockLeafPins {
    fn direction_of(
        &self,
        macro_name: &Substr,
        pin_name: &Substr,
        _pin_idx: Option<isize>,
    ) -> Direction {
        let pin = pin_name.as_str();
        match CellKind::from_celltype(macro_name) {
            Some(CellKind::Dff) => match pin {
                "D" | "CLK" => Direction::I,
                "Q" => Direction::O,
                _ => unknown_pin(macro_name, pin_name),
            },
            Some(CellKind::Mux) => match pin {
                "A" | "B" | "S" => Direction::I,
                "Y" => Direction::O,
                _ => unknown_pin(macro_name, pin_name),
            },
            Some(_) => match pin {
                "A" | "B" | "C" | "D" => Direction::I,
                "Y" => Direction::O,
                _ => unknown_pin(macro_name, pin_name),
            },
            // Leave unknown macros to the netlist builder; the engine
            // rejects them with a proper error when it classifies cells.
            None => Direction::Unknown,
        }
    }
}

fn unknown_pin(macro_name: &Substr, pin_name: &Substr) -> Direction {
    panic!("unknown library pin: macro={}, pin={}", macro_name, pin_name);
}

/// Ordered input port names for a combinational cell kind.
pub fn input_ports(kind: CellKind) -> &'static [&'static str] {
    match kind {
        CellKind::Not | CellKind::Buf => &["A"],
        CellKind::Mux => &["A", "B", "S"],
        CellKind::Dff => &["D"],
        _ => &["A", "B", "C", "D"],
    }
}
