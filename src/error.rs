// SPDX-License-Identifier: Apache-2.0
//! Fatal error kinds surfaced by the locking engine.

use thiserror::Error;

/// Errors reported by the locking engine. All of these are fatal: the
/// engine releases its analysis state and returns, it never retries.
#[derive(Error, Debug)]
pub enum LockError {
    /// A cell type the simulator cannot evaluate.
    #[error("unsupported cell type `{cell_type}` on cell `{cell}`")]
    UnsupportedCell { cell: String, cell_type: String },

    /// Combinational cycle, missing port, or undriven cell output.
    #[error("malformed netlist: {0}")]
    MalformedNetlist(String),

    /// Out-of-range or mutually exclusive options.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Non-hex character, or a key too short for the chosen budget.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An explicitly named gate does not exist in the module.
    #[error("selection impossible: {0}")]
    SelectionImpossible(String),
}
