//! Crate-wide error types.
//!
//! Structural/layout/naming failures that don't need to be matched on by
//! callers are raised with `anyhow::bail!`/`anyhow!` directly. The handful
//! of error shapes a test wants to assert on structurally go through
//! [`CompileError`], which converts into `anyhow::Error` at the boundary.

use thiserror::Error;

pub type Result<T> = anyhow::Result<T>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{source_file} : line {line} col {col} : {message}")]
    Script {
        source_file: String,
        line: u32,
        col: u32,
        message: String,
    },

    #[error("no such {kind} `{name}`")]
    UnknownSymbol { kind: &'static str, name: String },

    #[error("script object `{name}` already exists as {existing_kind}")]
    SymbolKindMismatch {
        name: String,
        existing_kind: &'static str,
    },

    #[error("invalid tile ID {0}")]
    InvalidTileId(u32),

    #[error("unknown asset `{0}`")]
    UnknownAsset(String),

    #[error("unknown enum value `{0}`")]
    UnknownEnumValue(String),
}
