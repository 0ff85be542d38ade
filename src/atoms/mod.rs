// ── Atoms: pure data types, errors, configuration ──────────────────────────
// No I/O, no DB access, no async. Impls live under `engine/`.

pub mod config;
pub mod error;
pub mod types;
