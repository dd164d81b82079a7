//! Implementation limits for the WAT front end.
//!
//! Function and instruction limits follow the values mainstream WebAssembly
//! engines use (V8's `wasm-limits.h`). They stop hostile input from claiming
//! unrealistic sizes; exceeding any of them is a parse error.

// =============================================================================
// Function-level limits
// =============================================================================

/// Maximum number of function parameters
pub const MAX_FUNCTION_PARAMS: usize = 1_000;

/// Maximum number of function results
pub const MAX_FUNCTION_RESULTS: usize = 1_000;

/// Maximum number of declared locals in a function
pub const MAX_FUNCTION_LOCALS: usize = 50_000;

// =============================================================================
// Instruction-level limits
// =============================================================================

/// Maximum number of labels in a br_table instruction
pub const MAX_BR_TABLE_LABELS: usize = 65_536;

// =============================================================================
// Memory limits
// =============================================================================

/// Maximum memory pages for 32-bit addressing (4 GiB)
pub const MAX_MEMORY_PAGES: u32 = 65_536;

/// Maximum memories per module, imported and defined together. Memory
/// instructions carry no memory index, so they all address memory 0.
pub const MAX_MEMORIES: usize = 1;

// =============================================================================
// Text-format limits
// =============================================================================

/// Maximum parenthesis nesting depth. The reader, the parser and the
/// validator all recurse over nested structure, so this also bounds their
/// stack use.
pub const MAX_NESTING_DEPTH: usize = 1_024;
