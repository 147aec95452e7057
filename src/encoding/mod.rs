// ============================================================================
// Key Encoding
// ============================================================================
//
// Maps structured tuple keys onto flat byte strings whose byte-wise order
// matches tuple order, so byte-keyed backends can serve tuple range scans.
//
// ============================================================================

pub mod tuple;

pub use tuple::{decode_tuple, encode_tuple};
