// ABOUTME: Configuration constants for the interpreter and its heap

pub const VERSION: &str = "0.1.0";

/// Number of cells in each heap slab.
pub const SLAB_CAPACITY: usize = 1024;

/// Allocations tolerated between collections. The evaluator collects before
/// evaluating a form once this many allocations have happened since the last
/// sweep. Tests construct heaps with a threshold of 0 to collect at every
/// step.
pub const GC_THRESHOLD: u64 = 1024;

/// Capacity of the root stack. Exceeding it aborts the process.
pub const ROOT_STACK_CAPACITY: usize = 1 << 16;

/// Longest token the reader accepts, in bytes.
pub const MAX_TOKEN_LEN: usize = 256;
