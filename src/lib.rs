//! Control and data flow analysis of JVM bytecode, geared towards splicing code
//! sections between method bodies.
//!
//! The crate is split into three layers:
//!
//!   - [`jvm`] models the bytecode itself: instructions, verifier frames, type
//!     descriptors, and a class hierarchy graph
//!   - [`analysis`] computes per-instruction stack and local-variable effects,
//!     combines them over instruction ranges using the control flow graph, and
//!     enumerates branch-free code sections
//!   - [`crossover`] decides whether a section of one method body can replace a
//!     section of another without breaking verification

pub mod analysis;
pub mod crossover;
pub mod jvm;
pub mod util;
