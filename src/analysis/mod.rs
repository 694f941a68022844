//! Flow analysis of method bodies.
//!
//! Everything here works on instruction indices of an
//! [`InstructionSequence`](crate::jvm::InstructionSequence):
//!
//!   - [`Effect`] captures what one (or a combined run of) instruction(s) does
//!     to the operand stack and the local variables
//!
//!   - [`MethodAnalysis`] attaches verifier frames to a sequence and
//!     precomputes the per-instruction effects
//!
//!   - [`BranchAnalyzer`] enumerates the code sections that have no outgoing
//!     (or no incoming) branches
//!
//!   - [`RangeCombiner`] folds per-instruction effects over all paths through
//!     an index range into one [`RangeEffect`]

mod combine;
mod effects;
mod method;
mod sections;

pub use combine::{RangeCombiner, RangeEffect, RangeError};
pub use effects::Effect;
pub use method::MethodAnalysis;
pub use sections::{BranchAnalyzer, CodeSection, SectionMode};
