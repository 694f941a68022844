/// Ways in which a supplied method body can fail validation
///
/// These are raised while building an instruction sequence or attaching frame
/// data to it, before any flow analysis runs.
#[derive(Debug)]
pub enum StructuralError {
    /// A branch instruction targets an index outside the instruction list
    BranchTargetOutOfBounds { index: usize, target: usize },

    /// `jsr`/`ret` subroutines are not supported
    UnsupportedSubroutine { index: usize },

    /// The instruction list must end with a `*return`, optionally followed by
    /// one label
    MissingTrailingReturn,

    /// Number of supplied frames does not match the number of instructions
    FrameCountMismatch { expected: usize, actual: usize },

    /// No frame was supplied for the first instruction
    MissingEntryFrame,

    /// A reachable branch targets an instruction with no frame
    MissingBranchTargetFrame { target: usize },

    /// An uninitialized frame slot refers to an instruction that is not `new`
    UninitializedSiteNotNew { new_index: usize },
}
