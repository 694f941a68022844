use super::{BinaryName, RefType};
use crate::util::Width;
use std::sync::atomic::{AtomicU32, Ordering};

/// Verification type of one stack or local variable slot
///
/// This mirrors the `verification_type_info` structure of stack map frames,
/// with two departures:
///
///   - uninitialized slots carry an [`UninitializedSite`] instead of a
///     bytecode offset
///   - [`SlotType::Bogus`] marks a `top` entry that is not the second half of
///     a `long`/`double`, meaning the local holds different types on different
///     paths. It never occurs inside a [`Frame`], only in variable effect maps.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum SlotType {
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    Bogus,
    UninitializedThis,
    Uninitialized(UninitializedSite),
    Object(RefType),
}

impl SlotType {
    /// Object type for a class name
    pub const fn object(class: BinaryName) -> SlotType {
        SlotType::Object(RefType::Object(class))
    }

    /// Does the slot hold one of the verifier's "small" type codes, as opposed
    /// to a reference?
    pub fn is_type_code(&self) -> bool {
        !matches!(self, SlotType::Object(_) | SlotType::Uninitialized(_))
    }
}

impl Width for SlotType {
    fn width(&self) -> usize {
        match self {
            SlotType::Long | SlotType::Double => 2,
            _ => 1,
        }
    }
}

/// Identity of one `new` instruction's allocation, as observed by the verifier
///
/// Two sites compare equal only if they were minted by the same analysis for
/// the same allocation instruction. Ids come from a process-wide counter, so
/// re-analyzing a method yields sites distinct from the previous analysis and
/// uninitialized objects are never conflated across method bodies.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct UninitializedSite {
    id: u32,
    pub class: BinaryName,
}

static NEXT_SITE_ID: AtomicU32 = AtomicU32::new(0);

impl UninitializedSite {
    /// Mint a site distinct from every other site in the process
    pub fn fresh(class: BinaryName) -> UninitializedSite {
        UninitializedSite {
            id: NEXT_SITE_ID.fetch_add(1, Ordering::Relaxed),
            class,
        }
    }
}

/// Verifier frame holding before an instruction executes
///
/// Both sides are indexed by slot, so a `long` local occupies two consecutive
/// entries (the value type followed by [`SlotType::Top`]).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Frame {
    pub stack: Vec<SlotType>,
    pub locals: Vec<SlotType>,
}

/// Frame slot as supplied by a class file reader
///
/// The only difference from [`SlotType`] is that an uninitialized entry names
/// the index of its `new` instruction rather than an allocation identity.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RawSlot {
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Uninitialized(usize),
    Object(RefType),
}

/// Frame as supplied by a class file reader
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RawFrame {
    pub stack: Vec<RawSlot>,
    pub locals: Vec<RawSlot>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slot_widths() {
        assert_eq!(SlotType::Int.width(), 1);
        assert_eq!(SlotType::Null.width(), 1);
        assert_eq!(SlotType::Long.width(), 2);
        assert_eq!(SlotType::Double.width(), 2);
        assert_eq!(SlotType::object(BinaryName::STRING).width(), 1);
    }

    #[test]
    fn fresh_sites_are_distinct() {
        let s1 = UninitializedSite::fresh(BinaryName::OBJECT);
        let s2 = UninitializedSite::fresh(BinaryName::OBJECT);
        assert_ne!(s1, s2);
        assert_eq!(s1, s1.clone());
    }
}
