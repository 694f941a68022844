//! Is-narrower-than relation on frame slot types.

use crate::jvm::class_graph::{Assignable, ClassGraph};
use crate::jvm::{BinaryName, RefType, SlotType};
use std::collections::{BTreeMap, HashMap};

/// Failures while relating two types
#[derive(Debug)]
pub enum LatticeError {
    /// A mentioned class was never added to the hierarchy
    MissingClass(BinaryName),

    /// Pairwise slice comparison got slices of different lengths
    MismatchedLengths { left: usize, right: usize },
}

/// Source of subtyping answers for reference types
pub trait TypeHierarchy {
    /// Is a value of the first type assignable to the second type?
    fn is_assignable(&self, sub: &RefType, sup: &RefType) -> Result<bool, LatticeError>;
}

impl<'g> TypeHierarchy for &'g ClassGraph<'g> {
    fn is_assignable(&self, sub: &RefType, sup: &RefType) -> Result<bool, LatticeError> {
        let sub = self.resolve(sub).map_err(LatticeError::MissingClass)?;
        let sup = self.resolve(sup).map_err(LatticeError::MissingClass)?;
        Ok(sub.is_assignable(&sup))
    }
}

/// Narrower-or-equal checks on slot types, backed by a [`TypeHierarchy`]
///
/// A slot type is narrower than another when a value of the first can stand
/// wherever the second is expected. Type codes only match themselves,
/// `null` fits under any object type, and object types follow the hierarchy.
///
/// An optional rename lets one class name stand for another, so a method
/// lifted from a renamed copy of a class can be compared against the
/// original.
pub struct TypeLattice<H> {
    hierarchy: H,
    renames: HashMap<BinaryName, BinaryName>,
}

impl<H: TypeHierarchy> TypeLattice<H> {
    pub fn new(hierarchy: H) -> TypeLattice<H> {
        TypeLattice {
            hierarchy,
            renames: HashMap::new(),
        }
    }

    /// Lattice that treats `alternate` as another name for `primary`
    pub fn with_renamed(hierarchy: H, alternate: BinaryName, primary: BinaryName) -> TypeLattice<H> {
        let mut renames = HashMap::new();
        renames.insert(alternate, primary);
        TypeLattice { hierarchy, renames }
    }

    /// Is the first slot type same-or-narrower than the second?
    pub fn narrower_or_equal(&self, sub: &SlotType, sup: &SlotType) -> Result<bool, LatticeError> {
        Ok(match (sub, sup) {
            // Not even `null` fits under an unconstructed object
            (SlotType::Uninitialized(site1), SlotType::Uninitialized(site2)) => site1 == site2,
            (SlotType::Null, SlotType::Object(_)) => true,
            (SlotType::Object(sub), SlotType::Object(sup)) => {
                let sub = self.rename(sub);
                let sup = self.rename(sup);
                return self.hierarchy.is_assignable(&sub, &sup);
            }
            (sub, sup) if sub.is_type_code() && sup.is_type_code() => sub == sup,
            _ => false,
        })
    }

    /// Pairwise [`narrower_or_equal`](Self::narrower_or_equal) over two slices
    /// of equal length
    pub fn narrower_slice(
        &self,
        subs: &[SlotType],
        sups: &[SlotType],
    ) -> Result<bool, LatticeError> {
        if subs.len() != sups.len() {
            return Err(LatticeError::MismatchedLengths {
                left: subs.len(),
                right: sups.len(),
            });
        }
        for (sub, sup) in subs.iter().zip(sups) {
            if !self.narrower_or_equal(sub, sup)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Do the written variables cover the read variables with narrower types?
    ///
    /// Each read must find a narrower write of the same variable. A read with
    /// no corresponding write fails only under `strict`; otherwise someone
    /// else is presumed to supply the value.
    pub fn narrower_vars(
        &self,
        writes: &BTreeMap<u16, SlotType>,
        reads: &BTreeMap<u16, SlotType>,
        strict: bool,
    ) -> Result<bool, LatticeError> {
        for (var, read_type) in reads {
            match writes.get(var) {
                None => {
                    if strict {
                        return Ok(false);
                    }
                }
                Some(write_type) => {
                    if !self.narrower_or_equal(write_type, read_type)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn rename(&self, ty: &RefType) -> RefType {
        if let RefType::Object(name) = ty {
            if let Some(primary) = self.renames.get(name) {
                return RefType::Object(primary.clone());
            }
        }
        ty.clone()
    }
}
