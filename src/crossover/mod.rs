//! Crossover compatibility between two analyzed method bodies.
//!
//! Replacing a destination (alpha) section with a source (beta) section is
//! sound when the surrounding code cannot observe the difference: the operand
//! stack shapes line up and every local variable read still sees a type it
//! can accept. [`CrossoverChecker`] decides this for a pair of sections,
//! delegating the subtyping queries to a [`TypeLattice`].

mod checker;
mod lattice;

pub use checker::{CrossoverChecker, CrossoverError};
pub use lattice::{LatticeError, TypeHierarchy, TypeLattice};
