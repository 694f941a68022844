//! Abstractions for modelling JVM bytecode
//!
//! The types here stay close to the class file format: names and descriptors
//! follow JVMS 4.2/4.3, [`frame`] mirrors stack map frames, and [`code`] is an
//! index-based rendition of a method body's instruction list.
//!
//! ### Simple example
//!
//! Building the body of `static int half(int x) { return x / 2; }` along with
//! its verifier frames:
//!
//! ```
//! use bytegraft::jvm::*;
//!
//! # fn build() -> Result<(), StructuralError> {
//! let method = MethodId {
//!     class: BinaryName::from_string(String::from("me/example/Halver")).unwrap(),
//!     name: UnqualifiedName::from_string(String::from("half")).unwrap(),
//!     descriptor: ParseDescriptor::parse("(I)I").unwrap(),
//! };
//! let seq = InstructionSequence::new(
//!     method,
//!     vec![
//!         Insn::Op(Instruction::ILoad(0)),
//!         Insn::Op(Instruction::IConst2),
//!         Insn::Op(Instruction::IDiv),
//!         Insn::Branch(BranchInstruction::IReturn),
//!     ],
//! )?;
//! assert_eq!(seq.return_index(), 3);
//! # Ok(())
//! # }
//! ```

pub mod class_graph;
mod code;
mod descriptors;
mod errors;
mod frame;
mod names;

pub use code::*;
pub use descriptors::*;
pub use errors::*;
pub use frame::*;
pub use names::*;
