//! Compatibility decision for one crossover.

use super::{LatticeError, TypeHierarchy, TypeLattice};
use crate::analysis::{CodeSection, MethodAnalysis, RangeCombiner, RangeEffect, RangeError};
use crate::jvm::SlotType;
use std::collections::BTreeMap;

/// Failure while deciding a crossover
#[derive(Debug)]
pub enum CrossoverError {
    Range(RangeError),
    Lattice(LatticeError),
}

impl From<RangeError> for CrossoverError {
    fn from(err: RangeError) -> CrossoverError {
        CrossoverError::Range(err)
    }
}

impl From<LatticeError> for CrossoverError {
    fn from(err: LatticeError) -> CrossoverError {
        CrossoverError::Lattice(err)
    }
}

/// Decides whether replacing a section of the destination (alpha) method with
/// a section of the source (beta) method yields verifiable code
///
/// The check never simulates the merged method. It compares the combined
/// effect of the beta section against what the code around the alpha section
/// produces and consumes:
///
///   - the stack slots beta pops must be narrower than what alpha's
///     surroundings leave there, and symmetrically for the pushes
///   - every local variable read after the alpha section must still see an
///     acceptable type, whether it comes from beta's writes or from the code
///     before the section
///
/// Sections whose boundaries are unreachable are incompatible with
/// everything.
pub struct CrossoverChecker<'a, H> {
    alpha: RangeCombiner<'a>,
    beta: RangeCombiner<'a>,
    lattice: TypeLattice<H>,
}

impl<'a, H: TypeHierarchy> CrossoverChecker<'a, H> {
    pub fn new(
        alpha: &'a MethodAnalysis,
        beta: &'a MethodAnalysis,
        lattice: TypeLattice<H>,
    ) -> CrossoverChecker<'a, H> {
        CrossoverChecker {
            alpha: RangeCombiner::new(alpha),
            beta: RangeCombiner::new(beta),
            lattice,
        }
    }

    /// Is replacing `alpha` with the contents of `beta` compatible?
    pub fn is_compatible(
        &self,
        alpha: &CodeSection,
        beta: &CodeSection,
    ) -> Result<bool, CrossoverError> {
        let beta_effect = match self.beta.combine(beta.start, beta.limit, false)? {
            None => return Ok(false),
            Some(effect) => effect,
        };
        Ok(self.stack_compatible(alpha, &beta_effect)?
            && self.locals_compatible(alpha, &beta_effect)?)
    }

    /// Operand stack half of [`is_compatible`](Self::is_compatible)
    pub fn is_stack_compatible(
        &self,
        alpha: &CodeSection,
        beta: &CodeSection,
    ) -> Result<bool, CrossoverError> {
        match self.beta.combine(beta.start, beta.limit, false)? {
            None => Ok(false),
            Some(effect) => self.stack_compatible(alpha, &effect),
        }
    }

    /// Local variable half of [`is_compatible`](Self::is_compatible)
    pub fn is_locals_compatible(
        &self,
        alpha: &CodeSection,
        beta: &CodeSection,
    ) -> Result<bool, CrossoverError> {
        match self.beta.combine(beta.start, beta.limit, false)? {
            None => Ok(false),
            Some(effect) => self.locals_compatible(alpha, &effect),
        }
    }

    fn stack_compatible(
        &self,
        alpha: &CodeSection,
        beta: &RangeEffect,
    ) -> Result<bool, CrossoverError> {
        let alpha_effect = match self.alpha.combine(alpha.start, alpha.limit, false)? {
            None => return Ok(false),
            Some(effect) => effect,
        };

        let beta_pops = beta.stack_pops();
        let beta_pushes = beta.stack_pushes();

        // Widen alpha's pops to at least what beta consumes
        let (alpha_pops, alpha_pushes) = match (
            alpha_effect.stack_pops_at_least(beta_pops.len()),
            alpha_effect.stack_pushes_at_least(beta_pops.len()),
        ) {
            (Some(pops), Some(pushes)) => (pops, pushes),
            _ => return Ok(false),
        };

        // Slots below beta's reach pass through the section untouched
        let delta = alpha_pops.len() - beta_pops.len();
        if alpha_pushes.len() != beta_pushes.len() + delta {
            return Ok(false);
        }

        Ok(self.lattice.narrower_slice(&alpha_pops[delta..], beta_pops)?
            && self.lattice.narrower_slice(beta_pushes, &alpha_pushes[delta..])?
            && self.lattice.narrower_slice(&alpha_pops[..delta], &alpha_pushes[..delta])?)
    }

    fn locals_compatible(
        &self,
        alpha: &CodeSection,
        beta: &RangeEffect,
    ) -> Result<bool, CrossoverError> {
        let post_alpha = match self.alpha.combine_tail(alpha.limit)? {
            None => return Ok(false),
            Some(effect) => effect,
        };
        let post_reads = post_alpha.vars_read();

        // Whatever beta may write must be acceptable to the reads after alpha
        if !self.lattice.narrower_vars(&beta.vars_written(), &post_reads, false)? {
            return Ok(false);
        }

        let pre_alpha = match self.alpha.combine(0, alpha.start, true)? {
            None => return Ok(false),
            Some(effect) => effect,
        };
        let pre_writes = pre_alpha.vars_written_always();

        // Reads after alpha that beta does not re-establish must be covered
        // on every path leading into the section
        let beta_always = beta.vars_written_always();
        let uncovered: BTreeMap<u16, SlotType> = post_reads
            .into_iter()
            .filter(|(var, _)| !beta_always.contains_key(var))
            .collect();
        if !self.lattice.narrower_vars(&pre_writes, &uncovered, true)? {
            return Ok(false);
        }

        // Beta's own reads rely on the same guaranteed writes
        Ok(self.lattice.narrower_vars(&pre_writes, &beta.vars_read(), true)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analysis::{BranchAnalyzer, SectionMode};
    use crate::jvm::class_graph::{ClassData, ClassGraph, ClassGraphArenas};
    use crate::jvm::{
        BinaryName, BranchInstruction, Insn, Instruction, InstructionSequence, InvokeType,
        MethodDescriptor, MethodId, MethodRef, Name, OrdComparison, ParseDescriptor, RawFrame,
        RawSlot, RefType, UnqualifiedName,
    };

    const FACT: &str = "gp/Fact";
    const FACT_CLONE: &str = "gp/FactClone";
    const VARS: &str = "gp/DecoherentVars";

    fn name(class: &str) -> BinaryName {
        BinaryName::from_string(String::from(class)).unwrap()
    }

    fn method_id(class: &str, method: &str, descriptor: &str) -> MethodId {
        MethodId {
            class: name(class),
            name: UnqualifiedName::from_string(String::from(method)).unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        }
    }

    fn obj(class: &str) -> RawSlot {
        RawSlot::Object(RefType::Object(name(class)))
    }

    fn raw(stack: Vec<RawSlot>, locals: Vec<RawSlot>) -> Option<RawFrame> {
        Some(RawFrame { stack, locals })
    }

    fn section(class: &str, start: usize, limit: usize) -> CodeSection {
        CodeSection::new(method_id(class, "fact", "(I)I"), start, limit)
    }

    // int fact(int n) { int ans = 1; if (n > 0) ans = n * fact(n - 1); return ans; }
    // compiled without debug info; `class` lets the body pose as a renamed copy
    fn fact_analysis(class: &str) -> MethodAnalysis {
        let recurse = MethodRef {
            class: name(class),
            name: UnqualifiedName::from_string(String::from("fact")).unwrap(),
            descriptor: MethodDescriptor::parse("(I)I").unwrap(),
        };

        let seq = InstructionSequence::new(
            method_id(class, "fact", "(I)I"),
            vec![
                Insn::Label,                                                 // 0
                Insn::Op(Instruction::IConst1),                              // 1
                Insn::Op(Instruction::IStore(2)),                            // 2
                Insn::Op(Instruction::ILoad(1)),                             // 3
                Insn::Branch(BranchInstruction::If(OrdComparison::LE, 13)),  // 4
                Insn::Op(Instruction::ILoad(1)),                             // 5
                Insn::Op(Instruction::ALoad(0)),                             // 6
                Insn::Op(Instruction::ILoad(1)),                             // 7
                Insn::Op(Instruction::IConst1),                              // 8
                Insn::Op(Instruction::ISub),                                 // 9
                Insn::Op(Instruction::Invoke(InvokeType::Virtual, recurse)), // 10
                Insn::Op(Instruction::IMul),                                 // 11
                Insn::Op(Instruction::IStore(2)),                            // 12
                Insn::Label,                                                 // 13
                Insn::FrameMarker,                                           // 14
                Insn::Op(Instruction::ILoad(2)),                             // 15
                Insn::Branch(BranchInstruction::IReturn),                    // 16
            ],
        )
        .unwrap();

        let l2 = vec![obj(class), RawSlot::Int];
        let l3 = vec![obj(class), RawSlot::Int, RawSlot::Int];
        let frames = vec![
            raw(vec![], l2.clone()),                                      // 0
            raw(vec![], l2.clone()),                                      // 1
            raw(vec![RawSlot::Int], l2),                                  // 2
            raw(vec![], l3.clone()),                                      // 3
            raw(vec![RawSlot::Int], l3.clone()),                          // 4
            raw(vec![], l3.clone()),                                      // 5
            raw(vec![RawSlot::Int], l3.clone()),                          // 6
            raw(vec![RawSlot::Int, obj(class)], l3.clone()),              // 7
            raw(vec![RawSlot::Int, obj(class), RawSlot::Int], l3.clone()), // 8
            raw(
                vec![RawSlot::Int, obj(class), RawSlot::Int, RawSlot::Int],
                l3.clone(),
            ),                                                            // 9
            raw(vec![RawSlot::Int, obj(class), RawSlot::Int], l3.clone()), // 10
            raw(vec![RawSlot::Int, RawSlot::Int], l3.clone()),            // 11
            raw(vec![RawSlot::Int], l3.clone()),                          // 12
            raw(vec![], l3.clone()),                                      // 13
            raw(vec![], l3.clone()),                                      // 14
            raw(vec![], l3.clone()),                                      // 15
            raw(vec![RawSlot::Int], l3),                                  // 16
        ];

        MethodAnalysis::new(seq, frames).unwrap()
    }

    // void foo() { { long x = 5; long y = x; }
    //              { int x = 1; int y; int z = 0; if (z > 2) y = z; z = 1; } }
    fn decoherent_analysis() -> MethodAnalysis {
        let seq = InstructionSequence::new(
            method_id(VARS, "foo", "()V"),
            vec![
                Insn::Label,                                                    // 0
                Insn::Op(Instruction::Ldc2(crate::jvm::Constant::Long(5))),     // 1
                Insn::Op(Instruction::LStore(1)),                               // 2
                Insn::Op(Instruction::LLoad(1)),                                // 3
                Insn::Op(Instruction::LStore(3)),                               // 4
                Insn::Op(Instruction::IConst1),                                 // 5
                Insn::Op(Instruction::IStore(1)),                               // 6
                Insn::Op(Instruction::IConst0),                                 // 7
                Insn::Op(Instruction::IStore(3)),                               // 8
                Insn::Op(Instruction::ILoad(3)),                                // 9
                Insn::Op(Instruction::IConst2),                                 // 10
                Insn::Branch(BranchInstruction::IfICmp(OrdComparison::LE, 14)), // 11
                Insn::Op(Instruction::ILoad(3)),                                // 12
                Insn::Op(Instruction::IStore(2)),                               // 13
                Insn::Label,                                                    // 14
                Insn::FrameMarker,                                              // 15
                Insn::Op(Instruction::IConst1),                                 // 16
                Insn::Op(Instruction::IStore(3)),                               // 17
                Insn::Branch(BranchInstruction::Return),                        // 18
            ],
        )
        .unwrap();

        let this = vec![obj(VARS)];
        let long_x = vec![obj(VARS), RawSlot::Long, RawSlot::Top];
        let long_xy = vec![
            obj(VARS),
            RawSlot::Long,
            RawSlot::Top,
            RawSlot::Long,
            RawSlot::Top,
        ];
        let int_x = vec![
            obj(VARS),
            RawSlot::Int,
            RawSlot::Top,
            RawSlot::Long,
            RawSlot::Top,
        ];
        let int_xz = vec![
            obj(VARS),
            RawSlot::Int,
            RawSlot::Top,
            RawSlot::Int,
            RawSlot::Top,
        ];

        let wide = vec![RawSlot::Long, RawSlot::Top];
        let frames = vec![
            raw(vec![], this.clone()),               // 0
            raw(vec![], this),                       // 1
            raw(wide.clone(), vec![obj(VARS)]),      // 2
            raw(vec![], long_x.clone()),             // 3
            raw(wide, long_x),                       // 4
            raw(vec![], long_xy.clone()),            // 5
            raw(vec![RawSlot::Int], long_xy),        // 6
            raw(vec![], int_x.clone()),              // 7
            raw(vec![RawSlot::Int], int_x),          // 8
            raw(vec![], int_xz.clone()),             // 9
            raw(vec![RawSlot::Int], int_xz.clone()), // 10
            raw(vec![RawSlot::Int, RawSlot::Int], int_xz.clone()), // 11
            raw(vec![], int_xz.clone()),             // 12
            raw(vec![RawSlot::Int], int_xz.clone()), // 13
            raw(vec![], int_xz.clone()),             // 14
            raw(vec![], int_xz.clone()),             // 15
            raw(vec![], int_xz.clone()),             // 16
            raw(vec![RawSlot::Int], int_xz.clone()), // 17
            raw(vec![], int_xz),                     // 18
        ];

        MethodAnalysis::new(seq, frames).unwrap()
    }

    #[test]
    fn recursive_call_for_variable() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        graph.add_class(ClassData::new(name(FACT), java.object, false));

        let alpha = fact_analysis(FACT);
        let beta = fact_analysis(FACT);
        let checker = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));

        // Replacing `fact(n - 1)` with `ans` turns fact(n) into n!/(n-1)!
        let alpha_section = section(FACT, 6, 11);
        let beta_section = section(FACT, 15, 16);
        assert!(checker.is_compatible(&alpha_section, &beta_section).unwrap());
        assert!(checker
            .is_stack_compatible(&alpha_section, &beta_section)
            .unwrap());
        assert!(checker
            .is_locals_compatible(&alpha_section, &beta_section)
            .unwrap());
    }

    #[test]
    fn value_for_deeper_consumer() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        graph.add_class(ClassData::new(name(FACT), java.object, false));

        let alpha = fact_analysis(FACT);
        let beta = fact_analysis(FACT);
        let checker = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));

        // `imul` wants two ints; the call result leaves only one
        let alpha_section = section(FACT, 6, 11);
        let beta_section = section(FACT, 11, 12);
        assert!(!checker.is_compatible(&alpha_section, &beta_section).unwrap());
        assert!(!checker
            .is_stack_compatible(&alpha_section, &beta_section)
            .unwrap());
        assert!(checker
            .is_locals_compatible(&alpha_section, &beta_section)
            .unwrap());
    }

    #[test]
    fn deleted_initializer_breaks_later_read() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        graph.add_class(ClassData::new(name(FACT), java.object, false));

        let alpha = fact_analysis(FACT);
        let beta = fact_analysis(FACT);
        let checker = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));

        // Erasing `int ans = 1` leaves the fallthrough read of `ans` dangling
        let alpha_section = section(FACT, 0, 3);
        let beta_section = section(FACT, 0, 0);
        assert!(!checker.is_compatible(&alpha_section, &beta_section).unwrap());
        assert!(checker
            .is_stack_compatible(&alpha_section, &beta_section)
            .unwrap());
        assert!(!checker
            .is_locals_compatible(&alpha_section, &beta_section)
            .unwrap());
    }

    #[test]
    fn decoherent_write_is_rejected() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        graph.add_class(ClassData::new(name(VARS), java.object, false));

        let alpha = decoherent_analysis();
        let beta = decoherent_analysis();
        let checker = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));

        // Inserting the decoherent block between the writes and the read of
        // the long variable clobbers its upper half on one path
        let alpha_section = CodeSection::new(method_id(VARS, "foo", "()V"), 3, 3);
        let beta_section = CodeSection::new(method_id(VARS, "foo", "()V"), 7, 15);
        assert!(!checker.is_compatible(&alpha_section, &beta_section).unwrap());
        assert!(checker
            .is_stack_compatible(&alpha_section, &beta_section)
            .unwrap());
        assert!(!checker
            .is_locals_compatible(&alpha_section, &beta_section)
            .unwrap());
    }

    #[test]
    fn renamed_copy_is_interchangeable() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        graph.add_class(ClassData::new(name(FACT), java.object, false));
        graph.add_class(ClassData::new(name(FACT_CLONE), java.object, false));

        let alpha = fact_analysis(FACT);
        let beta = fact_analysis(FACT_CLONE);

        // `aload_0` for `aload_0`, but the receiver classes differ
        let alpha_section = section(FACT, 6, 7);
        let beta_section = section(FACT_CLONE, 6, 7);

        let plain = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));
        assert!(!plain.is_compatible(&alpha_section, &beta_section).unwrap());

        let renamed = CrossoverChecker::new(
            &alpha,
            &beta,
            TypeLattice::with_renamed(&graph, name(FACT_CLONE), name(FACT)),
        );
        assert!(renamed.is_compatible(&alpha_section, &beta_section).unwrap());
    }

    #[test]
    fn errors_pass_through() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let _java = graph.insert_java_library_types();
        // gp/Fact deliberately missing

        let alpha = fact_analysis(FACT);
        let beta = fact_analysis(FACT);
        let checker = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));

        let result = checker.is_compatible(&section(FACT, 6, 7), &section(FACT, 6, 7));
        assert!(matches!(
            result,
            Err(CrossoverError::Lattice(LatticeError::MissingClass(_))),
        ));

        let result = checker.is_compatible(&section(FACT, 0, 99), &section(FACT, 0, 0));
        assert!(matches!(
            result,
            Err(CrossoverError::Range(RangeError::LimitOutOfBounds { .. })),
        ));
    }

    #[test]
    fn counts_all_compatible_pairs() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        graph.add_class(ClassData::new(name(FACT), java.object, false));

        let alpha = fact_analysis(FACT);
        let beta = fact_analysis(FACT);
        let checker = CrossoverChecker::new(&alpha, &beta, TypeLattice::new(&graph));

        // The replaced section must attract no outside jumps; the donated one
        // must keep its own jumps inside
        let replaced = BranchAnalyzer::new(alpha.sequence(), SectionMode::Incoming);
        let donated = BranchAnalyzer::new(beta.sequence(), SectionMode::Outgoing);

        let mut count = 0;
        for alpha_section in &replaced {
            for beta_section in &donated {
                if checker.is_compatible(&alpha_section, &beta_section).unwrap() {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 1828);
    }
}
