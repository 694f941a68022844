//! Index-based model of a method body's instruction list.
//!
//! The representation is slightly different from the usual presentation of
//! bytecode to make analysis convenient:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged
//!     into the instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one
//!     instruction with a field. This helps with repetitive pattern matches
//!     and also simplifies tasks like inverting a branch condition.
//!
//!   - Branch targets are plain instruction indices. Labels still occupy
//!     indices (so positions from a class file reader carry over), but nothing
//!     jumps "to a label" - resolution happens before a sequence is built.

use super::{BaseType, BinaryName, MethodDescriptor, Name, RefType, StructuralError, UnqualifiedName};
use std::borrow::Cow;
use std::fmt;
use std::ops::Not;

/// A field being read or written
#[derive(Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: super::FieldType,
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:?}", self.class.as_str(), self.name)
    }
}

/// A method being invoked
#[derive(Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:?}", self.class.as_str(), self.name)
    }
}

/// Loadable constant (argument of `ldc`, `ldc_w`, `ldc2_w`)
#[derive(Clone, PartialEq, Debug)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(Cow<'static, str>),
    Class(RefType),
}

/// Kind of `shr`/`shl`/`ushr` shift
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality comparison operators available for reference branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// How a method gets invoked
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}

impl InvokeType {
    /// Does the invocation consume a receiver off the stack?
    pub fn has_receiver(&self) -> bool {
        !matches!(self, InvokeType::Static)
    }
}

/// Non-branching JVM bytecode instruction
#[derive(Clone, PartialEq, Debug)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(Constant), // covers both `ldc` and `ldc_w`
    Ldc2(Constant),
    ILoad(u16), // covers `iload`, `iload_{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore_{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
    InvokeDynamic(MethodDescriptor),
    New(BinaryName),
    NewArray(BaseType),
    ANewArray(RefType),
    MultiANewArray(RefType, u8),
    ArrayLength,
    CheckCast(RefType),
    InstanceOf(RefType),
    MonitorEnter,
    MonitorExit,
}

/// Control-transfer JVM bytecode instruction
///
/// Targets are instruction indices into the enclosing sequence.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BranchInstruction {
    If(OrdComparison, usize), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, usize), // covers `if_icmpeq`, `if_icmpne`, ... `if_icmple`
    IfACmp(EqComparison, usize), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, usize), // covers `ifnull`, `ifnonnull`
    Goto(usize),
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: usize,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<usize>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: usize,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, usize)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,

    /// Kept so class file readers can surface them, but rejected when building
    /// an [`InstructionSequence`]
    Jsr(usize),
    Ret(u16),
}

impl BranchInstruction {
    /// Jump targets of the instruction, in operand order
    ///
    /// The fallthrough edge of a conditional branch is not a jump target.
    pub fn jump_targets(&self) -> Vec<usize> {
        match self {
            BranchInstruction::If(_, target)
            | BranchInstruction::IfICmp(_, target)
            | BranchInstruction::IfACmp(_, target)
            | BranchInstruction::IfNull(_, target)
            | BranchInstruction::Goto(target)
            | BranchInstruction::Jsr(target) => vec![*target],
            BranchInstruction::TableSwitch { default, targets, .. } => {
                let mut ts: Vec<usize> = targets.clone();
                ts.push(*default);
                ts
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts: Vec<usize> = targets.iter().map(|(_, t)| *t).collect();
                ts.push(*default);
                ts
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow
            | BranchInstruction::Ret(_) => vec![],
        }
    }

    /// Can execution continue at the next instruction?
    pub fn can_fall_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
        )
    }

    /// Is this one of the six `*return` instructions?
    pub fn is_return(&self) -> bool {
        matches!(
            self,
            BranchInstruction::IReturn
                | BranchInstruction::LReturn
                | BranchInstruction::FReturn
                | BranchInstruction::DReturn
                | BranchInstruction::AReturn
                | BranchInstruction::Return
        )
    }
}

/// Entry in a method body's instruction list
///
/// Pseudo instructions occupy indices (so a reader's positions are preserved)
/// but have no runtime effect.
#[derive(Clone, PartialEq, Debug)]
pub enum Insn {
    Op(Instruction),
    Branch(BranchInstruction),
    Label,
    Line(u16),

    /// Site of a stack map table entry
    FrameMarker,
}

impl Insn {
    /// Is this a label, line number, or frame marker?
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Insn::Label | Insn::Line(_) | Insn::FrameMarker)
    }
}

/// Identity of a method, used to tag code sections with their origin
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use super::RenderDescriptor;
        write!(
            f,
            "{}.{:?}:{}",
            self.class.as_str(),
            self.name,
            self.descriptor.render(),
        )
    }
}

/// Validated instruction list of one method body
///
/// Construction resolves the control flow graph: per-instruction successor
/// sets, jump-only successor sets, and the index of the trailing `*return`.
/// The list must end with a return, optionally followed by a single label;
/// `jsr`/`ret` and out-of-range targets are rejected.
pub struct InstructionSequence {
    method: MethodId,
    insns: Vec<Insn>,
    successors: Vec<Vec<usize>>,
    branch_successors: Vec<Vec<usize>>,
    return_index: usize,
}

impl InstructionSequence {
    pub fn new(method: MethodId, insns: Vec<Insn>) -> Result<InstructionSequence, StructuralError> {
        let len = insns.len();

        let return_index = match insns.last() {
            Some(Insn::Branch(b)) if b.is_return() => len - 1,
            Some(Insn::Label) if len >= 2 => match &insns[len - 2] {
                Insn::Branch(b) if b.is_return() => len - 2,
                _ => return Err(StructuralError::MissingTrailingReturn),
            },
            _ => return Err(StructuralError::MissingTrailingReturn),
        };

        let mut successors: Vec<Vec<usize>> = Vec::with_capacity(len);
        let mut branch_successors: Vec<Vec<usize>> = Vec::with_capacity(len);
        for (index, insn) in insns.iter().enumerate() {
            match insn {
                Insn::Branch(BranchInstruction::Jsr(_) | BranchInstruction::Ret(_)) => {
                    return Err(StructuralError::UnsupportedSubroutine { index });
                }
                Insn::Branch(branch) => {
                    let targets = branch.jump_targets();
                    for &target in &targets {
                        if target >= len {
                            return Err(StructuralError::BranchTargetOutOfBounds { index, target });
                        }
                    }
                    let mut succ = vec![];
                    if branch.can_fall_through() {
                        succ.push(index + 1);
                    }
                    for &target in &targets {
                        if !succ.contains(&target) {
                            succ.push(target);
                        }
                    }
                    successors.push(succ);
                    branch_successors.push(targets);
                }
                _ => {
                    // The list ends in a return, so a non-branch in last place
                    // is the trailing label.
                    if index + 1 == len {
                        successors.push(vec![]);
                    } else {
                        successors.push(vec![index + 1]);
                    }
                    branch_successors.push(vec![]);
                }
            }
        }

        Ok(InstructionSequence {
            method,
            insns,
            successors,
            branch_successors,
            return_index,
        })
    }

    pub fn method(&self) -> &MethodId {
        &self.method
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn insn(&self, index: usize) -> &Insn {
        &self.insns[index]
    }

    /// All control flow successors, fallthrough (if any) first
    pub fn successors(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    /// Successors reached via a jump only
    pub fn branch_successors(&self, index: usize) -> &[usize] {
        &self.branch_successors[index]
    }

    /// Index of the trailing `*return`; the method body proper is
    /// `[0, return_index)`
    pub fn return_index(&self) -> usize {
        self.return_index
    }
}

impl fmt::Debug for InstructionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}", self.method)?;
        for (index, insn) in self.insns.iter().enumerate() {
            writeln!(f, "  {:3}: {:?} -> {:?}", index, insn, self.successors[index])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn method_id() -> MethodId {
        use crate::jvm::ParseDescriptor;
        MethodId {
            class: BinaryName::from_string(String::from("Sample")).unwrap(),
            name: UnqualifiedName::from_string(String::from("run")).unwrap(),
            descriptor: MethodDescriptor::parse("(I)I").unwrap(),
        }
    }

    #[test]
    fn straight_line_successors() {
        let seq = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Op(Instruction::IConst1),
                Insn::Op(Instruction::IAdd),
                Insn::Branch(BranchInstruction::IReturn),
            ],
        )
        .unwrap();

        assert_eq!(seq.return_index(), 3);
        assert_eq!(seq.successors(0), &[1]);
        assert_eq!(seq.successors(2), &[3]);
        assert_eq!(seq.successors(3), &[] as &[usize]);
        assert_eq!(seq.branch_successors(2), &[] as &[usize]);
    }

    #[test]
    fn conditional_successors() {
        let seq = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Branch(BranchInstruction::If(OrdComparison::LE, 4)),
                Insn::Op(Instruction::IConst1),
                Insn::Branch(BranchInstruction::Goto(5)),
                Insn::Op(Instruction::IConst0),
                Insn::Label,
                Insn::Branch(BranchInstruction::IReturn),
            ],
        )
        .unwrap();

        assert_eq!(seq.successors(1), &[2, 4]);
        assert_eq!(seq.branch_successors(1), &[4]);
        assert_eq!(seq.successors(3), &[5]);
        assert_eq!(seq.branch_successors(3), &[5]);
        assert_eq!(seq.return_index(), 6);
    }

    #[test]
    fn switch_successors() {
        let seq = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Branch(BranchInstruction::TableSwitch {
                    default: 4,
                    low: 0,
                    targets: vec![2, 3],
                }),
                Insn::Op(Instruction::IConst0),
                Insn::Op(Instruction::IConst1),
                Insn::Op(Instruction::Nop),
                Insn::Branch(BranchInstruction::IReturn),
            ],
        )
        .unwrap();

        assert_eq!(seq.successors(1), &[2, 3, 4]);
        assert_eq!(seq.branch_successors(1), &[2, 3, 4]);
    }

    #[test]
    fn trailing_label_allowed() {
        let seq = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Op(Instruction::IConst0),
                Insn::Branch(BranchInstruction::IReturn),
                Insn::Label,
            ],
        )
        .unwrap();
        assert_eq!(seq.return_index(), 1);
        assert_eq!(seq.successors(2), &[] as &[usize]);
    }

    #[test]
    fn missing_return_rejected() {
        let result = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Op(Instruction::IConst0),
                Insn::Op(Instruction::Pop),
            ],
        );
        assert!(matches!(result, Err(StructuralError::MissingTrailingReturn)));
    }

    #[test]
    fn subroutines_rejected() {
        let result = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Branch(BranchInstruction::Jsr(0)),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        assert!(matches!(
            result,
            Err(StructuralError::UnsupportedSubroutine { index: 0 })
        ));
    }

    #[test]
    fn out_of_bounds_target_rejected() {
        let result = InstructionSequence::new(
            method_id(),
            vec![
                Insn::Branch(BranchInstruction::Goto(9)),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        assert!(matches!(
            result,
            Err(StructuralError::BranchTargetOutOfBounds { index: 0, target: 9 })
        ));
    }
}
