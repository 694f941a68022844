//! Stack and local variable effects of instructions.

use crate::jvm::{BranchInstruction, Frame, Insn, Instruction, InvokeType, SlotType, UnqualifiedName};
use crate::util::Width;
use std::collections::BTreeSet;
use std::fmt::Write;

/// Effect of one instruction (or a combined run of instructions) on the
/// operand stack and the local variables
///
/// The stack effect is summarized by two numbers relative to the stack height
/// at the start:
///
///   - `pop_depth` is how many slots below the starting height execution can
///     reach
///   - `stack_delta` is the net height change
///
/// Variable accesses are tracked as three slot index sets: slots that _can_ be
/// read before being written, slots that _can_ be written, and slots that
/// _will_ be written on every path. For a single instruction the last two
/// coincide.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Effect {
    pub(crate) pop_depth: usize,
    pub(crate) stack_delta: isize,
    pub(crate) vars_read: BTreeSet<u16>,
    pub(crate) vars_written: BTreeSet<u16>,
    pub(crate) vars_written_always: BTreeSet<u16>,
}

impl Effect {
    /// Effect of executing nothing
    pub fn empty() -> Effect {
        Effect {
            pop_depth: 0,
            stack_delta: 0,
            vars_read: BTreeSet::new(),
            vars_written: BTreeSet::new(),
            vars_written_always: BTreeSet::new(),
        }
    }

    /// Pseudo-effect simulating the write of all formal parameters
    ///
    /// `locals` is the number of local slots occupied on method entry
    /// (receiver included), each of which counts as written.
    pub fn params(locals: u16) -> Effect {
        let written: BTreeSet<u16> = (0..locals).collect();
        Effect {
            pop_depth: 0,
            stack_delta: 0,
            vars_read: BTreeSet::new(),
            vars_written: written.clone(),
            vars_written_always: written,
        }
    }

    /// Effect of a single instruction
    ///
    /// `before` must be the frame holding when the instruction executes and
    /// `after` the frame holding at the next instruction index. The `before`
    /// stack is consulted for the `invokespecial <init>` case, where the
    /// uninitialized receiver and every copy of it above it get consumed.
    pub fn of_insn(insn: &Insn, before: &Frame, after: &Frame) -> Effect {
        let stack_delta = after.stack.len() as isize - before.stack.len() as isize;

        let (pop_depth, vars_read, vars_written) = match insn {
            Insn::Op(op) => (
                instruction_pop_depth(op, &before.stack),
                instruction_vars_read(op),
                instruction_vars_written(op),
            ),
            Insn::Branch(branch) => (branch_pop_depth(branch), BTreeSet::new(), BTreeSet::new()),
            Insn::Label | Insn::Line(_) | Insn::FrameMarker => {
                (0, BTreeSet::new(), BTreeSet::new())
            }
        };

        Effect {
            pop_depth,
            stack_delta,
            vars_read,
            vars_written: vars_written.clone(),
            vars_written_always: vars_written,
        }
    }

    /// Combine effects along control flow
    ///
    /// `sources` are the already combined effects reaching the current
    /// instruction (one per incoming edge, all with the same stack delta) and
    /// `next` is the current instruction's own effect. `former` is the
    /// previously combined effect at this instruction, if any; a slot only
    /// stays in the always-written set if it survived there too.
    ///
    /// With no sources this is just a copy of `next`.
    pub fn merge(sources: &[&Effect], next: &Effect, former: Option<&Effect>) -> Effect {
        let first = match sources.first() {
            None => return next.clone(),
            Some(first) => first,
        };

        let stack_delta = first.stack_delta + next.stack_delta;

        let mut pop_depth: isize = -1;
        for source in sources {
            debug_assert_eq!(source.stack_delta, first.stack_delta);
            pop_depth = pop_depth
                .max(source.pop_depth as isize)
                .max(next.pop_depth as isize - source.stack_delta);
        }
        debug_assert!(pop_depth >= 0);

        let mut vars_read = first.vars_read.clone();
        let mut vars_written_always = first.vars_written_always.clone();
        for source in &sources[1..] {
            vars_read.extend(source.vars_read.iter().copied());
            vars_written_always.retain(|var| source.vars_written_always.contains(var));
        }

        if let Some(former) = former {
            vars_written_always.retain(|var| former.vars_written_always.contains(var));
        }

        // A read in `next` only counts if no path-independent write hides it
        for &var in &next.vars_read {
            if !vars_written_always.contains(&var) {
                vars_read.insert(var);
            }
        }

        vars_written_always.extend(next.vars_written_always.iter().copied());

        let mut vars_written = next.vars_written.clone();
        for source in sources {
            vars_written.extend(source.vars_written.iter().copied());
        }

        Effect {
            pop_depth: pop_depth as usize,
            stack_delta,
            vars_read,
            vars_written,
            vars_written_always,
        }
    }

    /// Same pop depth and same three access sets?
    ///
    /// Used as the fixed point test during range combination; `None` always
    /// compares unequal. Both sides must describe the same range, so the stack
    /// deltas agree.
    pub fn equal_accesses(&self, other: Option<&Effect>) -> bool {
        match other {
            None => false,
            Some(other) => {
                debug_assert_eq!(self.stack_delta, other.stack_delta);
                self.pop_depth == other.pop_depth
                    && self.vars_read == other.vars_read
                    && self.vars_written == other.vars_written
                    && self.vars_written_always == other.vars_written_always
            }
        }
    }

    pub fn pop_depth(&self) -> usize {
        self.pop_depth
    }

    pub fn stack_delta(&self) -> isize {
        self.stack_delta
    }

    /// Succinct rendering of the difference from a previous version, e.g.
    /// `P+2 R+[3] W+[1, 3] W!-[2]`
    pub fn difference(&self, prev: &Effect) -> String {
        let mut buf = String::new();

        let pop_diff = self.pop_depth as isize - prev.pop_depth as isize;
        debug_assert!(pop_diff >= 0);
        if pop_diff != 0 {
            let _ = write!(buf, "P+{} ", pop_diff);
        }

        let read_diff = set_difference(&prev.vars_read, &self.vars_read);
        let written_diff = set_difference(&prev.vars_written, &self.vars_written);
        let always_diff = set_difference(&prev.vars_written_always, &self.vars_written_always);

        if !read_diff.is_empty() {
            let _ = write!(buf, "R{} ", read_diff);
        }
        if !written_diff.is_empty() {
            let _ = write!(buf, "W{} ", written_diff);
        }
        if !always_diff.is_empty() {
            let _ = write!(buf, "W!{} ", always_diff);
        }

        buf.truncate(buf.trim_end().len());
        buf
    }
}

// Set difference formatted as -[a, b]+[c, d] (empty parts omitted)
fn set_difference(before: &BTreeSet<u16>, after: &BTreeSet<u16>) -> String {
    let removed: Vec<u16> = before.difference(after).copied().collect();
    let added: Vec<u16> = after.difference(before).copied().collect();

    let mut buf = String::new();
    if !removed.is_empty() {
        let _ = write!(buf, "-{}", format_vars(&removed));
    }
    if !added.is_empty() {
        let _ = write!(buf, "+{}", format_vars(&added));
    }
    buf
}

fn format_vars(vars: &[u16]) -> String {
    let mut buf = String::from("[");
    for (i, var) in vars.iter().enumerate() {
        if i > 0 {
            buf.push_str(", ");
        }
        let _ = write!(buf, "{}", var);
    }
    buf.push(']');
    buf
}

/// Slots popped off the operand stack by one instruction
///
/// Instructions that inspect and push back (the `dup` family, `swap`) count
/// the full reach below the starting height.
fn instruction_pop_depth(op: &Instruction, before_stack: &[SlotType]) -> usize {
    use Instruction::*;

    match op {
        // Pop arrayref and index
        IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => 2,

        INeg | FNeg => 1,
        LNeg | DNeg => 2,

        I2B | I2C | I2S | I2L | I2F | I2D | F2I | F2L | F2D => 1,
        L2I | L2F | L2D | D2I | D2L | D2F => 2,

        IStore(_) | FStore(_) | AStore(_) => 1,
        LStore(_) | DStore(_) => 2,

        // Pop arrayref, index, and value
        IAStore | FAStore | AAStore | BAStore | CAStore | SAStore => 3,
        LAStore | DAStore => 4,

        Pop | Dup => 1,
        Pop2 | DupX1 | Dup2 | Swap => 2,
        DupX2 | Dup2X1 => 3,
        Dup2X2 => 4,

        IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) => 2,
        FAdd | FSub | FMul | FDiv | FRem | FCmp(_) => 2,
        LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => 4,
        DAdd | DSub | DMul | DDiv | DRem => 4,
        LCmp | DCmp(_) => 4,
        LSh(_) => 3,

        ArrayLength | InstanceOf(_) | CheckCast(_) => 1,
        MonitorEnter | MonitorExit => 1,
        NewArray(_) | ANewArray(_) => 1,
        MultiANewArray(_, dims) => *dims as usize,

        GetField(_) => 1,
        PutField(field) => 1 + field.descriptor.width(),
        PutStatic(field) => field.descriptor.width(),

        Invoke(invoke_type, method) => {
            let mut pop = method.descriptor.parameter_length(invoke_type.has_receiver());

            // `invokespecial <init>` also consumes every stack copy of the
            // uninitialized receiver above its first occurrence
            if *invoke_type == InvokeType::Special && method.name == UnqualifiedName::INIT {
                let receiver = &before_stack[before_stack.len() - pop];
                debug_assert!(matches!(
                    receiver,
                    SlotType::Uninitialized(_) | SlotType::UninitializedThis
                ));
                if let Some(first) = before_stack.iter().position(|slot| slot == receiver) {
                    pop = before_stack.len() - first;
                }
            }

            pop
        }
        InvokeDynamic(descriptor) => 1 + descriptor.parameter_length(false),

        _ => 0,
    }
}

fn branch_pop_depth(branch: &BranchInstruction) -> usize {
    use BranchInstruction::*;

    match branch {
        If(_, _) | IfNull(_, _) => 1,
        IfICmp(_, _) | IfACmp(_, _) => 2,
        TableSwitch { .. } | LookupSwitch { .. } => 1,
        IReturn | FReturn | AReturn | AThrow => 1,
        LReturn | DReturn => 2,
        Goto(_) | Return | Jsr(_) | Ret(_) => 0,
    }
}

fn instruction_vars_read(op: &Instruction) -> BTreeSet<u16> {
    use Instruction::*;

    match op {
        ILoad(var) | FLoad(var) | ALoad(var) | IInc(var, _) => BTreeSet::from([*var]),
        LLoad(var) | DLoad(var) => BTreeSet::from([*var, *var + 1]),
        _ => BTreeSet::new(),
    }
}

fn instruction_vars_written(op: &Instruction) -> BTreeSet<u16> {
    use Instruction::*;

    match op {
        IStore(var) | FStore(var) | AStore(var) | IInc(var, _) => BTreeSet::from([*var]),
        LStore(var) | DStore(var) => BTreeSet::from([*var, *var + 1]),
        _ => BTreeSet::new(),
    }
}
