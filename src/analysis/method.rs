//! Per-method frame and effect tables.

use super::Effect;
use crate::jvm::{
    Frame, Insn, Instruction, InstructionSequence, RawFrame, RawSlot, SlotType, StructuralError,
    UninitializedSite,
};
use std::collections::HashMap;
use std::fmt;

/// An instruction sequence with verifier frames and per-instruction effects
///
/// Frames come from the caller (usually straight out of a class file's stack
/// map table plus symbolic execution) as one optional [`RawFrame`] per
/// instruction index. `None` marks an unreachable instruction. Pseudo
/// instructions may be supplied without a frame; they adopt the frame of the
/// following index.
pub struct MethodAnalysis {
    seq: InstructionSequence,
    frames: Vec<Option<Frame>>,
    effects: Vec<Option<Effect>>,
    params_effect: Effect,
}

impl MethodAnalysis {
    pub fn new(
        seq: InstructionSequence,
        raw_frames: Vec<Option<RawFrame>>,
    ) -> Result<MethodAnalysis, StructuralError> {
        let len = seq.len();
        if raw_frames.len() != len {
            return Err(StructuralError::FrameCountMismatch {
                expected: len,
                actual: raw_frames.len(),
            });
        }

        // Mint one allocation site per distinct `new` index
        let mut sites: HashMap<usize, UninitializedSite> = HashMap::new();
        let mut frames: Vec<Option<Frame>> = Vec::with_capacity(len);
        for raw_frame in raw_frames {
            match raw_frame {
                None => frames.push(None),
                Some(raw_frame) => frames.push(Some(cook_frame(&seq, raw_frame, &mut sites)?)),
            }
        }

        // Pseudo instructions without a frame take the following one
        for index in (0..len.saturating_sub(1)).rev() {
            if frames[index].is_none() && seq.insn(index).is_pseudo() {
                frames[index] = frames[index + 1].clone();
            }
        }

        // A frame marker and the labels and line numbers leading up to it
        // take the frame holding after the marker, even when the reader
        // supplied narrower pre-merge frames for them
        for index in (0..len.saturating_sub(1)).rev() {
            if !matches!(seq.insn(index), Insn::FrameMarker) {
                continue;
            }
            let adopted = match &frames[index + 1] {
                Some(adopted) => adopted.clone(),
                None => continue,
            };
            frames[index] = Some(adopted.clone());
            let mut run = index;
            while run > 0 && matches!(seq.insn(run - 1), Insn::Label | Insn::Line(_)) {
                run -= 1;
                frames[run] = Some(adopted.clone());
            }
        }

        let entry = match &frames[0] {
            None => return Err(StructuralError::MissingEntryFrame),
            Some(entry) => entry,
        };
        let params_effect = Effect::params(entry.locals.len() as u16);

        // Every reachable branch must lead to an instruction with a frame
        for index in 0..len {
            if frames[index].is_none() {
                continue;
            }
            for &target in seq.branch_successors(index) {
                if frames[target].is_none() {
                    return Err(StructuralError::MissingBranchTargetFrame { target });
                }
            }
        }

        // An effect needs the frame at the instruction and at its lowest
        // successor; everything else stays unknown
        let mut effects: Vec<Option<Effect>> = Vec::with_capacity(len);
        for index in 0..len {
            let after = seq
                .successors(index)
                .iter()
                .copied()
                .min()
                .and_then(|next| frames[next].as_ref());
            let effect = match (&frames[index], after) {
                (Some(before), Some(after)) => {
                    Some(Effect::of_insn(seq.insn(index), before, after))
                }
                _ => None,
            };
            effects.push(effect);
        }

        log::debug!(
            "analyzed {:?}: {} instructions, {} reachable",
            seq.method(),
            len,
            frames.iter().filter(|frame| frame.is_some()).count(),
        );

        Ok(MethodAnalysis {
            seq,
            frames,
            effects,
            params_effect,
        })
    }

    pub fn sequence(&self) -> &InstructionSequence {
        &self.seq
    }

    /// Index of the trailing return instruction
    pub fn return_index(&self) -> usize {
        self.seq.return_index()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Frame holding when the instruction at `index` executes
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames[index].as_ref()
    }

    /// Effect of the single instruction at `index`
    pub fn effect(&self, index: usize) -> Option<&Effect> {
        self.effects[index].as_ref()
    }

    /// Pseudo-effect of binding the formal parameters on method entry
    pub fn params_effect(&self) -> &Effect {
        &self.params_effect
    }

    /// Locals on method entry (receiver and parameters)
    pub fn entry_locals(&self) -> &[SlotType] {
        match &self.frames[0] {
            Some(frame) => &frame.locals,
            // Checked during construction
            None => &[],
        }
    }
}

impl fmt::Debug for MethodAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}:", self.seq.method())?;
        for index in 0..self.len() {
            write!(
                f,
                "  {:3} {:?} -> {:?}",
                index,
                self.seq.insn(index),
                self.seq.successors(index),
            )?;
            match &self.frames[index] {
                Some(frame) => writeln!(f, " {:?}", frame)?,
                None => writeln!(f, " (unreachable)")?,
            }
        }
        Ok(())
    }
}

fn cook_frame(
    seq: &InstructionSequence,
    raw: RawFrame,
    sites: &mut HashMap<usize, UninitializedSite>,
) -> Result<Frame, StructuralError> {
    let mut frame = Frame {
        stack: Vec::with_capacity(raw.stack.len()),
        locals: Vec::with_capacity(raw.locals.len()),
    };
    for slot in raw.stack {
        frame.stack.push(cook_slot(seq, slot, sites)?);
    }
    for slot in raw.locals {
        frame.locals.push(cook_slot(seq, slot, sites)?);
    }
    Ok(frame)
}

fn cook_slot(
    seq: &InstructionSequence,
    slot: RawSlot,
    sites: &mut HashMap<usize, UninitializedSite>,
) -> Result<SlotType, StructuralError> {
    Ok(match slot {
        RawSlot::Top => SlotType::Top,
        RawSlot::Int => SlotType::Int,
        RawSlot::Float => SlotType::Float,
        RawSlot::Long => SlotType::Long,
        RawSlot::Double => SlotType::Double,
        RawSlot::Null => SlotType::Null,
        RawSlot::UninitializedThis => SlotType::UninitializedThis,
        RawSlot::Object(ref_type) => SlotType::Object(ref_type),
        RawSlot::Uninitialized(new_index) => {
            if let Some(site) = sites.get(&new_index) {
                SlotType::Uninitialized(site.clone())
            } else {
                let class = match seq.insn(new_index) {
                    Insn::Op(Instruction::New(class)) => class.clone(),
                    _ => return Err(StructuralError::UninitializedSiteNotNew { new_index }),
                };
                let site = UninitializedSite::fresh(class);
                sites.insert(new_index, site.clone());
                SlotType::Uninitialized(site)
            }
        }
    })
}
