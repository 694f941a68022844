//! Fixed-point combination of effects over an index range.

use super::{Effect, MethodAnalysis};
use crate::jvm::{Frame, SlotType};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Contract violations when asking for a range combination
#[derive(Debug)]
pub enum RangeError {
    /// `start` must not exceed `limit`
    StartAfterLimit { start: usize, limit: usize },

    /// `limit` must not exceed the instruction count
    LimitOutOfBounds { limit: usize, len: usize },

    /// Parameter write simulation only makes sense from index 0
    ParamsNotAtStart { start: usize },
}

/// Combined effect of all paths through `[start, limit)`, with the frames
/// holding at both ends
///
/// The frame at `start` types the stack pops and the variable reads; the frame
/// at `limit` types the stack pushes and the variable writes.
pub struct RangeEffect {
    effect: Effect,
    before: Frame,
    after: Frame,
}

impl RangeEffect {
    pub fn pop_depth(&self) -> usize {
        self.effect.pop_depth
    }

    pub fn stack_delta(&self) -> isize {
        self.effect.stack_delta
    }

    /// Slots popped below the starting stack height, bottom first
    pub fn stack_pops(&self) -> &[SlotType] {
        let stack = &self.before.stack;
        &stack[stack.len() - self.effect.pop_depth..]
    }

    /// Slots left above the popped-to height, bottom first
    pub fn stack_pushes(&self) -> &[SlotType] {
        &self.after.stack[self.before.stack.len() - self.effect.pop_depth..]
    }

    /// Stack pops widened to at least `min_pop_depth` slots
    ///
    /// `None` when the starting stack is too shallow to widen that far.
    pub fn stack_pops_at_least(&self, min_pop_depth: usize) -> Option<&[SlotType]> {
        let stack = &self.before.stack;
        if min_pop_depth > stack.len() {
            return None;
        }
        Some(&stack[stack.len() - self.effect.pop_depth.max(min_pop_depth)..])
    }

    /// Stack pushes corresponding to [`stack_pops_at_least`](Self::stack_pops_at_least)
    pub fn stack_pushes_at_least(&self, min_pop_depth: usize) -> Option<&[SlotType]> {
        let before_len = self.before.stack.len();
        if min_pop_depth > before_len {
            return None;
        }
        Some(&self.after.stack[before_len - self.effect.pop_depth.max(min_pop_depth)..])
    }

    /// Variables that can be read before the range writes them, with the type
    /// each read observes
    pub fn vars_read(&self) -> BTreeMap<u16, SlotType> {
        let reads = vars_to_map(&self.effect.vars_read, &self.before.locals);
        debug_assert!(!reads.values().any(|ty| *ty == SlotType::Bogus));
        reads
    }

    /// Variables that can be written in the range, with the type each slot
    /// holds afterwards
    pub fn vars_written(&self) -> BTreeMap<u16, SlotType> {
        vars_to_map(&self.effect.vars_written, &self.after.locals)
    }

    /// Variables written on every path through the range
    pub fn vars_written_always(&self) -> BTreeMap<u16, SlotType> {
        vars_to_map(&self.effect.vars_written_always, &self.after.locals)
    }
}

/// Type the variable set against a locals array
///
/// A slot past the end of the locals, or a `top` that is not the second half
/// of a `long`/`double` entry right below it, comes out as
/// [`SlotType::Bogus`]: the slot holds path-dependent garbage.
fn vars_to_map(vars: &BTreeSet<u16>, locals: &[SlotType]) -> BTreeMap<u16, SlotType> {
    let mut map: BTreeMap<u16, SlotType> = BTreeMap::new();
    for &var in vars {
        let ty = match locals.get(var as usize) {
            Some(ty) => ty.clone(),
            None => SlotType::Top,
        };
        map.insert(var, ty);
    }

    let keys: Vec<u16> = map.keys().copied().collect();
    for key in keys {
        if map[&key] != SlotType::Top {
            continue;
        }
        let wide_below = key > 0
            && matches!(
                map.get(&(key - 1)),
                Some(SlotType::Long) | Some(SlotType::Double)
            );
        if !wide_below {
            map.insert(key, SlotType::Bogus);
        }
    }

    map
}

/// Folds per-instruction effects over every execution path through a range
///
/// Can be reused for different ranges of the same method.
pub struct RangeCombiner<'a> {
    analysis: &'a MethodAnalysis,
}

impl<'a> RangeCombiner<'a> {
    pub fn new(analysis: &'a MethodAnalysis) -> RangeCombiner<'a> {
        RangeCombiner { analysis }
    }

    /// Combined effect of `[start, limit)`
    ///
    /// Control flow is followed from `start` until the per-index effects
    /// stabilize. The result is the effect accumulated at `limit - 1` over
    /// paths that leave the range through its end; `Ok(None)` when no such
    /// path exists or an end of the range is unreachable.
    ///
    /// With `use_params`, the write of all formal parameters is simulated in
    /// front of the range (which must then begin at index 0).
    pub fn combine(
        &self,
        start: usize,
        limit: usize,
        use_params: bool,
    ) -> Result<Option<RangeEffect>, RangeError> {
        let len = self.analysis.len();
        if start > limit {
            return Err(RangeError::StartAfterLimit { start, limit });
        }
        if limit > len {
            return Err(RangeError::LimitOutOfBounds { limit, len });
        }
        if use_params && start != 0 {
            return Err(RangeError::ParamsNotAtStart { start });
        }

        log::trace!(
            "combining {:?}[{}-{}){}",
            self.analysis.sequence().method(),
            start,
            limit,
            if use_params { "+P" } else { "" },
        );

        if start == limit {
            return Ok(Some(self.empty_effect(use_params)));
        }

        // The frame past the very last instruction does not exist
        if limit == len {
            return Ok(None);
        }

        let before = match self.analysis.frame(start) {
            None => return Ok(None),
            Some(frame) => frame.clone(),
        };
        let after = match self.analysis.frame(limit) {
            None => return Ok(None),
            Some(frame) => frame.clone(),
        };

        let seq = self.analysis.sequence();
        let mut combined: Vec<Option<Effect>> = vec![None; len];
        let mut incoming: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); len];
        let mut has_end_transition = false;

        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(start);

        while let Some(index) = queue.pop_front() {
            // A real instruction whose effect is unknown cannot be crossed
            let own = match self.analysis.effect(index) {
                Some(effect) => effect.clone(),
                None if seq.insn(index).is_pseudo() => Effect::empty(),
                None => continue,
            };

            debug_assert!(index == start || !incoming[index].is_empty());

            let merged = {
                let mut sources: Vec<&Effect> = incoming[index]
                    .iter()
                    .filter_map(|&source| combined[source].as_ref())
                    .collect();
                if use_params && index == start {
                    sources.push(self.analysis.params_effect());
                }
                Effect::merge(&sources, &own, combined[index].as_ref())
            };

            // Only freshly changed effects get propagated further
            if merged.equal_accesses(combined[index].as_ref()) {
                continue;
            }

            if log::log_enabled!(log::Level::Trace) {
                let previous = Effect::empty();
                let previous = combined[index].as_ref().unwrap_or(&previous);
                log::trace!("updating index {}: {}", index, merged.difference(previous));
            }

            combined[index] = Some(merged);

            for &dest in seq.successors(index) {
                if index + 1 == limit && dest == limit {
                    has_end_transition = true;
                } else {
                    queue.push_back(dest);
                    incoming[dest].insert(index);
                }
            }
        }

        if !has_end_transition {
            return Ok(None);
        }

        Ok(combined[limit - 1].take().map(|effect| RangeEffect {
            effect,
            before,
            after,
        }))
    }

    /// Combined effect from `start` to the end of the method body
    pub fn combine_tail(&self, start: usize) -> Result<Option<RangeEffect>, RangeError> {
        self.combine(start, self.analysis.return_index(), false)
    }

    fn empty_effect(&self, use_params: bool) -> RangeEffect {
        if use_params {
            let frame = Frame {
                stack: vec![],
                locals: self.analysis.entry_locals().to_vec(),
            };
            RangeEffect {
                effect: self.analysis.params_effect().clone(),
                before: frame.clone(),
                after: frame,
            }
        } else {
            RangeEffect {
                effect: Effect::empty(),
                before: Frame::default(),
                after: Frame::default(),
            }
        }
    }
}
