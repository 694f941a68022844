//! Discovery of branch-free code sections.
//!
//! A section is "branch free" in one of two senses: no jump from inside the
//! section leaves it (outgoing mode), or no jump from outside the section
//! lands in it (incoming mode). Replacing an incoming-free section with an
//! outgoing-free one keeps every jump in the merged body intact.
//!
//! The analyzer aggregates jump extents once per method (linear time) and then
//! enumerates every legal section by repeatedly extending a window.

use crate::jvm::{InstructionSequence, MethodId};
use std::collections::BTreeMap;
use std::fmt;

/// Which sense of "branch free" to enumerate
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SectionMode {
    /// Sections containing no jump to an instruction outside of them
    Outgoing,

    /// Sections no outside jump lands into
    Incoming,
}

/// Half-open index range `[start, limit)` of one method's instruction list
///
/// `start == limit` is an empty section positioned before `start`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CodeSection {
    pub method: MethodId,
    pub start: usize,
    pub limit: usize,
}

impl CodeSection {
    pub fn new(method: MethodId, start: usize, limit: usize) -> CodeSection {
        debug_assert!(start <= limit, "bad instruction range {}-{}", start, limit);
        CodeSection {
            method,
            start,
            limit,
        }
    }

    /// Number of instruction indices covered
    pub fn size(&self) -> usize {
        self.limit - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.limit
    }
}

impl fmt::Debug for CodeSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}-{})", self.method, self.start, self.limit)
    }
}

/// Enumerates the branch-free sections of one method body
///
/// The body under consideration is `[0, return_index)`; the trailing `*return`
/// itself never belongs to a section. A jump into the return region can never
/// stay inside a section, so in outgoing mode it poisons every section
/// containing it; in incoming mode it lands outside every section and
/// constrains nothing.
pub struct BranchAnalyzer<'a> {
    seq: &'a InstructionSequence,
    offsets: Vec<isize>,
    back_offsets: Vec<isize>,
}

impl<'a> BranchAnalyzer<'a> {
    pub fn new(seq: &'a InstructionSequence, mode: SectionMode) -> BranchAnalyzer<'a> {
        let body_len = seq.return_index();

        let mut offsets: Vec<isize> = (0..body_len as isize).collect();
        let mut back_offsets = offsets.clone();

        for index in 0..body_len {
            for &target in seq.branch_successors(index) {
                if target >= body_len {
                    if mode == SectionMode::Outgoing {
                        offsets[index] = body_len as isize;
                    }
                    continue;
                }
                let (from, to) = match mode {
                    SectionMode::Outgoing => (index, target),
                    SectionMode::Incoming => (target, index),
                };
                offsets[from] = offsets[from].max(to as isize);
                back_offsets[from] = back_offsets[from].min(to as isize);
            }
        }

        aggregate_forward(&mut offsets);
        aggregate_backward(&mut back_offsets);

        BranchAnalyzer {
            seq,
            offsets,
            back_offsets,
        }
    }

    pub fn method(&self) -> &MethodId {
        self.seq.method()
    }

    /// Length of the method body proper
    pub fn body_len(&self) -> usize {
        self.offsets.len()
    }

    /// Smallest legal extension of `[start, limit)`, if any
    fn extend_range(&self, start: usize, limit: usize) -> Option<usize> {
        extend_range(&self.offsets, &self.back_offsets, start, limit)
    }

    /// Iterator over every legal section, in `(start, size)` order
    ///
    /// The final yielded section is the empty sentinel at the end of the body.
    pub fn sections(&self) -> Sections<'_> {
        Sections {
            analyzer: self,
            start: 0,
            limit: 0,
            ready: true,
            done: self.body_len() == 0,
        }
    }

    /// All legal sections grouped by size
    pub fn sorted_sections(&self) -> BTreeMap<usize, Vec<CodeSection>> {
        let mut map: BTreeMap<usize, Vec<CodeSection>> = BTreeMap::new();
        for section in self.sections() {
            map.entry(section.size()).or_default().push(section);
        }
        map
    }

    /// Number of jumps out of instructions in the section
    ///
    /// Always counts in the outgoing sense, whatever mode this analyzer
    /// enumerates with.
    pub fn branch_count(&self, section: &CodeSection) -> usize {
        debug_assert_eq!(&section.method, self.method());

        (section.start..section.limit)
            .map(|index| self.seq.branch_successors(index).len())
            .sum()
    }
}

impl<'a> IntoIterator for &'a BranchAnalyzer<'a> {
    type Item = CodeSection;
    type IntoIter = Sections<'a>;

    fn into_iter(self) -> Sections<'a> {
        self.sections()
    }
}

/// See [`BranchAnalyzer::sections`]
pub struct Sections<'a> {
    analyzer: &'a BranchAnalyzer<'a>,
    start: usize,
    limit: usize,
    ready: bool,
    done: bool,
}

impl<'a> Iterator for Sections<'a> {
    type Item = CodeSection;

    fn next(&mut self) -> Option<CodeSection> {
        if !self.ready {
            if self.done {
                return None;
            }

            match self.analyzer.extend_range(self.start, self.limit) {
                Some(limit) => self.limit = limit,
                None => {
                    self.start += 1;
                    self.limit = self.start;
                }
            }

            self.done = self.start >= self.analyzer.body_len();
            self.ready = true;
        }

        self.ready = false;
        Some(CodeSection::new(
            self.analyzer.method().clone(),
            self.start,
            self.limit,
        ))
    }
}

/// Forward flow aggregation
///
/// Afterwards each `offsets[i]` is the minimal offset `>= i` such that no cell
/// between `i` and `offsets[i]` holds a greater value. Negative seeds resolve
/// to the identity. Linear running time.
fn aggregate_forward(offsets: &mut [isize]) {
    let mut index = 0;
    while index < offsets.len() {
        aggregate(index, offsets, 1);
        index = (offsets[index] + 1) as usize;
    }
}

/// Mirror image of [`aggregate_forward`] for backward offsets
fn aggregate_backward(offsets: &mut [isize]) {
    let mut index = offsets.len() as isize - 1;
    while index >= 0 {
        aggregate(index as usize, offsets, -1);
        index = offsets[index as usize] - 1;
    }
}

fn aggregate(index: usize, offsets: &mut [isize], inc: isize) {
    let next_index = offsets[index];

    if next_index >= 0 {
        debug_assert!(index as isize * inc <= next_index * inc);

        // Traverse inner indices until the inner region is exited
        let mut runner = index as isize + inc;
        while runner * inc <= next_index * inc {
            if runner < 0 || runner >= offsets.len() as isize {
                // The extent runs off the end of the body; no section
                // containing this index can close
                offsets[index] = next_index;
                return;
            }
            aggregate(runner as usize, offsets, inc);
            runner = offsets[runner as usize] + inc;
        }

        offsets[index] = runner - inc;
    } else {
        offsets[index] = index as isize;
    }
}

/// Extend `[start, limit)` by the minimal legal amount
///
/// `None` when the body end is reached or a back jump inside the extension
/// reaches before `start`.
fn extend_range(
    offsets: &[isize],
    back_offsets: &[isize],
    start: usize,
    limit: usize,
) -> Option<usize> {
    debug_assert!(start <= limit && limit <= offsets.len());

    if limit < offsets.len() {
        let new_end = offsets[limit] as usize;
        if new_end >= offsets.len() {
            // Poisoned by a jump out of the body
            return None;
        }
        for index in limit..=new_end {
            if back_offsets[index] < start as isize {
                return None;
            }
        }
        Some(new_end + 1)
    } else {
        None
    }
}
