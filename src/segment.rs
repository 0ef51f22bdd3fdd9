//! Iteration spaces: one half-open `[begin, end)` range per dimension.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

pub type Index = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub begin: Index,
    pub end: Index,
}

impl Segment {
    pub const fn new(begin: Index, end: Index) -> Self {
        Self { begin, end }
    }

    pub const fn len(&self) -> u64 {
        if self.end > self.begin {
            self.end.abs_diff(self.begin)
        } else {
            0
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub const fn range(&self) -> Range<Index> {
        self.begin..self.end
    }

    /// Split into consecutive pieces of at most `len` indices.
    pub fn chunks(&self, len: usize) -> impl Iterator<Item = Self> + use<> {
        let step = len.max(1) as Index;
        let end = self.end;
        (self.begin..self.end)
            .step_by(step as usize)
            .map(move |begin| Self::new(begin, begin.saturating_add(step).min(end)))
    }
}

impl From<Range<Index>> for Segment {
    fn from(range: Range<Index>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// Ordered list of per-dimension segments; dimension 0 is outermost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationSpace {
    segments: Vec<Segment>,
}

impl IterationSpace {
    pub fn new(segments: Vec<Segment>) -> KernelResult<Self> {
        if segments.is_empty() {
            return Err(KernelError::EmptyIterationSpace);
        }
        for (index, segment) in segments.iter().enumerate() {
            if segment.begin > segment.end {
                return Err(KernelError::InvalidSegment {
                    index,
                    begin: segment.begin,
                    end: segment.end,
                });
            }
        }
        Ok(Self { segments })
    }

    /// Build from `(begin, end)` pairs.
    pub fn from_bounds<I>(bounds: I) -> KernelResult<Self>
    where
        I: IntoIterator<Item = (Index, Index)>,
    {
        Self::new(
            bounds
                .into_iter()
                .map(|(begin, end)| Segment::new(begin, end))
                .collect(),
        )
    }

    /// Zero-based space with the given extents.
    pub fn from_extents(extents: &[usize]) -> KernelResult<Self> {
        Self::from_bounds(extents.iter().map(|&extent| (0, extent as Index)))
    }

    pub fn rank(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, dim: usize) -> Option<Segment> {
        self.segments.get(dim).copied()
    }

    /// Total number of index tuples.
    pub fn len(&self) -> u64 {
        self.segments
            .iter()
            .fold(1_u64, |acc, segment| acc.saturating_mul(segment.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().any(Segment::is_empty)
    }
}
