use kernport_policy::ExecutionPolicy;
use rayon::prelude::*;

use crate::backend::{sequential, threaded};
use crate::segment::{Index, IterationSpace, Segment};
use crate::statement::StatementNode;

/// Current loop bounds and index tuple while walking a tree.
#[derive(Debug, Clone)]
pub(super) struct Frame {
    ranges: Vec<Segment>,
    index: Vec<Index>,
}

impl Frame {
    pub(super) fn new(space: &IterationSpace) -> Self {
        let ranges = space.segments().to_vec();
        let index = ranges.iter().map(|segment| segment.begin).collect();
        Self { ranges, index }
    }
}

pub(super) struct Walker<'a> {
    body: &'a (dyn Fn(&[Index]) + Send + Sync),
    /// Compute units for segment iteration inside a kernel; `None` on host.
    blocks: Option<&'a rayon::ThreadPool>,
}

impl<'a> Walker<'a> {
    pub(super) const fn host(body: &'a (dyn Fn(&[Index]) + Send + Sync)) -> Self {
        Self { body, blocks: None }
    }

    pub(super) const fn device(
        body: &'a (dyn Fn(&[Index]) + Send + Sync),
        compute: &'a rayon::ThreadPool,
    ) -> Self {
        Self {
            body,
            blocks: Some(compute),
        }
    }

    pub(super) fn run_all(&self, stmts: &[StatementNode], frame: &mut Frame) {
        for stmt in stmts {
            self.run(stmt, frame);
        }
    }

    pub(super) fn run(&self, node: &StatementNode, frame: &mut Frame) {
        match node {
            StatementNode::ParallelFor { dim, policy, body } => {
                self.run_for(*dim, policy, body, frame);
            }
            StatementNode::SegmentIterate {
                dim,
                segment_len,
                body,
            } => self.run_segments(*dim, *segment_len, body, frame),
            StatementNode::KernelBoundary { body, .. } => self.run_all(body, frame),
            // Each block's lanes run on one worker, and block-parallel
            // statements join before returning, so a barrier has nothing
            // left to wait for.
            StatementNode::Sync => {}
            StatementNode::Lambda => (self.body)(&frame.index),
        }
    }

    fn run_for(
        &self,
        dim: usize,
        policy: &ExecutionPolicy,
        body: &[StatementNode],
        frame: &mut Frame,
    ) {
        let segment = frame.ranges[dim];
        match policy {
            ExecutionPolicy::Sequential | ExecutionPolicy::Device { .. } => {
                sequential::for_range(segment, |index| {
                    frame.index[dim] = index;
                    self.run_all(body, frame);
                });
            }
            ExecutionPolicy::Threaded { min_chunk } => {
                threaded::for_range_with(segment, *min_chunk, frame.clone(), |local, index| {
                    local.index[dim] = index;
                    self.run_all(body, local);
                });
            }
        }
    }

    fn run_segments(&self, dim: usize, len: usize, body: &[StatementNode], frame: &mut Frame) {
        let whole = frame.ranges[dim];
        match self.blocks {
            Some(pool) => {
                let blocks: Vec<Segment> = whole.chunks(len).collect();
                let template = frame.clone();
                pool.install(|| {
                    blocks
                        .into_par_iter()
                        .for_each_with(template, |local, block| {
                            local.ranges[dim] = block;
                            self.run_all(body, local);
                        });
                });
            }
            None => {
                for block in whole.chunks(len) {
                    frame.ranges[dim] = block;
                    self.run_all(body, frame);
                }
                frame.ranges[dim] = whole;
            }
        }
    }
}
