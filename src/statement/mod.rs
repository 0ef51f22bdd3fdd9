//! Statement trees describing how a loop nest decomposes into backend work.
//!
//! A tree depends only on the policy and the rank of the iteration space;
//! extents are read from the space when it runs. Trees are never mutated
//! after they are built.

mod build;

pub use build::build;

use std::fmt;

use kernport_policy::ExecutionPolicy;

use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementNode {
    /// Loop over dimension `dim` under `policy`, running `body` per index.
    ParallelFor {
        dim: usize,
        policy: ExecutionPolicy,
        body: Vec<StatementNode>,
    },
    /// Everything below runs as one launch on the policy's backend.
    KernelBoundary {
        policy: ExecutionPolicy,
        body: Vec<StatementNode>,
    },
    /// Walk dimension `dim` in contiguous segments of `segment_len`,
    /// restricting that dimension to the current segment for `body`.
    SegmentIterate {
        dim: usize,
        segment_len: usize,
        body: Vec<StatementNode>,
    },
    /// Barrier between the statements that precede and follow it.
    Sync,
    /// Apply the loop body to the current index tuple.
    Lambda,
}

impl StatementNode {
    pub fn children(&self) -> &[StatementNode] {
        match self {
            Self::ParallelFor { body, .. }
            | Self::KernelBoundary { body, .. }
            | Self::SegmentIterate { body, .. } => body,
            Self::Sync | Self::Lambda => &[],
        }
    }

    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(Self::depth)
            .max()
            .unwrap_or(0)
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::ParallelFor { .. } => "for",
            Self::KernelBoundary { .. } => "kernel",
            Self::SegmentIterate { .. } => "segments",
            Self::Sync => "sync",
            Self::Lambda => "lambda",
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        write!(f, "{:width$}{}", "", self.label(), width = indent * 2)?;
        match self {
            Self::ParallelFor { dim, policy, .. } => write!(f, " dim={dim} policy={policy}")?,
            Self::KernelBoundary { policy, .. } => write!(f, " policy={policy}")?,
            Self::SegmentIterate {
                dim, segment_len, ..
            } => write!(f, " dim={dim} len={segment_len}")?,
            Self::Sync | Self::Lambda => {}
        }
        writeln!(f)?;
        for child in self.children() {
            child.fmt_indented(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for StatementNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Visit the direct children of `node` in order.
pub fn for_each_child<F>(node: &StatementNode, mut visitor: F)
where
    F: FnMut(&StatementNode),
{
    for child in node.children() {
        visitor(child);
    }
}

/// Check that every loop dimension exists in a space of `rank` and that
/// nested loops appear outer-to-inner in declared dimension order.
pub fn validate(node: &StatementNode, rank: usize) -> KernelResult<()> {
    validate_below(node, rank, None)
}

fn validate_below(node: &StatementNode, rank: usize, enclosing: Option<usize>) -> KernelResult<()> {
    let mut enclosing = enclosing;
    match node {
        StatementNode::ParallelFor { dim, .. } => {
            if *dim >= rank {
                return Err(KernelError::InvalidStatementTree(format!(
                    "loop over dimension {dim} in a rank {rank} space"
                )));
            }
            if let Some(outer) = enclosing
                && *dim <= outer
            {
                return Err(KernelError::InvalidStatementTree(format!(
                    "loop over dimension {dim} nested inside dimension {outer}"
                )));
            }
            enclosing = Some(*dim);
        }
        StatementNode::SegmentIterate {
            dim, segment_len, ..
        } => {
            if *dim >= rank {
                return Err(KernelError::InvalidStatementTree(format!(
                    "segments over dimension {dim} in a rank {rank} space"
                )));
            }
            if *segment_len == 0 {
                return Err(KernelError::InvalidStatementTree(
                    "zero-length segments".to_string(),
                ));
            }
        }
        StatementNode::KernelBoundary { .. } | StatementNode::Sync | StatementNode::Lambda => {}
    }

    for child in node.children() {
        validate_below(child, rank, enclosing)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_for(dim: usize, body: Vec<StatementNode>) -> StatementNode {
        StatementNode::ParallelFor {
            dim,
            policy: ExecutionPolicy::Sequential,
            body,
        }
    }

    #[test]
    fn visitor_sees_children_in_order() {
        let node = StatementNode::KernelBoundary {
            policy: ExecutionPolicy::Sequential,
            body: vec![seq_for(0, vec![StatementNode::Lambda]), StatementNode::Sync],
        };
        let mut labels = Vec::new();
        for_each_child(&node, |child| labels.push(child.label()));
        assert_eq!(labels, ["for", "sync"]);
        assert_eq!(node.depth(), 3);
    }

    #[test]
    fn rejects_out_of_order_nesting() {
        let node = seq_for(1, vec![seq_for(0, vec![StatementNode::Lambda])]);
        assert!(matches!(
            validate(&node, 2),
            Err(KernelError::InvalidStatementTree(_))
        ));
    }

    #[test]
    fn rejects_dimension_past_rank() {
        let node = seq_for(0, vec![seq_for(2, vec![StatementNode::Lambda])]);
        assert!(validate(&node, 2).is_err());
        assert!(validate(&node, 3).is_ok());
    }

    #[test]
    fn sibling_loops_restart_nesting() {
        let node = StatementNode::KernelBoundary {
            policy: ExecutionPolicy::Sequential,
            body: vec![
                seq_for(0, vec![seq_for(1, vec![StatementNode::Lambda])]),
                seq_for(0, vec![StatementNode::Lambda]),
            ],
        };
        assert!(validate(&node, 2).is_ok());
    }

    #[test]
    fn display_indents_children() {
        let text = seq_for(0, vec![StatementNode::Lambda]).to_string();
        assert_eq!(text, "for dim=0 policy=seq\n  lambda\n");
    }
}
