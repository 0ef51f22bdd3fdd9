use kernport_policy::ExecutionPolicy;

use super::StatementNode;
use crate::error::KernelResult;
use crate::segment::IterationSpace;

/// Build the statement tree that runs `space` under `policy`.
///
/// Host policies parallelise (at most) the outermost dimension and keep the
/// inner dimensions sequential. Device policies wrap the nest in a kernel
/// boundary whose outermost dimension is split into blocks of
/// `block_size` lanes, followed by a barrier.
pub fn build(space: &IterationSpace, policy: &ExecutionPolicy) -> KernelResult<StatementNode> {
    let rank = space.rank();
    let root = match policy {
        ExecutionPolicy::Sequential | ExecutionPolicy::Threaded { .. } => {
            nest(0, rank, *policy)
        }
        ExecutionPolicy::Device { block_size, .. } => StatementNode::KernelBoundary {
            policy: *policy,
            body: vec![
                StatementNode::SegmentIterate {
                    dim: 0,
                    segment_len: *block_size,
                    body: vec![nest(0, rank, *policy)],
                },
                StatementNode::Sync,
            ],
        },
    };

    super::validate(&root, rank)?;
    Ok(root)
}

fn nest(outer: usize, rank: usize, policy: ExecutionPolicy) -> StatementNode {
    let mut node = StatementNode::Lambda;
    for dim in (outer..rank).rev() {
        let dim_policy = if dim == outer {
            policy
        } else {
            ExecutionPolicy::Sequential
        };
        node = StatementNode::ParallelFor {
            dim,
            policy: dim_policy,
            body: vec![node],
        };
    }
    node
}

#[cfg(test)]
mod tests {
    use kernport_policy::Mode;

    use super::*;
    use crate::statement::for_each_child;

    #[test]
    fn sequential_nest_follows_dimension_order() {
        let space = IterationSpace::from_extents(&[4, 3, 2]).unwrap();
        let root = build(&space, &ExecutionPolicy::Sequential).unwrap();

        let mut dims = Vec::new();
        let mut node = &root;
        while let StatementNode::ParallelFor { dim, body, .. } = node {
            dims.push(*dim);
            node = &body[0];
        }
        assert_eq!(dims, [0, 1, 2]);
        assert_eq!(node, &StatementNode::Lambda);
    }

    #[test]
    fn threaded_policy_only_on_outer_loop() {
        let space = IterationSpace::from_extents(&[8, 8]).unwrap();
        let policy = ExecutionPolicy::Threaded { min_chunk: 2 };
        let root = build(&space, &policy).unwrap();

        let StatementNode::ParallelFor {
            policy: outer,
            body,
            ..
        } = &root
        else {
            panic!("expected outer loop, got {root:?}");
        };
        assert_eq!(*outer, policy);
        assert!(matches!(
            &body[0],
            StatementNode::ParallelFor {
                dim: 1,
                policy: ExecutionPolicy::Sequential,
                ..
            }
        ));
    }

    #[test]
    fn device_tree_has_kernel_blocks_and_barrier() {
        let space = IterationSpace::from_extents(&[1000]).unwrap();
        let policy = ExecutionPolicy::Device {
            block_size: 128,
            mode: Mode::Async,
        };
        let root = build(&space, &policy).unwrap();

        let mut kinds = Vec::new();
        for_each_child(&root, |child| kinds.push(child.clone()));
        assert!(matches!(root, StatementNode::KernelBoundary { .. }));
        assert!(matches!(
            kinds[0],
            StatementNode::SegmentIterate {
                dim: 0,
                segment_len: 128,
                ..
            }
        ));
        assert_eq!(kinds[1], StatementNode::Sync);
        assert_eq!(root.depth(), 4);
    }
}
