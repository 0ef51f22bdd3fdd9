use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use kernport_policy::ExecutionPolicy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace};

use super::call_site::CallSite;
use crate::backend::Backends;
use crate::dispatch::{Executor, Launch, LoopBody};
use crate::error::{KernelError, KernelResult};
use crate::segment::IterationSpace;
use crate::statement::{self, StatementNode};

/// Bookkeeping for an instantiated variant.
#[derive(Debug)]
pub struct VariantMetadata {
    pub created_at: Instant,
    pub instantiation_time: Duration,
    last_launched: Mutex<Option<Instant>>,
    launches: AtomicU64,
}

impl VariantMetadata {
    fn new(instantiation_time: Duration) -> Self {
        Self {
            created_at: Instant::now(),
            instantiation_time,
            last_launched: Mutex::new(None),
            launches: AtomicU64::new(0),
        }
    }

    fn record_launch(&self) {
        *self.last_launched.lock() = Some(Instant::now());
        self.launches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    pub fn last_launched(&self) -> Option<Instant> {
        *self.last_launched.lock()
    }
}

/// Serialisable summary of a variant for region statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantInfo {
    pub index: usize,
    pub policy: ExecutionPolicy,
    pub launches: u64,
    pub instantiation_ns: u64,
    /// Ranks with a prepared statement tree.
    pub prepared_ranks: Vec<usize>,
}

/// The loop specialised for one candidate policy of a region.
///
/// A statement tree depends only on the policy and the rank of the iteration
/// space, so each variant builds and validates the tree once per
/// `(policy, rank)` and reuses it for every later launch. Extents are bound
/// at execution time.
#[derive(Debug)]
pub struct CompiledVariant {
    index: usize,
    policy: ExecutionPolicy,
    label: String,
    trees: RwLock<AHashMap<(ExecutionPolicy, usize), Arc<StatementNode>>>,
    pub metadata: VariantMetadata,
}

impl CompiledVariant {
    /// Check the policy's backend can take launches and record how long it
    /// took. Regions call this at most once per candidate; trees are
    /// prepared on the first launch of each rank.
    pub fn instantiate(
        call_site: CallSite,
        index: usize,
        policy: ExecutionPolicy,
        backends: &Backends,
    ) -> KernelResult<Self> {
        let start = Instant::now();
        if matches!(policy, ExecutionPolicy::Device { .. }) && backends.device().stream().is_shut_down() {
            return Err(KernelError::StreamClosed);
        }
        let label = format!("{call_site}#{index}");
        let elapsed = start.elapsed();
        debug!(%call_site, index, %policy, ?elapsed, "variant instantiated");

        Ok(Self {
            index,
            policy,
            label,
            trees: RwLock::new(AHashMap::new()),
            metadata: VariantMetadata::new(elapsed),
        })
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the loop under this variant's policy.
    pub fn launch(&self, backends: &Backends, space: &IterationSpace, body: &LoopBody) -> KernelResult<Launch> {
        self.issue(self.policy, backends, space, body)
    }

    /// Run the loop under the synchronous form of this variant's policy.
    pub fn launch_synchronously(
        &self,
        backends: &Backends,
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Launch> {
        self.issue(self.policy.synchronous(), backends, space, body)
    }

    fn issue(
        &self,
        policy: ExecutionPolicy,
        backends: &Backends,
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Launch> {
        let root = self.tree(policy, space)?;
        self.metadata.record_launch();
        Executor::new(backends, &self.label).execute(&root, &policy, space, body)
    }

    /// The validated tree for `policy` at the rank of `space`.
    pub fn tree(&self, policy: ExecutionPolicy, space: &IterationSpace) -> KernelResult<Arc<StatementNode>> {
        let key = (policy, space.rank());
        if let Some(tree) = self.trees.read().get(&key) {
            return Ok(Arc::clone(tree));
        }

        let mut trees = self.trees.write();
        if let Some(tree) = trees.get(&key) {
            return Ok(Arc::clone(tree));
        }
        let tree = Arc::new(statement::build(space, &policy)?);
        trace!(label = %self.label, %policy, rank = key.1, "statement tree prepared");
        trees.insert(key, Arc::clone(&tree));
        Ok(tree)
    }

    pub fn info(&self) -> VariantInfo {
        VariantInfo {
            index: self.index,
            policy: self.policy,
            launches: self.metadata.launches(),
            instantiation_ns: u64::try_from(self.metadata.instantiation_time.as_nanos()).unwrap_or(u64::MAX),
            prepared_ranks: self.prepared_ranks(),
        }
    }

    fn prepared_ranks(&self) -> Vec<usize> {
        let mut ranks: Vec<_> = self
            .trees
            .read()
            .keys()
            .filter(|(policy, _)| *policy == self.policy)
            .map(|&(_, rank)| rank)
            .collect();
        ranks.sort_unstable();
        ranks
    }
}
