use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kernport_policy::{Backend, ExecutionPolicy};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::call_site::CallSite;
use super::context::RegionContext;
use super::feature::FeatureVector;
use super::pool::{AsyncCompletionPool, SlotId};
use super::stats::RegionStats;
use super::variant::CompiledVariant;
use crate::backend::Backends;
use crate::backend::device::{LaunchHandle, LaunchOutcome};
use crate::config::{ExhaustionPolicy, KernelConfig, WarmupStrategy};
use crate::dispatch::{Launch, LoopBody};
use crate::error::{KernelError, KernelResult};
use crate::model::PolicyModel;
use crate::plugin::{KernelPlugin, PluginContext};
use crate::segment::IterationSpace;

/// What one invocation decided and whether its work is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub invocation: u64,
    pub policy_index: usize,
    pub policy: ExecutionPolicy,
    /// The launch went to the device stream and holds a pool slot.
    pub pending: bool,
}

enum Issued {
    Finished(Duration),
    Pending(SlotId, LaunchHandle),
}

/// Adaptive state for one call site: its candidates, their lazily built
/// variants, the model that picks among them, and in-flight async launches.
pub struct Region {
    call_site: CallSite,
    policies: Vec<ExecutionPolicy>,
    variants: Vec<OnceCell<Arc<CompiledVariant>>>,
    model: Mutex<Box<dyn PolicyModel>>,
    stats: Mutex<RegionStats>,
    pool: AsyncCompletionPool,
    invocations: AtomicU64,
    warmup: WarmupStrategy,
    warmup_samples: u64,
    on_exhausted: ExhaustionPolicy,
}

impl Region {
    pub fn new(
        call_site: CallSite,
        policies: &[ExecutionPolicy],
        model: Box<dyn PolicyModel>,
        config: &KernelConfig,
    ) -> KernelResult<Self> {
        if policies.is_empty() {
            return Err(KernelError::EmptyPolicyList(call_site));
        }
        debug!(
            %call_site,
            candidates = policies.len(),
            model = model.name(),
            "region created"
        );

        Ok(Self {
            call_site,
            policies: policies.to_vec(),
            variants: policies.iter().map(|_| OnceCell::new()).collect(),
            model: Mutex::new(model),
            stats: Mutex::new(RegionStats::new(call_site, policies)),
            pool: AsyncCompletionPool::with_capacity(call_site, config.pool_capacity),
            invocations: AtomicU64::new(0),
            warmup: config.warmup,
            warmup_samples: config.warmup_samples,
            on_exhausted: config.on_pool_exhausted,
        })
    }

    pub const fn call_site(&self) -> CallSite {
        self.call_site
    }

    pub fn policies(&self) -> &[ExecutionPolicy] {
        &self.policies
    }

    /// Run the loop once under the policy the model picks.
    ///
    /// Completed async launches are collected first; if one of them failed
    /// its error is returned and nothing new is launched.
    pub fn invoke(
        &self,
        backends: &Backends,
        plugins: &[Arc<dyn KernelPlugin>],
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Dispatch> {
        self.drain()?;

        let features = FeatureVector::extract(space);
        let invocation = self.invocations.fetch_add(1, Ordering::Relaxed);
        let policy_index = self.select(&features, invocation);
        let policy = self.policies[policy_index];
        let variant = self.variant(policy_index, backends)?;
        let context = RegionContext {
            invocation,
            features,
            policy_index,
            policy,
        };

        let mut plugin_ctx = PluginContext {
            call_site: self.call_site,
            invocation,
            policy_index,
            policy,
            features: &context.features,
            pending: false,
        };
        for plugin in plugins {
            plugin.pre_launch(&plugin_ctx);
        }

        let issued = match self.issue(&variant, backends, space, body) {
            Ok(issued) => issued,
            Err(err) => {
                if !err.is_pool_exhausted() {
                    self.stats.lock().policies[policy_index].failures += 1;
                }
                warn!(call_site = %self.call_site, %policy, error = %err, "launch failed");
                return Err(err);
            }
        };

        let pending = matches!(issued, Issued::Pending(..));
        plugin_ctx.pending = pending;
        for plugin in plugins {
            plugin.post_launch(&plugin_ctx);
        }

        match issued {
            Issued::Finished(elapsed) => self.report(&context, elapsed),
            Issued::Pending(slot, handle) => {
                trace!(call_site = %self.call_site, slot = slot.index(), "async launch in flight");
                self.pool.arm(slot, context, handle)?;
            }
        }

        Ok(Dispatch {
            invocation,
            policy_index,
            policy,
            pending,
        })
    }

    /// Report every async launch that has completed since the last poll and
    /// free its slot. Never blocks.
    ///
    /// Returns how many launches were collected, or the first failure among
    /// them. Failed launches release their slot but contribute no sample.
    pub fn drain(&self) -> KernelResult<usize> {
        let done = self.pool.poll_completed();
        let mut failure = None;
        for launch in &done {
            match &launch.outcome {
                LaunchOutcome::Completed { elapsed } => self.report(&launch.context, *elapsed),
                LaunchOutcome::Failed(message) => {
                    self.stats.lock().policies[launch.context.policy_index].failures += 1;
                    warn!(
                        call_site = %self.call_site,
                        invocation = launch.context.invocation,
                        %message,
                        "async launch failed"
                    );
                    failure.get_or_insert_with(|| KernelError::backend(Backend::Device, message.clone()));
                }
            }
        }
        failure.map_or(Ok(done.len()), Err)
    }

    /// Async launches currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn pool(&self) -> &AsyncCompletionPool {
        &self.pool
    }

    pub fn stats(&self) -> RegionStats {
        let mut stats = self.stats.lock().clone();
        stats.invocations = self.invocations.load(Ordering::Relaxed);
        stats.in_flight = self.pool.in_flight();
        stats.variants = self
            .variants
            .iter()
            .filter_map(OnceCell::get)
            .map(|variant| variant.info())
            .collect();
        stats
    }

    fn select(&self, features: &FeatureVector, invocation: u64) -> usize {
        let count = self.policies.len();
        let observed = self.stats.lock().total_samples();
        let index = if observed < self.warmup_samples {
            match self.warmup {
                WarmupStrategy::DefaultIndex => 0,
                WarmupStrategy::RoundRobin => (invocation % count as u64) as usize,
            }
        } else {
            let pending = self.pool.pending_by_candidate(count);
            self.model.lock().select(features, &pending)
        };
        assert!(
            index < count,
            "policy model picked candidate {index} of {count} at `{}`",
            self.call_site
        );
        index
    }

    fn variant(&self, index: usize, backends: &Backends) -> KernelResult<Arc<CompiledVariant>> {
        self.variants[index]
            .get_or_try_init(|| {
                CompiledVariant::instantiate(self.call_site, index, self.policies[index], backends)
                    .map(Arc::new)
            })
            .map(Arc::clone)
    }

    fn issue(
        &self,
        variant: &CompiledVariant,
        backends: &Backends,
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Issued> {
        if !variant.policy().is_async() {
            return settle(variant.launch(backends, space, body)?);
        }

        let slot = match self.pool.acquire() {
            Ok(slot) => slot,
            Err(err) if self.on_exhausted == ExhaustionPolicy::Synchronous => {
                debug!(call_site = %self.call_site, error = %err, "running async policy synchronously");
                return settle(variant.launch_synchronously(backends, space, body)?);
            }
            Err(err) => return Err(err),
        };

        match variant.launch(backends, space, body) {
            Ok(Launch::Pending(handle)) => Ok(Issued::Pending(slot, handle)),
            Ok(Launch::Complete { elapsed }) => {
                self.pool.release(slot)?;
                Ok(Issued::Finished(elapsed))
            }
            Err(err) => {
                self.pool.release(slot)?;
                Err(err)
            }
        }
    }

    fn report(&self, context: &RegionContext, elapsed: Duration) {
        self.stats.lock().policies[context.policy_index].record(elapsed);
        self.model
            .lock()
            .observe(&context.features, context.policy_index, elapsed);
    }
}

/// Turn a launch that must not outlive the call into a finished sample.
fn settle(launch: Launch) -> KernelResult<Issued> {
    match launch {
        Launch::Complete { elapsed } => Ok(Issued::Finished(elapsed)),
        Launch::Pending(handle) => match handle.wait_outcome() {
            LaunchOutcome::Completed { elapsed } => Ok(Issued::Finished(elapsed)),
            LaunchOutcome::Failed(message) => Err(KernelError::backend(Backend::Device, message)),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    use kernport_policy::Mode;

    use super::*;
    use crate::model::{FixedModel, ModelKind};
    use crate::segment::Index;

    const ASYNC: ExecutionPolicy = ExecutionPolicy::Device {
        block_size: 32,
        mode: Mode::Async,
    };

    fn config() -> KernelConfig {
        KernelConfig {
            host_threads: Some(2),
            device_compute_units: Some(2),
            ..KernelConfig::default()
        }
    }

    fn region(policies: &[ExecutionPolicy], config: &KernelConfig) -> Region {
        Region::new(CallSite::named("region-test"), policies, ModelKind::MeanTime.build(), config).unwrap()
    }

    fn noop() -> LoopBody {
        Arc::new(|_: &[Index]| {})
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let err = Region::new(CallSite::named("empty"), &[], ModelKind::MeanTime.build(), &config())
            .err()
            .unwrap();
        assert!(matches!(err, KernelError::EmptyPolicyList(_)));
    }

    #[test]
    fn cold_start_uses_first_candidate() {
        let config = config();
        let backends = Backends::new(&config).unwrap();
        let region = region(
            &[ExecutionPolicy::Threaded { min_chunk: 1 }, ExecutionPolicy::Sequential],
            &config,
        );
        let space = IterationSpace::from_extents(&[16]).unwrap();

        let first = region.invoke(&backends, &[], &space, &noop()).unwrap();
        assert_eq!(first.policy_index, 0);
        assert!(!first.pending);
        assert_eq!(region.stats().get(0).unwrap().samples, 1);
    }

    #[test]
    fn round_robin_warmup_cycles_candidates() {
        let config = KernelConfig {
            warmup: WarmupStrategy::RoundRobin,
            warmup_samples: 100,
            ..config()
        };
        let backends = Backends::new(&config).unwrap();
        let region = region(
            &[
                ExecutionPolicy::Sequential,
                ExecutionPolicy::Threaded { min_chunk: 1 },
                ExecutionPolicy::Threaded { min_chunk: 4 },
            ],
            &config,
        );
        let space = IterationSpace::from_extents(&[8]).unwrap();

        let picks: Vec<usize> = (0..6)
            .map(|_| region.invoke(&backends, &[], &space, &noop()).unwrap().policy_index)
            .collect();
        assert_eq!(picks, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "policy model picked candidate 5 of 2")]
    fn out_of_range_model_choice_panics() {
        let config = KernelConfig {
            warmup_samples: 0,
            ..config()
        };
        let backends = Backends::new(&config).unwrap();
        let region = Region::new(
            CallSite::named("broken-model"),
            &[ExecutionPolicy::Sequential, ExecutionPolicy::Threaded { min_chunk: 1 }],
            Box::new(FixedModel::new(5)),
            &config,
        )
        .unwrap();
        let space = IterationSpace::from_extents(&[4]).unwrap();
        let _ = region.invoke(&backends, &[], &space, &noop());
    }

    #[test]
    fn async_feedback_arrives_on_a_later_call() {
        let config = config();
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ASYNC], &config);
        let space = IterationSpace::from_extents(&[100]).unwrap();

        let dispatch = region.invoke(&backends, &[], &space, &noop()).unwrap();
        assert!(dispatch.pending);
        assert_eq!(region.stats().total_samples(), 0);

        backends.device().synchronize();
        assert_eq!(region.drain().unwrap(), 1);
        assert_eq!(region.in_flight(), 0);
        assert_eq!(region.stats().total_samples(), 1);
        assert_eq!(region.drain().unwrap(), 0);
    }

    #[test]
    fn exhausted_pool_fails_without_blocking() {
        let config = KernelConfig {
            pool_capacity: 1,
            ..config()
        };
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ASYNC], &config);
        let space = IterationSpace::from_extents(&[10]).unwrap();

        let (gate, wait) = mpsc::channel::<()>();
        let wait = Arc::new(Mutex::new(wait));
        let body: LoopBody = Arc::new(move |idx: &[Index]| {
            if idx[0] == 0 {
                let _ = wait.lock().recv();
            }
        });

        assert!(region.invoke(&backends, &[], &space, &body).unwrap().pending);
        let err = region.invoke(&backends, &[], &space, &noop()).unwrap_err();
        assert!(err.is_pool_exhausted());
        assert_eq!(region.in_flight(), 1);

        gate.send(()).unwrap();
        backends.device().synchronize();
        assert!(region.invoke(&backends, &[], &space, &noop()).unwrap().pending);
        backends.device().synchronize();
        region.drain().unwrap();
        assert_eq!(region.stats().total_samples(), 2);
    }

    #[test]
    fn pending_async_candidate_is_not_picked_again_while_exploring() {
        let config = KernelConfig {
            warmup_samples: 0,
            pool_capacity: 2,
            ..config()
        };
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ASYNC, ExecutionPolicy::Sequential], &config);
        let space = IterationSpace::from_extents(&[10]).unwrap();

        let (gate, wait) = mpsc::channel::<()>();
        let wait = Arc::new(Mutex::new(wait));
        let gated: LoopBody = Arc::new(move |idx: &[Index]| {
            if idx[0] == 0 {
                let _ = wait.lock().recv();
            }
        });

        let first = region.invoke(&backends, &[], &space, &gated).unwrap();
        assert_eq!(first.policy_index, 0);
        assert!(first.pending);
        assert_eq!(region.pool().pending_by_candidate(2), [1, 0]);

        let second = region.invoke(&backends, &[], &space, &noop()).unwrap();
        assert_eq!(second.policy_index, 1);
        let third = region.invoke(&backends, &[], &space, &noop()).unwrap();
        assert_eq!(third.policy_index, 1);
        assert_eq!(region.in_flight(), 1);

        gate.send(()).unwrap();
        backends.device().synchronize();
        assert_eq!(region.drain().unwrap(), 1);
        assert_eq!(region.stats().get(0).unwrap().samples, 1);
    }

    #[test]
    fn exhausted_pool_can_degrade_to_synchronous() {
        let config = KernelConfig {
            pool_capacity: 1,
            on_pool_exhausted: ExhaustionPolicy::Synchronous,
            ..config()
        };
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ASYNC], &config);
        let space = IterationSpace::from_extents(&[10]).unwrap();

        let (gate, wait) = mpsc::channel::<()>();
        let wait = Arc::new(Mutex::new(wait));
        let gated: LoopBody = Arc::new(move |idx: &[Index]| {
            if idx[0] == 0 {
                let _ = wait.lock().recv();
            }
        });
        assert!(region.invoke(&backends, &[], &space, &gated).unwrap().pending);

        // The stream is in order, so the synchronous launch needs the gate open.
        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            gate.send(()).unwrap();
        });
        let second = region.invoke(&backends, &[], &space, &noop()).unwrap();
        opener.join().unwrap();

        assert!(!second.pending);
        assert_eq!(region.stats().total_samples(), 1);
    }

    #[test]
    fn failed_async_launch_frees_slot_and_reports_nothing() {
        let config = config();
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ASYNC], &config);
        let space = IterationSpace::from_extents(&[10]).unwrap();

        let bad: LoopBody = Arc::new(|idx: &[Index]| assert!(idx[0] != 3, "lane 3 faulted"));
        assert!(region.invoke(&backends, &[], &space, &bad).unwrap().pending);
        backends.device().synchronize();

        let err = region.drain().unwrap_err();
        assert!(matches!(err, KernelError::BackendFailure { backend: Backend::Device, .. }));
        assert_eq!(region.in_flight(), 0);
        let stats = region.stats();
        assert_eq!(stats.total_samples(), 0);
        assert_eq!(stats.get(0).unwrap().failures, 1);
    }

    #[test]
    fn failed_sync_launch_reports_nothing() {
        let config = config();
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ExecutionPolicy::Sequential], &config);
        let space = IterationSpace::from_extents(&[4]).unwrap();

        let bad: LoopBody = Arc::new(|_: &[Index]| panic!("always"));
        assert!(region.invoke(&backends, &[], &space, &bad).is_err());
        assert_eq!(region.stats().total_samples(), 0);
        assert_eq!(region.pool().free(), region.pool().capacity());
    }

    #[test]
    fn variants_instantiate_once() {
        let config = config();
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ExecutionPolicy::Sequential, ExecutionPolicy::Threaded { min_chunk: 2 }], &config);
        let space = IterationSpace::from_extents(&[4]).unwrap();

        let first = region.variant(1, &backends).unwrap();
        let again = region.variant(1, &backends).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        for _ in 0..3 {
            region.invoke(&backends, &[], &space, &noop()).unwrap();
        }
        let stats = region.stats();
        assert_eq!(stats.variants.len(), 2);
        assert_eq!(stats.invocations, 3);
    }

    #[test]
    fn plugins_see_each_launch() {
        struct Counting(AtomicUsize, AtomicUsize);
        impl KernelPlugin for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn pre_launch(&self, _ctx: &PluginContext<'_>) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
            fn post_launch(&self, _ctx: &PluginContext<'_>) {
                self.1.fetch_add(1, Ordering::Relaxed);
            }
        }

        let config = config();
        let backends = Backends::new(&config).unwrap();
        let region = region(&[ExecutionPolicy::Sequential], &config);
        let space = IterationSpace::from_extents(&[4]).unwrap();
        let counting = Arc::new(Counting(AtomicUsize::new(0), AtomicUsize::new(0)));
        let plugins = vec![Arc::clone(&counting) as Arc<dyn KernelPlugin>];

        for _ in 0..4 {
            region.invoke(&backends, &plugins, &space, &noop()).unwrap();
        }
        assert_eq!(counting.0.load(Ordering::Relaxed), 4);
        assert_eq!(counting.1.load(Ordering::Relaxed), 4);
    }
}
