use std::sync::Arc;

use ahash::AHashMap;
use kernport_policy::ExecutionPolicy;
use parking_lot::RwLock;
use tracing::debug;

use crate::adaptive::{CallSite, Dispatch, Region, RegionStats};
use crate::backend::Backends;
use crate::backend::device::StreamMetricsSnapshot;
use crate::config::KernelConfig;
use crate::dispatch::LoopBody;
use crate::error::{KernelError, KernelResult};
use crate::model::ModelFactory;
use crate::plugin::{self, KernelPlugin};
use crate::segment::{Index, IterationSpace};

/// Entry point for adaptive kernels: owns the backends and one [`Region`]
/// per call site.
pub struct KernelRegistry {
    config: KernelConfig,
    backends: Backends,
    models: ModelFactory,
    regions: RwLock<AHashMap<CallSite, Arc<Region>>>,
    plugins: RwLock<Vec<Arc<dyn KernelPlugin>>>,
}

impl KernelRegistry {
    pub fn new(config: KernelConfig) -> KernelResult<Self> {
        config.validate()?;
        let backends = Backends::new(&config)?;
        let plugins = if config.plugins {
            plugin::registered_plugins()
        } else {
            Vec::new()
        };
        debug!(plugins = plugins.len(), model = %config.model, "kernel registry ready");

        Ok(Self {
            models: config.model.factory(),
            config,
            backends,
            regions: RwLock::new(AHashMap::new()),
            plugins: RwLock::new(plugins),
        })
    }

    /// Use `factory` for regions created from now on.
    #[must_use]
    pub fn with_model_factory(mut self, factory: ModelFactory) -> Self {
        self.models = factory;
        self
    }

    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub const fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Run `body` over `space` under one of `policies`, keyed on the caller's
    /// source location.
    #[track_caller]
    pub fn forall<F>(&self, policies: &[ExecutionPolicy], space: &IterationSpace, body: F) -> KernelResult<Dispatch>
    where
        F: Fn(&[Index]) + Send + Sync + 'static,
    {
        self.invoke(CallSite::caller(), policies, space, body)
    }

    /// Run `body` over `space` under one of `policies` for the region at
    /// `call_site`.
    ///
    /// Synchronous choices return after the loop has finished. Asynchronous
    /// ones return once the kernel is queued; their timing is collected by a
    /// later `invoke` or [`drain`](Self::drain) on the same region.
    pub fn invoke<F>(
        &self,
        call_site: CallSite,
        policies: &[ExecutionPolicy],
        space: &IterationSpace,
        body: F,
    ) -> KernelResult<Dispatch>
    where
        F: Fn(&[Index]) + Send + Sync + 'static,
    {
        let body: LoopBody = Arc::new(body);
        self.invoke_shared(call_site, policies, space, &body)
    }

    pub fn invoke_shared(
        &self,
        call_site: CallSite,
        policies: &[ExecutionPolicy],
        space: &IterationSpace,
        body: &LoopBody,
    ) -> KernelResult<Dispatch> {
        let region = self.region(call_site, policies)?;
        let plugins = self.plugins.read().clone();
        region.invoke(&self.backends, &plugins, space, body)
    }

    /// The region for `call_site`, created on first use.
    pub fn region(&self, call_site: CallSite, policies: &[ExecutionPolicy]) -> KernelResult<Arc<Region>> {
        if policies.is_empty() {
            return Err(KernelError::EmptyPolicyList(call_site));
        }
        if let Some(region) = self.regions.read().get(&call_site) {
            return matching(region, policies);
        }

        let mut regions = self.regions.write();
        if let Some(region) = regions.get(&call_site) {
            return matching(region, policies);
        }
        let model = (self.models)(call_site, policies.len());
        let region = Arc::new(Region::new(call_site, policies, model, &self.config)?);
        regions.insert(call_site, Arc::clone(&region));
        Ok(region)
    }

    pub fn region_stats(&self, call_site: CallSite) -> Option<RegionStats> {
        self.regions.read().get(&call_site).map(|region| region.stats())
    }

    /// Statistics for every region, ordered by call site.
    pub fn all_stats(&self) -> Vec<RegionStats> {
        let mut stats: Vec<_> = self.regions.read().values().map(|region| region.stats()).collect();
        stats.sort_by_key(|stats| stats.call_site);
        stats
    }

    pub fn in_flight(&self, call_site: CallSite) -> usize {
        self.regions
            .read()
            .get(&call_site)
            .map_or(0, |region| region.in_flight())
    }

    pub fn regions(&self) -> Vec<CallSite> {
        let mut sites: Vec<_> = self.regions.read().keys().copied().collect();
        sites.sort_unstable();
        sites
    }

    /// Collect finished async launches in every region without blocking.
    ///
    /// Every region is drained even if one reports a failure; the first
    /// failure is returned.
    pub fn drain(&self) -> KernelResult<usize> {
        let regions: Vec<_> = self.regions.read().values().cloned().collect();
        let mut collected = 0;
        let mut failure = None;
        for region in regions {
            match region.drain() {
                Ok(count) => collected += count,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        failure.map_or(Ok(collected), Err)
    }

    /// Block until the device stream is idle.
    pub fn synchronize(&self) {
        self.backends.device().synchronize();
    }

    pub fn add_plugin(&self, plugin: Arc<dyn KernelPlugin>) {
        debug!(plugin = plugin.name(), "plugin added");
        self.plugins.write().push(plugin);
    }

    pub fn device_metrics(&self) -> StreamMetricsSnapshot {
        self.backends.device().metrics()
    }
}

fn matching(region: &Arc<Region>, policies: &[ExecutionPolicy]) -> KernelResult<Arc<Region>> {
    if region.policies() == policies {
        Ok(Arc::clone(region))
    } else {
        Err(KernelError::PolicyListMismatch {
            call_site: region.call_site(),
            expected: region.policies().to_vec(),
            found: policies.to_vec(),
        })
    }
}
