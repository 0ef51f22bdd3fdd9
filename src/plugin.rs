//! Launch plugins: hooks run around every kernel launch.
//!
//! Plugins compiled into the binary announce themselves with
//! `inventory::submit!` and a [`PluginRegistration`]; the registry loads them
//! when `plugins` is enabled in the configuration. Others can be added at
//! runtime through `KernelRegistry::add_plugin`.

use std::fmt;
use std::sync::Arc;

use kernport_policy::ExecutionPolicy;
use tracing::trace;

use crate::adaptive::{CallSite, FeatureVector};

/// What a plugin sees about a launch.
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    pub call_site: CallSite,
    pub invocation: u64,
    pub policy_index: usize,
    pub policy: ExecutionPolicy,
    pub features: &'a FeatureVector,
    /// Set on `post_launch` when the work was enqueued rather than finished.
    pub pending: bool,
}

pub trait KernelPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn pre_launch(&self, _ctx: &PluginContext<'_>) {}

    fn post_launch(&self, _ctx: &PluginContext<'_>) {}
}

impl fmt::Debug for dyn KernelPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KernelPlugin").field(&self.name()).finish()
    }
}

/// Static plugin registration collected across the binary.
pub struct PluginRegistration {
    pub name: &'static str,
    pub create: fn() -> Box<dyn KernelPlugin>,
}

inventory::collect!(PluginRegistration);

/// Instantiate every statically registered plugin.
pub fn registered_plugins() -> Vec<Arc<dyn KernelPlugin>> {
    inventory::iter::<PluginRegistration>
        .into_iter()
        .map(|registration| {
            trace!(plugin = registration.name, "loading plugin");
            Arc::from((registration.create)())
        })
        .collect()
}

/// Logs every launch at trace level.
#[derive(Debug, Default)]
pub struct TraceLaunches;

impl KernelPlugin for TraceLaunches {
    fn name(&self) -> &str {
        "trace-launches"
    }

    fn pre_launch(&self, ctx: &PluginContext<'_>) {
        trace!(
            call_site = %ctx.call_site,
            invocation = ctx.invocation,
            policy = %ctx.policy,
            features = ?ctx.features.as_slice(),
            "launch"
        );
    }

    fn post_launch(&self, ctx: &PluginContext<'_>) {
        trace!(
            call_site = %ctx.call_site,
            invocation = ctx.invocation,
            pending = ctx.pending,
            "launched"
        );
    }
}

fn trace_launches() -> Box<dyn KernelPlugin> {
    Box::new(TraceLaunches)
}

inventory::submit! {
    PluginRegistration {
        name: "trace-launches",
        create: trace_launches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_plugin_is_registered() {
        let plugins = registered_plugins();
        assert!(plugins.iter().any(|plugin| plugin.name() == "trace-launches"));
    }
}
