use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global fmt subscriber. Filter comes from `KERNPORT_LOG`, then
/// `RUST_LOG`, defaulting to `warn`. Later calls are no-ops.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("KERNPORT_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
