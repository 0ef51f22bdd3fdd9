use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
}

/// Wall-clock timings for named phases, in the order they ran.
#[derive(Debug, Default)]
pub struct Profiler {
    phases: Vec<PhaseTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_phase<T, F>(&mut self, name: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = f();
        self.push_phase(name, start.elapsed());
        result
    }

    pub fn push_phase(&mut self, name: &str, duration: Duration) {
        self.phases.push(PhaseTiming {
            name: name.to_string(),
            duration,
        });
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|phase| phase.duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_keep_their_order() {
        let mut profiler = Profiler::new();
        let value = profiler.record_phase("setup", || 7);
        profiler.push_phase("skipped", Duration::ZERO);

        assert_eq!(value, 7);
        let names: Vec<_> = profiler.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["setup", "skipped"]);
        assert_eq!(profiler.total(), profiler.phases()[0].duration);
    }
}
