//! Function-profiler capability (§9 redesign note: "abstract the profiler
//! as a capability `{start, stop, snapshot}` whose absence disables
//! function-profiling cleanly; never branch on library names").

use std::sync::OnceLock;

use apm_common::model::FunctionSample;

/// A function-level profiler capability. Implementations are supplied by
/// the host application (or a platform-specific crate it depends on); the
/// collector never references a concrete profiler by name.
pub trait FunctionProfiler: Send {
    fn start(&mut self);
    fn stop(&mut self);
    /// Per-function wall-time samples collected since `start`.
    fn snapshot(&self) -> Vec<FunctionSample>;
}

/// Factory for constructing a fresh profiler instance per request.
pub trait FunctionProfilerFactory: Send + Sync {
    fn create(&self) -> Box<dyn FunctionProfiler>;
}

impl<F> FunctionProfilerFactory for F
where
    F: Fn() -> Box<dyn FunctionProfiler> + Send + Sync,
{
    fn create(&self) -> Box<dyn FunctionProfiler> {
        self()
    }
}

static FACTORY: OnceLock<Box<dyn FunctionProfilerFactory>> = OnceLock::new();

/// Register the host's profiler factory. Must be called at most once,
/// typically during host application bootstrap; later calls are ignored.
/// If never called, the profiling extension is considered unavailable and
/// function-profiling is disabled cleanly (§4.2 entry: "starts the
/// function profiler if enabled and the profiling extension is available,
/// otherwise continues silently").
pub fn register_profiler_factory(factory: Box<dyn FunctionProfilerFactory>) {
    let _ = FACTORY.set(factory);
}

/// Create a fresh profiler instance if the host has registered a factory.
#[must_use]
pub fn try_create() -> Option<Box<dyn FunctionProfiler>> {
    FACTORY.get().map(|f| f.create())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProfiler;
    impl FunctionProfiler for NoopProfiler {
        fn start(&mut self) {}
        fn stop(&mut self) {}
        fn snapshot(&self) -> Vec<FunctionSample> {
            vec![]
        }
    }

    #[test]
    fn absent_factory_yields_none() {
        // No registration happens in this test process; absence must be
        // handled cleanly rather than panicking.
        if FACTORY.get().is_none() {
            assert!(try_create().is_none());
        }
    }

    #[test]
    fn factory_closure_builds_profiler() {
        let factory: Box<dyn FunctionProfilerFactory> =
            Box::new(|| Box::new(NoopProfiler) as Box<dyn FunctionProfiler>);
        let profiler = factory.create();
        assert!(profiler.snapshot().is_empty());
    }
}
