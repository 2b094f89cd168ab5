// tests/common/mod.rs

#![allow(dead_code)]

use rundag::exec::completion_channel;
use rundag::TaskManager;
use rundag_test_utils::{envelope, ManualBackend};

/// Install a test tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
}

/// A manager wired to a [`ManualBackend`]; the returned clone drives
/// completions from the test.
pub fn manual_manager(cores: f64, memory: &str) -> (TaskManager<ManualBackend>, ManualBackend) {
    let (tx, rx) = completion_channel();
    let backend = ManualBackend::new(tx);
    let driver = backend.clone();
    (
        TaskManager::with_backend(envelope(cores, memory), backend, rx),
        driver,
    )
}
