// Shared test-only tracing init, mirroring the binary entry point's
// `tracing_subscriber::fmt()...init()` call since the integration tests have
// no binary target of their own to run it from.

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_test_writer()
        .try_init();
}
