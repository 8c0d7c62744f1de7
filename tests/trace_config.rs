//! Trace-capacity configuration, in its own binary because the
//! configuration installs process-wide exactly once.

use promitto::test_utils::init_test_logging;
use promitto::{install_trace_config, new_promise, ConfigError, TraceConfig, Value};

#[test]
fn installed_capacity_bounds_every_holder() {
    init_test_logging();
    install_trace_config(TraceConfig::new().with_capacity(4)).expect("first install succeeds");

    let chain = new_promise(|defer| defer.resolve(0_u8));
    for _ in 0..32 {
        chain.then(|value: Value| value);
    }
    assert!(chain.call_stack().len() <= 4);

    // The configuration is immutable once installed.
    assert_eq!(
        install_trace_config(TraceConfig::new().with_capacity(64)),
        Err(ConfigError::AlreadyInstalled)
    );
}
