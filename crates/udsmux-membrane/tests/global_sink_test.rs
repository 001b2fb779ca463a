//! Integration test: process-wide log sink and configuration override.
//!
//! Both share global state, so everything runs inside one test.

use std::time::Duration;

use udsmux_membrane::config::{
    LogSink, TransportConfig, WaitTimeout, configured_batch_capacity, configured_staging_capacity,
    configured_wait_timeout, set_transport_config, transport_config,
};
use udsmux_membrane::structured_log::{
    LogEmitter, LogLevel, enabled, install_global_emitter, log_event, reset_global_sink,
    validate_log_line,
};

#[test]
fn global_sink_honours_threshold_and_override() {
    let config = TransportConfig::default()
        .with_staging_capacity(512)
        .with_batch_capacity(7)
        .with_wait_timeout(WaitTimeout::After(Duration::from_millis(40)))
        .with_log(LogSink::Off, LogLevel::Info);
    set_transport_config(config.clone());
    assert_eq!(transport_config(), config);
    assert_eq!(configured_staging_capacity(), 512);
    assert_eq!(configured_batch_capacity(), 7);
    assert_eq!(
        configured_wait_timeout(),
        WaitTimeout::After(Duration::from_millis(40))
    );

    // Configured sink is off: nothing is enabled and fill closures never run.
    assert!(!enabled(LogLevel::Error));
    log_event(LogLevel::Error, "never_written", |_| {
        panic!("fill must not run while logging is off")
    });

    let (emitter, buffer) = LogEmitter::to_buffer("udsmux", "it");
    install_global_emitter(emitter, LogLevel::Info);
    assert!(enabled(LogLevel::Warn));
    assert!(!enabled(LogLevel::Debug));

    log_event(LogLevel::Debug, "filtered", |e| e);
    log_event(LogLevel::Warn, "connect_failed", |e| {
        e.with_op("connect").with_handle(3).with_errno(111)
    });

    let text = buffer.contents();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1, "debug record must be filtered: {text}");
    let entry = validate_log_line(lines[0], 1).expect("global sink writes schema-valid lines");
    assert_eq!(entry.event, "connect_failed");
    assert_eq!(entry.trace_id, "udsmux::it::001");
    assert_eq!(entry.errno, Some(111));

    // Resetting reopens from configuration, which is still `off`.
    reset_global_sink();
    assert!(!enabled(LogLevel::Error));
    log_event(LogLevel::Error, "still_off", |_| {
        panic!("fill must not run after the sink resolved to off")
    });

    // An override takes effect on the lock-free accessors immediately.
    set_transport_config(config.with_staging_capacity(64));
    assert_eq!(configured_staging_capacity(), 64);
    assert_eq!(configured_wait_timeout(), WaitTimeout::After(Duration::from_millis(40)));
}
