//! Bridges the process's real stdin/stdout.
//!
//! Redirecting descriptors 0 and 1 is process-global, so this binary holds
//! exactly one test.

use std::sync::Arc;
use std::time::Duration;

use uci_host_core::{EngineHost, HarnessError, HostConfig, IoBridge, StdioSlots};
use uci_host_test_utils::{CallLog, StubLoader, drain_until_contains};

#[test]
fn process_stdio_is_bridged_once_and_restored() {
    let log = CallLog::new();
    let host = EngineHost::new(HostConfig::new("libstub.so"));
    assert_eq!(host.config().stdio, StdioSlots::PROCESS);

    host.bind(&StubLoader::new(StdioSlots::PROCESS, Arc::clone(&log)))
        .unwrap();
    host.initialize(&[]).unwrap();

    // A second bridge on the same descriptors is refused.
    let err = IoBridge::install(StdioSlots::PROCESS).unwrap_err();
    assert!(
        matches!(err, HarnessError::PipeSetup { stage: "claim process stdio", .. }),
        "got {err:?}"
    );

    host.send_command("isready").unwrap();
    host.send_command("quit").unwrap();
    std::thread::scope(|s| {
        let runner = s.spawn(|| host.run_loop(&[]));
        let text = drain_until_contains(&host, "readyok\n", Duration::from_secs(5));
        assert_eq!(text, "readyok\n");
        runner.join().unwrap().unwrap();
    });
    host.shutdown().unwrap();

    assert_eq!(log.received(), b"isready\nquit\n".to_vec());

    // Teardown released the claim.
    let bridge = IoBridge::install(StdioSlots::PROCESS).unwrap();
    bridge.teardown(Duration::from_secs(5));
}
