//! Async view of the Output Channel for hosts that live on a tokio runtime.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::bridge::OutputChunk;
use crate::lifecycle::{EngineHost, LifecycleState};

/// Poll `host.get_output()` every `poll_interval` and yield each chunk.
///
/// Every available chunk is drained before the next tick. The stream ends
/// once the host reaches shut down or output can no longer be drained.
/// Bytes still in flight at shutdown are returned by
/// [`EngineHost::shutdown_and_collect`], not by this stream.
pub fn output_stream(
    host: Arc<EngineHost>,
    poll_interval: Duration,
) -> Pin<Box<dyn Stream<Item = OutputChunk> + Send>> {
    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            loop {
                match host.get_output() {
                    Ok(Some(chunk)) => yield chunk,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(session_id = %host.session_id(), error = %e, "output stream stopped");
                        return;
                    }
                }
            }
            if host.state() == LifecycleState::ShutDown {
                debug!(session_id = %host.session_id(), "output stream finished");
                break;
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::path::Path;
    use std::sync::Mutex;

    use futures::StreamExt;

    use crate::bridge::StdioSlots;
    use crate::config::{HostConfig, IoRouting};
    use crate::error::BindError;
    use crate::module::{EngineArgs, EngineModule, ModuleLoader};

    #[derive(Default)]
    struct EchoModule {
        outbox: Mutex<Vec<Vec<u8>>>,
    }

    impl EngineModule for EchoModule {
        fn name(&self) -> &str {
            "echo"
        }
        fn initialize(&self, _args: &EngineArgs) {}
        fn run_loop(&self, _args: &EngineArgs) {}
        fn shutdown(&self) {}
        fn get_output(&self) -> Option<Vec<u8>> {
            let mut outbox = self.outbox.lock().unwrap();
            (!outbox.is_empty()).then(|| outbox.remove(0))
        }
        fn send_command(&self, command: &CStr) {
            let mut line = command.to_bytes().to_vec();
            line.push(b'\n');
            self.outbox.lock().unwrap().push(line);
        }
    }

    struct EchoLoader;

    impl ModuleLoader for EchoLoader {
        fn load(&self, _path: &Path) -> Result<Box<dyn EngineModule>, BindError> {
            Ok(Box::new(EchoModule::default()))
        }
    }

    fn echo_host() -> Arc<EngineHost> {
        let config = HostConfig::new("echo.so")
            .with_routing(IoRouting::Module)
            .with_stdio(StdioSlots::new(900_000, 900_001));
        Arc::new(EngineHost::new(config))
    }

    #[tokio::test]
    async fn yields_output_then_ends_at_shutdown() {
        let host = echo_host();
        host.bind(&EchoLoader).unwrap();
        host.initialize(&[]).unwrap();
        host.send_command("uciok").unwrap();
        host.send_command("readyok").unwrap();

        let mut stream = output_stream(Arc::clone(&host), Duration::from_millis(5));
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.text(), "uciok\n");
        assert_eq!(second.text(), "readyok\n");

        host.run_loop(&[]).unwrap();
        host.shutdown().unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn ends_immediately_before_initialize() {
        let host = echo_host();
        let mut stream = output_stream(host, Duration::from_millis(5));
        assert!(stream.next().await.is_none());
    }
}
