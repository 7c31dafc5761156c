use crate::event::{read_event, Event};
use crate::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::getppid;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_PROCESS_NAME: &str = "openclaw-node";

const READY: &[u8] = b"READY\n";
const RESULT_OK: &[u8] = b"RESULT 2\nOK";

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// The supervisor is stopped when a process with exactly this name exits.
    pub process_name: String,
}

impl ListenerConfig {
    pub fn new(process_name: impl Into<String>) -> Self {
        ListenerConfig {
            process_name: process_name.into(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig::new(DEFAULT_PROCESS_NAME)
    }
}

/// Handle used by [`Listener`] to bring the supervisor down.
pub trait Supervisor {
    fn stop(&mut self) -> nix::Result<()>;
}

impl<T: Supervisor + ?Sized> Supervisor for &mut T {
    fn stop(&mut self) -> nix::Result<()> {
        (**self).stop()
    }
}

/// The supervisor is whichever process spawned us.
///
/// The parent pid is looked up on every call rather than at startup,
/// if the supervisor has already gone away we will be reparented and `kill` reports the failure.
#[derive(Debug, Default)]
pub struct ParentProcess;

impl Supervisor for ParentProcess {
    fn stop(&mut self) -> nix::Result<()> {
        let parent = getppid();
        tracing::debug!("sending SIGTERM to parent process {parent}");
        kill(parent, Signal::SIGTERM)
    }
}

/// Runs the listener side of the event protocol over `input`/`output`.
///
/// `diagnostics` receives a single human readable line whenever the watched process exits,
/// supervisord usually routes it into the listener's stderr log.
pub struct Listener<R, W, E, S> {
    config: ListenerConfig,
    input: R,
    output: W,
    diagnostics: E,
    supervisor: S,
}

impl<R, W, E, S> Listener<R, W, E, S>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
    S: Supervisor,
{
    pub fn new(config: ListenerConfig, input: R, output: W, diagnostics: E, supervisor: S) -> Self {
        Listener {
            config,
            input,
            output,
            diagnostics,
            supervisor,
        }
    }

    /// Processes events until the supervisor closes `input`.
    ///
    /// Any malformed event is returned as an error straight away without being acknowledged,
    /// since we can no longer tell where the next event starts.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.write_output(READY).await?;

            let Some(event) = read_event(&mut self.input).await? else {
                tracing::info!("supervisor closed the event stream, shutting down");
                return Ok(());
            };
            tracing::debug!(
                "received {} for process {:?}",
                event.event_name().unwrap_or("?"),
                event.process_name()
            );

            self.handle(&event).await?;

            self.write_output(RESULT_OK).await?;
        }
    }

    async fn handle(&mut self, event: &Event) -> Result<()> {
        if event.process_name() != self.config.process_name {
            return Ok(());
        }

        let line = format!(
            "[kill-supervisor] {} exited (event={}), stopping supervisord\n",
            self.config.process_name,
            event.event_name().unwrap_or("?")
        );
        self.diagnostics.write_all(line.as_bytes()).await?;
        self.diagnostics.flush().await?;

        if let Err(err) = self.supervisor.stop() {
            // The supervisor is most likely already on its way out.
            tracing::warn!("failed to signal the supervisor to stop: {err}");
        }
        Ok(())
    }

    async fn write_output(&mut self, message: &[u8]) -> Result<()> {
        self.output.write_all(message).await?;
        self.output.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use nix::errno::Errno;

    #[derive(Default)]
    struct RecordingSupervisor {
        stops: usize,
        fail_with: Option<Errno>,
    }

    impl Supervisor for RecordingSupervisor {
        fn stop(&mut self) -> nix::Result<()> {
            self.stops += 1;
            match self.fail_with {
                Some(errno) => Err(errno),
                None => Ok(()),
            }
        }
    }

    struct Run {
        result: Result<()>,
        output: String,
        diagnostics: String,
        stops: usize,
    }

    async fn run_listener(config: ListenerConfig, input: &[u8], supervisor: RecordingSupervisor) -> Run {
        let mut output = vec![];
        let mut diagnostics = vec![];
        let mut supervisor = supervisor;
        let result = Listener::new(config, input, &mut output, &mut diagnostics, &mut supervisor)
            .run()
            .await;
        Run {
            result,
            output: String::from_utf8(output).unwrap(),
            diagnostics: String::from_utf8(diagnostics).unwrap(),
            stops: supervisor.stops,
        }
    }

    fn event(header: &str, payload: &str) -> String {
        if payload.is_empty() {
            format!("{header}\n")
        } else {
            format!("{header} len:{}\n{payload}", payload.len())
        }
    }

    #[tokio::test]
    async fn test_watched_process_exit_stops_supervisor() {
        let input = event(
            "eventname:PROCESS_STATE_EXITED",
            "processname:openclaw-node groupname:openclaw-node from_state:RUNNING",
        );
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 1);
        assert_eq!(
            run.diagnostics,
            "[kill-supervisor] openclaw-node exited (event=PROCESS_STATE_EXITED), stopping supervisord\n"
        );
        assert_eq!(run.output, "READY\nRESULT 2\nOKREADY\n");
    }

    #[tokio::test]
    async fn test_other_process_exit_is_ignored() {
        let input = event(
            "eventname:PROCESS_STATE_EXITED",
            "processname:other-service groupname:other-service",
        );
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 0);
        assert_eq!(run.diagnostics, "");
        assert_eq!(run.output, "READY\nRESULT 2\nOKREADY\n");
    }

    #[tokio::test]
    async fn test_event_without_payload_is_ignored() {
        let input = event("eventname:PROCESS_STATE_EXITED len:0", "");
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 0);
        assert_eq!(run.diagnostics, "");
        assert_eq!(run.output, "READY\nRESULT 2\nOKREADY\n");
    }

    #[tokio::test]
    async fn test_missing_event_name() {
        let input = event("ver:3.0", "processname:openclaw-node");
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 1);
        assert_eq!(
            run.diagnostics,
            "[kill-supervisor] openclaw-node exited (event=?), stopping supervisord\n"
        );
    }

    #[tokio::test]
    async fn test_process_name_must_match_exactly() {
        let input = [
            event("eventname:PROCESS_STATE_EXITED", "processname:openclaw-node-2"),
            event("eventname:PROCESS_STATE_EXITED", "processname:openclaw"),
            event("eventname:PROCESS_STATE_EXITED", "groupname:openclaw-node"),
        ]
        .concat();
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 0);
        assert_eq!(run.output, "READY\nRESULT 2\nOK".repeat(3) + "READY\n");
    }

    #[tokio::test]
    async fn test_configured_process_name() {
        let input = [
            event("eventname:PROCESS_STATE_EXITED", "processname:openclaw-node"),
            event("eventname:PROCESS_STATE_FATAL", "processname:gateway"),
        ]
        .concat();
        let run = run_listener(ListenerConfig::new("gateway"), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 1);
        assert_eq!(
            run.diagnostics,
            "[kill-supervisor] gateway exited (event=PROCESS_STATE_FATAL), stopping supervisord\n"
        );
    }

    #[tokio::test]
    async fn test_every_matching_event_stops_supervisor() {
        let input = [
            event("eventname:PROCESS_STATE_EXITED", "processname:openclaw-node"),
            event("eventname:TICK_5 len:0", ""),
            event("eventname:PROCESS_STATE_EXITED", "processname:openclaw-node"),
        ]
        .concat();
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.stops, 2);
        assert_eq!(run.diagnostics.lines().count(), 2);
        assert_eq!(run.output, "READY\nRESULT 2\nOK".repeat(3) + "READY\n");
    }

    #[tokio::test]
    async fn test_failed_stop_still_acknowledges() {
        let input = event("eventname:PROCESS_STATE_EXITED", "processname:openclaw-node");
        let supervisor = RecordingSupervisor {
            fail_with: Some(Errno::ESRCH),
            ..Default::default()
        };
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), supervisor).await;

        run.result.unwrap();
        assert_eq!(run.stops, 1);
        assert_eq!(run.output, "READY\nRESULT 2\nOKREADY\n");
    }

    #[tokio::test]
    async fn test_malformed_header_fails_without_acknowledging() {
        let input = [
            event("eventname:TICK_5 len:0", ""),
            "eventname:PROCESS_STATE_EXITED PROCESS_STATE_EXITED\n".to_owned(),
            event("eventname:PROCESS_STATE_EXITED", "processname:openclaw-node"),
        ]
        .concat();
        let run = run_listener(ListenerConfig::default(), input.as_bytes(), Default::default()).await;

        let err = run.result.unwrap_err();
        assert!(matches!(err, Error::MalformedToken { .. }), "{err:?}");
        assert_eq!(run.stops, 0);
        assert_eq!(run.output, "READY\nRESULT 2\nOKREADY\n");
    }

    #[tokio::test]
    async fn test_closed_input() {
        let run = run_listener(ListenerConfig::default(), b"", Default::default()).await;

        run.result.unwrap();
        assert_eq!(run.output, "READY\n");
    }
}
