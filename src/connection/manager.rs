//! Dispatch worker owning the hub connection and the command stream
//!
//! One spawned task owns the session, the link state, and the consume loop.
//! The foreground holds only channel ends: control requests and commands go
//! in, events come out. The hub runs one program at a time, so the consume
//! loop never dequeues the next command before the previous one has finished.

use crate::command::{build_program, scan_color, HubCommand};
use crate::transport::{HubConnector, HubSession, HubTarget, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Lifecycle of the hub link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Events emitted by the dispatch worker, in emission order
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A session is up
    Connected { hub: String },
    /// A connect attempt failed or was rejected
    ConnectionFailed { reason: String },
    /// The session was torn down
    Disconnected,
    /// A command's program is being shipped to the hub
    Running { command: HubCommand },
    /// A command failed; the session survives unless the link itself died
    CommandFailed { reason: String },
    /// The program output carried a sensor reading
    ColorDetected { color: String },
}

impl std::fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerEvent::Connected { hub } => write!(f, "connected to {hub}"),
            WorkerEvent::ConnectionFailed { reason } => write!(f, "connection failed: {reason}"),
            WorkerEvent::Disconnected => write!(f, "hub disconnected"),
            WorkerEvent::Running { command } => write!(f, "sending {command} to the hub"),
            WorkerEvent::CommandFailed { reason } => write!(f, "command failed: {reason}"),
            WorkerEvent::ColorDetected { color } => write!(f, "color detected: {color}"),
        }
    }
}

/// Configuration for the dispatch worker
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Bound on a connect attempt. `None` waits as long as the transport does.
    pub connect_timeout: Option<Duration>,
    /// Bound on one program execution. `None` (the default) waits for the hub
    /// indefinitely; a timed-out run is reported as a failed command.
    pub run_timeout: Option<Duration>,
}

/// Control requests from the foreground
#[derive(Debug)]
enum WorkerRequest {
    Connect(HubTarget),
    Disconnect,
}

/// Cloneable control surface for the dispatch worker
///
/// All methods are non-blocking and safe to call from any foreground context
/// at any time.
#[derive(Clone)]
pub struct HubController {
    request_tx: mpsc::UnboundedSender<WorkerRequest>,
    command_tx: mpsc::UnboundedSender<HubCommand>,
    state_rx: watch::Receiver<LinkState>,
}

impl HubController {
    /// Ask the worker to open a session against `target`.
    ///
    /// Rejected with a `ConnectionFailed` event if a session is already
    /// active.
    pub fn request_connect(&self, target: HubTarget) {
        let _ = self.request_tx.send(WorkerRequest::Connect(target));
    }

    /// Ask the worker to tear the session down. No-op while idle.
    ///
    /// Cancellation is cooperative: a program already handed to the hub
    /// finishes before teardown.
    pub fn request_disconnect(&self) {
        let _ = self.request_tx.send(WorkerRequest::Disconnect);
    }

    /// Queue a command for the hub.
    ///
    /// Returns `false` when the command was dropped because no session is
    /// active. Never blocks.
    pub fn submit_command(&self, command: HubCommand) -> bool {
        if *self.state_rx.borrow() != LinkState::Connected {
            debug!(%command, "dropping command, no active session");
            return false;
        }
        self.command_tx.send(command).is_ok()
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        *self.state_rx.borrow()
    }
}

/// Handle to the dispatch worker task: the control surface plus the event
/// stream
pub struct HubWorker {
    controller: HubController,
    event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl HubWorker {
    /// Spawn the worker task and return the foreground handle
    pub fn spawn(config: WorkerConfig, connector: Arc<dyn HubConnector>) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);

        tokio::spawn(worker_loop(
            config, connector, request_rx, command_rx, state_tx, event_tx,
        ));

        Self {
            controller: HubController {
                request_tx,
                command_tx,
                state_rx,
            },
            event_rx,
        }
    }

    /// Get a clone of the control surface for use from other tasks
    pub fn controller(&self) -> HubController {
        self.controller.clone()
    }

    pub fn request_connect(&self, target: HubTarget) {
        self.controller.request_connect(target);
    }

    pub fn request_disconnect(&self) {
        self.controller.request_disconnect();
    }

    pub fn submit_command(&self, command: HubCommand) -> bool {
        self.controller.submit_command(command)
    }

    /// Receive the next worker event. Events arrive in emission order.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.event_rx.recv().await
    }

    pub fn link_state(&self) -> LinkState {
        self.controller.link_state()
    }
}

/// Worker task: waits for a connect request, runs the session to completion,
/// returns to idle. Repeats until the handle is dropped.
async fn worker_loop(
    config: WorkerConfig,
    connector: Arc<dyn HubConnector>,
    mut request_rx: mpsc::UnboundedReceiver<WorkerRequest>,
    mut command_rx: mpsc::UnboundedReceiver<HubCommand>,
    state_tx: watch::Sender<LinkState>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Some(request) = request_rx.recv().await {
        let target = match request {
            WorkerRequest::Connect(target) => target,
            WorkerRequest::Disconnect => {
                debug!("disconnect requested while idle, nothing to do");
                continue;
            }
        };

        let _ = state_tx.send(LinkState::Connecting);
        info!(hub = %target.name, transport = connector.name(), "connecting");

        match connect(connector.as_ref(), &target, config.connect_timeout).await {
            Ok(session) => {
                let _ = state_tx.send(LinkState::Connected);
                let _ = event_tx.send(WorkerEvent::Connected {
                    hub: target.name.clone(),
                });

                run_session(
                    session,
                    &config,
                    &mut request_rx,
                    &mut command_rx,
                    &state_tx,
                    &event_tx,
                )
                .await;

                // Leftover commands must not run against a later session
                while command_rx.try_recv().is_ok() {}

                let _ = state_tx.send(LinkState::Idle);
                let _ = event_tx.send(WorkerEvent::Disconnected);
            }
            Err(e) => {
                warn!(hub = %target.name, error = %e, "connect failed");
                let _ = state_tx.send(LinkState::Idle);
                let _ = event_tx.send(WorkerEvent::ConnectionFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!("worker handle dropped, stopping");
}

async fn connect(
    connector: &dyn HubConnector,
    target: &HubTarget,
    limit: Option<Duration>,
) -> Result<Box<dyn HubSession>, TransportError> {
    match limit {
        Some(limit) => match timeout(limit, connector.connect(target)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        },
        None => connector.connect(target).await,
    }
}

/// Consume loop: drain the command queue one command at a time until a
/// disconnect is requested or the link dies.
///
/// The select is biased toward control requests so that once a disconnect has
/// been asked for, no further command is dequeued. A command whose run is
/// already in flight is not preempted; the request is observed on the next
/// loop iteration.
async fn run_session(
    mut session: Box<dyn HubSession>,
    config: &WorkerConfig,
    request_rx: &mut mpsc::UnboundedReceiver<WorkerRequest>,
    command_rx: &mut mpsc::UnboundedReceiver<HubCommand>,
    state_tx: &watch::Sender<LinkState>,
    event_tx: &mpsc::UnboundedSender<WorkerEvent>,
) {
    loop {
        tokio::select! {
            biased;

            request = request_rx.recv() => match request {
                Some(WorkerRequest::Disconnect) | None => break,
                Some(WorkerRequest::Connect(target)) => {
                    warn!(hub = %target.name, "connect rejected, session already active");
                    let _ = event_tx.send(WorkerEvent::ConnectionFailed {
                        reason: format!(
                            "already connected; disconnect before connecting to {}",
                            target.name
                        ),
                    });
                }
            },

            command = command_rx.recv() => match command {
                None => break,
                Some(command) => {
                    if let Err(e) = execute_command(session.as_mut(), command, config, event_tx).await {
                        warn!(error = %e, "session lost mid-command");
                        break;
                    }
                }
            },
        }
    }

    let _ = state_tx.send(LinkState::Disconnecting);
    if let Err(e) = session.disconnect().await {
        debug!(error = %e, "error while closing the link");
    }
}

/// Build the program, run it on the hub, report the outcome.
///
/// Returns `Err` only for fatal transport errors; every other failure is
/// converted to a `CommandFailed` event and the loop continues.
async fn execute_command(
    session: &mut dyn HubSession,
    command: HubCommand,
    config: &WorkerConfig,
    event_tx: &mpsc::UnboundedSender<WorkerEvent>,
) -> Result<(), TransportError> {
    let program = build_program(command);
    let _ = event_tx.send(WorkerEvent::Running { command });

    let result = match config.run_timeout {
        Some(limit) => match timeout(limit, session.run(&program)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        },
        None => session.run(&program).await,
    };

    match result {
        Ok(output) => {
            if let Some(color) = scan_color(&output) {
                let _ = event_tx.send(WorkerEvent::ColorDetected { color });
            }
            Ok(())
        }
        Err(e) => {
            let _ = event_tx.send(WorkerEvent::CommandFailed {
                reason: e.to_string(),
            });
            if e.is_fatal() {
                Err(e)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HubAddress;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Shared observation state for the mock hub
    #[derive(Clone)]
    struct MockState {
        run_tx: mpsc::UnboundedSender<String>,
        scripted: Arc<Mutex<VecDeque<Result<String, TransportError>>>>,
        busy: Arc<AtomicBool>,
        overlap: Arc<AtomicBool>,
        hold_enabled: Arc<AtomicBool>,
        hold: Arc<Semaphore>,
        connect_count: Arc<AtomicUsize>,
        disconnect_count: Arc<AtomicUsize>,
        fail_connect: Arc<AtomicBool>,
    }

    struct MockHub {
        state: MockState,
        run_rx: mpsc::UnboundedReceiver<String>,
    }

    impl MockHub {
        fn new() -> Self {
            let (run_tx, run_rx) = mpsc::unbounded_channel();
            Self {
                state: MockState {
                    run_tx,
                    scripted: Arc::new(Mutex::new(VecDeque::new())),
                    busy: Arc::new(AtomicBool::new(false)),
                    overlap: Arc::new(AtomicBool::new(false)),
                    hold_enabled: Arc::new(AtomicBool::new(false)),
                    hold: Arc::new(Semaphore::new(0)),
                    connect_count: Arc::new(AtomicUsize::new(0)),
                    disconnect_count: Arc::new(AtomicUsize::new(0)),
                    fail_connect: Arc::new(AtomicBool::new(false)),
                },
                run_rx,
            }
        }

        fn script(&self, result: Result<String, TransportError>) {
            self.state.scripted.lock().unwrap().push_back(result);
        }

        fn connector(&self) -> Arc<dyn HubConnector> {
            Arc::new(MockConnector {
                state: self.state.clone(),
            })
        }

        async fn observed_run(&mut self) -> String {
            timeout(Duration::from_secs(5), self.run_rx.recv())
                .await
                .expect("timed out waiting for a run")
                .expect("mock channel closed")
        }

        fn no_run_observed(&mut self) {
            assert!(
                self.run_rx.try_recv().is_err(),
                "transport observed an unexpected run"
            );
        }
    }

    struct MockConnector {
        state: MockState,
    }

    #[async_trait]
    impl HubConnector for MockConnector {
        async fn connect(
            &self,
            _target: &HubTarget,
        ) -> Result<Box<dyn HubSession>, TransportError> {
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "hub unreachable",
                )));
            }
            self.state.connect_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                state: self.state.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    struct MockSession {
        state: MockState,
    }

    #[async_trait]
    impl HubSession for MockSession {
        async fn run(&mut self, program: &str) -> Result<String, TransportError> {
            if self.state.busy.swap(true, Ordering::SeqCst) {
                self.state.overlap.store(true, Ordering::SeqCst);
            }
            self.state.run_tx.send(program.to_string()).unwrap();

            if self.state.hold_enabled.load(Ordering::SeqCst) {
                let permit = self.state.hold.acquire().await.expect("gate closed");
                permit.forget();
            }

            self.state.busy.store(false, Ordering::SeqCst);
            self.state
                .scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("done\n".into()))
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            self.state.disconnect_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target() -> HubTarget {
        HubTarget {
            name: "test-hub".into(),
            address: HubAddress::Tcp("127.0.0.1:0".into()),
            rssi: None,
        }
    }

    async fn next_event(worker: &mut HubWorker) -> WorkerEvent {
        timeout(Duration::from_secs(5), worker.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("worker stopped")
    }

    async fn connect_worker(worker: &mut HubWorker) {
        worker.request_connect(target());
        match next_event(worker).await {
            WorkerEvent::Connected { hub } => assert_eq!(hub, "test-hub"),
            other => panic!("expected Connected, got {other:?}"),
        }
        assert_eq!(worker.link_state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_run_in_order_one_at_a_time() {
        let mut hub = MockHub::new();
        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());
        connect_worker(&mut worker).await;

        assert!(worker.submit_command(HubCommand::Push));
        assert!(worker.submit_command(HubCommand::SteerLeft));

        assert_eq!(hub.observed_run().await, build_program(HubCommand::Push));
        assert_eq!(
            hub.observed_run().await,
            build_program(HubCommand::SteerLeft)
        );
        assert!(!hub.state.overlap.load(Ordering::SeqCst));

        // Completion events arrive in command order
        match next_event(&mut worker).await {
            WorkerEvent::Running { command } => assert_eq!(command, HubCommand::Push),
            other => panic!("expected Running(push), got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::Running { command } => assert_eq!(command, HubCommand::SteerLeft),
            other => panic!("expected Running(steer-left), got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn command_while_disconnected_is_dropped() {
        let mut hub = MockHub::new();
        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());

        assert!(!worker.submit_command(HubCommand::Push));

        connect_worker(&mut worker).await;
        assert!(worker.submit_command(HubCommand::Pull));

        // Only the post-connect command reaches the transport
        assert_eq!(hub.observed_run().await, build_program(HubCommand::Pull));
        hub.no_run_observed();
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_lets_inflight_command_finish() {
        let mut hub = MockHub::new();
        hub.state.hold_enabled.store(true, Ordering::SeqCst);
        hub.script(Ok("COLOR: red\n".into()));

        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());
        connect_worker(&mut worker).await;

        assert!(worker.submit_command(HubCommand::Push));
        let _ = hub.observed_run().await;

        // Run is in flight; ask for teardown, then queue another command
        worker.request_disconnect();
        worker.submit_command(HubCommand::SteerLeft);

        // Nothing torn down while the run is held open
        assert_eq!(hub.state.disconnect_count.load(Ordering::SeqCst), 0);

        hub.state.hold.add_permits(1);

        // The in-flight result still surfaces, then the session goes down
        match next_event(&mut worker).await {
            WorkerEvent::Running { command } => assert_eq!(command, HubCommand::Push),
            other => panic!("expected Running, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::ColorDetected { color } => assert_eq!(color, "red"),
            other => panic!("expected ColorDetected, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::Disconnected => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }

        assert_eq!(hub.state.disconnect_count.load(Ordering::SeqCst), 1);
        assert_eq!(worker.link_state(), LinkState::Idle);

        // The command queued after the disconnect request never started
        hub.no_run_observed();
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_command_does_not_stop_the_next() {
        let mut hub = MockHub::new();
        hub.script(Err(TransportError::Io(io::Error::new(
            io::ErrorKind::Other,
            "motor jam",
        ))));
        hub.script(Ok("COLOR: blue\n".into()));

        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());
        connect_worker(&mut worker).await;

        assert!(worker.submit_command(HubCommand::Push));
        assert!(worker.submit_command(HubCommand::ReadColor));

        let _ = hub.observed_run().await;
        let _ = hub.observed_run().await;

        match next_event(&mut worker).await {
            WorkerEvent::Running { command } => assert_eq!(command, HubCommand::Push),
            other => panic!("expected Running, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::CommandFailed { reason } => assert!(reason.contains("motor jam")),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::Running { command } => assert_eq!(command, HubCommand::ReadColor),
            other => panic!("expected Running, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::ColorDetected { color } => assert_eq!(color, "blue"),
            other => panic!("expected ColorDetected, got {other:?}"),
        }

        // Session survived the failure
        assert_eq!(worker.link_state(), LinkState::Connected);
        assert_eq!(hub.state.disconnect_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_tears_the_session_down() {
        let mut hub = MockHub::new();
        hub.script(Err(TransportError::ConnectionLost("radio gone".into())));

        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());
        connect_worker(&mut worker).await;

        assert!(worker.submit_command(HubCommand::Push));
        let _ = hub.observed_run().await;

        match next_event(&mut worker).await {
            WorkerEvent::Running { .. } => {}
            other => panic!("expected Running, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::CommandFailed { reason } => assert!(reason.contains("radio gone")),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::Disconnected => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert_eq!(worker.link_state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connected_is_rejected() {
        let mut hub = MockHub::new();
        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());
        connect_worker(&mut worker).await;

        worker.request_connect(target());

        match next_event(&mut worker).await {
            WorkerEvent::ConnectionFailed { reason } => {
                assert!(reason.contains("already connected"));
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }

        // The original session is untouched
        assert_eq!(worker.link_state(), LinkState::Connected);
        assert_eq!(hub.state.connect_count.load(Ordering::SeqCst), 1);
        assert_eq!(hub.state.disconnect_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_reports_and_returns_to_idle() {
        let hub = MockHub::new();
        hub.state.fail_connect.store(true, Ordering::SeqCst);

        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());
        worker.request_connect(target());

        match next_event(&mut worker).await {
            WorkerEvent::ConnectionFailed { reason } => assert!(reason.contains("unreachable")),
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(worker.link_state(), LinkState::Idle);

        // A later attempt succeeds independently
        hub.state.fail_connect.store(false, Ordering::SeqCst);
        connect_worker(&mut worker).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_then_reconnect() {
        let mut hub = MockHub::new();
        let mut worker = HubWorker::spawn(WorkerConfig::default(), hub.connector());

        // Disconnect while idle is a silent no-op
        worker.request_disconnect();

        connect_worker(&mut worker).await;
        worker.request_disconnect();

        match next_event(&mut worker).await {
            WorkerEvent::Disconnected => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert_eq!(worker.link_state(), LinkState::Idle);
        assert_eq!(hub.state.disconnect_count.load(Ordering::SeqCst), 1);

        connect_worker(&mut worker).await;
        assert_eq!(hub.state.connect_count.load(Ordering::SeqCst), 2);

        hub.no_run_observed();
    }

    #[tokio::test(start_paused = true)]
    async fn run_timeout_is_a_failed_command_not_a_teardown() {
        let mut hub = MockHub::new();
        hub.state.hold_enabled.store(true, Ordering::SeqCst);

        let config = WorkerConfig {
            run_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let mut worker = HubWorker::spawn(config, hub.connector());
        connect_worker(&mut worker).await;

        assert!(worker.submit_command(HubCommand::Push));
        let _ = hub.observed_run().await;

        match next_event(&mut worker).await {
            WorkerEvent::Running { .. } => {}
            other => panic!("expected Running, got {other:?}"),
        }
        match next_event(&mut worker).await {
            WorkerEvent::CommandFailed { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        assert_eq!(worker.link_state(), LinkState::Connected);
    }
}
