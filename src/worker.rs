//! Background thread that owns the [`Session`] so blocking backend calls
//! never stall a render frame.

use std::{
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::backend::MediaControl;
use crate::dispatcher::{CommandSink, PlayerCommand};
use crate::session::{PollReport, PollRequest, QueryChannel, Session};

enum WorkerRequest {
    Poll(PollRequest),
    Command(PlayerCommand),
    Reconfigure { delta_floor_secs: f64 },
    Shutdown,
}

/// [`QueryChannel`] backed by a dedicated thread. At most one poll is in
/// flight; commands are queued behind it in send order.
pub struct QueryWorker {
    request_tx: Option<Sender<WorkerRequest>>,
    report_rx: Option<Receiver<PollReport>>,
    inflight: Option<(u64, Instant)>,
    inflight_timeout: Duration,
    next_request_id: u64,
}

impl QueryWorker {
    /// Moves `backend` onto a new `now-playing-queries` thread. A poll that
    /// has not answered within `inflight_timeout` is abandoned and its late
    /// report discarded.
    pub fn spawn<B>(backend: B, delta_floor_secs: f64, inflight_timeout: Duration) -> std::io::Result<Self>
    where
        B: MediaControl + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel();
        let (report_tx, report_rx) = mpsc::channel();

        thread::Builder::new()
            .name("now-playing-queries".into())
            .spawn(move || {
                let mut session = Session::new(backend, delta_floor_secs);
                while let Ok(request) = request_rx.recv() {
                    match request {
                        WorkerRequest::Poll(poll) => {
                            let report = session.poll(&poll);
                            if report_tx.send(report).is_err() {
                                break;
                            }
                        }
                        WorkerRequest::Command(command) => session.execute(command),
                        WorkerRequest::Reconfigure { delta_floor_secs } => {
                            session.set_delta_floor(delta_floor_secs)
                        }
                        WorkerRequest::Shutdown => break,
                    }
                }
                debug!("query worker stopped");
            })?;

        Ok(Self {
            request_tx: Some(request_tx),
            report_rx: Some(report_rx),
            inflight: None,
            inflight_timeout,
            next_request_id: 1,
        })
    }

    /// False once the thread has gone away.
    pub fn is_connected(&self) -> bool {
        self.request_tx.is_some()
    }

    /// Whether a poll is awaiting its report.
    pub fn inflight(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn set_inflight_timeout(&mut self, timeout: Duration) {
        self.inflight_timeout = timeout;
    }

    fn send(&mut self, request: WorkerRequest) -> bool {
        let Some(tx) = self.request_tx.as_ref() else {
            return false;
        };
        if tx.send(request).is_err() {
            warn!("query worker is gone");
            self.disconnect();
            return false;
        }
        true
    }

    fn disconnect(&mut self) {
        self.request_tx = None;
        self.report_rx = None;
        self.inflight = None;
    }

    fn expire_inflight(&mut self, now: Instant) {
        if let Some((id, sent_at)) = self.inflight {
            if now.saturating_duration_since(sent_at) > self.inflight_timeout {
                debug!(id, "poll timed out, allowing a new one");
                self.inflight = None;
            }
        }
    }
}

impl CommandSink for QueryWorker {
    fn send_command(&mut self, command: PlayerCommand) {
        self.send(WorkerRequest::Command(command));
    }
}

impl QueryChannel for QueryWorker {
    fn request_poll(&mut self, fetch_metadata: bool, now: Instant) -> bool {
        self.expire_inflight(now);
        if self.inflight.is_some() {
            return false;
        }
        let id = self.next_request_id;
        if !self.send(WorkerRequest::Poll(PollRequest { id, fetch_metadata })) {
            return false;
        }
        self.next_request_id += 1;
        self.inflight = Some((id, now));
        true
    }

    fn drain_reports(&mut self, now: Instant) -> Vec<PollReport> {
        let mut reports = Vec::new();
        let mut disconnected = false;
        if let Some(rx) = self.report_rx.as_ref() {
            loop {
                match rx.try_recv() {
                    Ok(report) => {
                        // Late answers to an abandoned request are stale.
                        if self.inflight.map(|(id, _)| id) == Some(report.id) {
                            self.inflight = None;
                            reports.push(report);
                        } else {
                            debug!(id = report.id, "dropping stale poll report");
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            warn!("query worker disconnected");
            self.disconnect();
        }
        self.expire_inflight(now);
        reports
    }

    fn set_delta_floor(&mut self, delta_floor_secs: f64) {
        self.send(WorkerRequest::Reconfigure { delta_floor_secs });
    }
}

impl Drop for QueryWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.request_tx.take() {
            let _ = tx.send(WorkerRequest::Shutdown);
        }
    }
}
