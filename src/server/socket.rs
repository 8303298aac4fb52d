// src/server/socket.rs

//! One task pair per WebSocket connection.
//!
//! The connection owns a single [`Observer`]; every cluster it asks about is
//! joined with that observer, and a disconnect detaches it everywhere.
//! Informational replies go to this connection only.

use std::collections::HashSet;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::KillReport;
use crate::errors::SupervisorError;
use crate::logs::{LogLine, Observer};
use crate::server::protocol::{ClientEvent, ServerEvent};
use crate::server::AppState;
use crate::supervisor::Supervisor;
use crate::types::ClusterId;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.supervisor))
}

async fn handle_socket(socket: WebSocket, supervisor: Supervisor) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (observer, mut log_rx) = Observer::channel();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn_id = observer.id();
    info!(connection = %conn_id, "socket connected");

    let outgoing = tokio::spawn(async move {
        loop {
            // Replays are queued before the reply that follows them.
            let event = tokio::select! {
                biased;
                Some(LogLine { cluster_id, text }) = log_rx.recv() => ServerEvent::log(cluster_id, text),
                Some(reply) = reply_rx.recv() => reply,
                else => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode server event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        supervisor: &supervisor,
        observer,
        replies: reply_tx,
        joined: HashSet::new(),
    };

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_frame(text.as_str().as_bytes()).await,
            Ok(Message::Binary(bin)) => session.handle_frame(bin.as_ref()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %conn_id, error = %e, "socket error");
                break;
            }
        }
    }

    supervisor.detach(conn_id);
    outgoing.abort();
    info!(connection = %conn_id, "socket disconnected");
}

struct Session<'a> {
    supervisor: &'a Supervisor,
    observer: Observer,
    replies: mpsc::UnboundedSender<ServerEvent>,
    joined: HashSet<ClusterId>,
}

impl Session<'_> {
    async fn handle_frame(&mut self, raw: &[u8]) {
        match serde_json::from_slice::<ClientEvent>(raw) {
            Ok(event) => {
                debug!(connection = %self.observer.id(), ?event, "client event");
                self.handle_event(event).await;
            }
            Err(e) => {
                debug!(connection = %self.observer.id(), error = %e, "unparseable frame");
                self.reply(ServerEvent::Error {
                    message: format!("invalid event: {e}"),
                });
            }
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) {
        let cluster = event.cluster_id().to_string();
        match event {
            ClientEvent::RunScript { .. } => {
                if !self.joined.contains(&cluster) {
                    self.attach(&cluster);
                }
                match self.supervisor.start(&cluster) {
                    Ok(job_id) => debug!(cluster = %cluster, job_id, "deployment requested"),
                    Err(e) => self.inform(&cluster, e),
                }
            }
            ClientEvent::RequestLogs { .. } => {
                if self.joined.contains(&cluster) {
                    debug!(cluster = %cluster, "already streaming this cluster");
                } else {
                    self.attach(&cluster);
                }
            }
            ClientEvent::KillScript { .. } => match self.supervisor.kill(&cluster) {
                Ok(KillReport::NothingRunning) => {
                    self.reply(ServerEvent::log(
                        &cluster,
                        format!("[supervisor] nothing running for cluster {cluster}"),
                    ));
                }
                // A joined connection already sees these lines in the stream.
                Ok(report) if !self.joined.contains(&cluster) => {
                    for line in report.lines() {
                        self.reply(ServerEvent::log(&cluster, line));
                    }
                }
                Ok(_) => {}
                Err(e) => self.inform(&cluster, e),
            },
            ClientEvent::ClearLogs { .. } => match self.supervisor.clear_logs(&cluster) {
                Ok(()) => self.reply(ServerEvent::log(&cluster, "[supervisor] logs cleared")),
                Err(e) => self.inform(&cluster, e),
            },
            ClientEvent::RequestStatus { .. } => match self.supervisor.status(&cluster).await {
                Ok(status) => self.reply(ServerEvent::Status(status)),
                Err(e) => self.inform(&cluster, e),
            },
        }
    }

    fn attach(&mut self, cluster: &str) {
        match self.supervisor.attach(cluster, self.observer.clone()) {
            Ok(0) if self.supervisor.orchestrator().stage_of(cluster).is_none() => {
                self.joined.insert(cluster.to_string());
                self.reply(ServerEvent::log(
                    cluster,
                    format!("[supervisor] no logs for cluster {cluster} yet"),
                ));
            }
            Ok(_) => {
                self.joined.insert(cluster.to_string());
            }
            Err(e) => self.inform(cluster, e),
        }
    }

    /// Expected refusals become a log line for this connection only.
    fn inform(&self, cluster: &str, err: SupervisorError) {
        match &err {
            SupervisorError::AlreadyRunning(_)
            | SupervisorError::NotFound(_)
            | SupervisorError::InvalidClusterId(_) => {}
            other => warn!(cluster, error = %other, "socket request failed"),
        }
        self.reply(ServerEvent::log(cluster, format!("[supervisor] {err}")));
    }

    fn reply(&self, event: ServerEvent) {
        if self.replies.send(event).is_err() {
            debug!(connection = %self.observer.id(), "reply dropped; connection closing");
        }
    }
}
