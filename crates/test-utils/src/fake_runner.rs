use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use autokube::errors::SpawnError;
use autokube::exec::output::tag_line;
use autokube::exec::{KillSwitch, RunningStage, StageCommand, StageExit, StageRunner};
use autokube::logs::LogStream;
use autokube::types::StreamKind;

/// What a scripted process does when spawned.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Print `lines` on stdout, then exit with `code`.
    Exit {
        code: i32,
        lines: Vec<String>,
        marker_seen: bool,
    },
    /// Fail to start, like a missing binary.
    SpawnFail(io::ErrorKind),
    /// Print `lines`, then stay alive until `release` is notified (exit 0)
    /// or the process is killed.
    Hold {
        lines: Vec<String>,
        release: Arc<Notify>,
    },
}

impl Behaviour {
    pub fn ok(lines: &[&str]) -> Self {
        Behaviour::Exit {
            code: 0,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            marker_seen: false,
        }
    }

    pub fn fail(code: i32) -> Self {
        Behaviour::Exit {
            code,
            lines: Vec::new(),
            marker_seen: false,
        }
    }

    /// Non-zero exit whose output matched the command's failure marker.
    pub fn missing_pip() -> Self {
        Behaviour::Exit {
            code: 1,
            lines: vec!["/venv/bin/python: No module named pip".to_string()],
            marker_seen: true,
        }
    }

    /// A long-running process and the handle that lets it finish.
    pub fn hold(lines: &[&str]) -> (Self, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        (
            Behaviour::Hold {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                release: release.clone(),
            },
            release,
        )
    }
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<&'static str, VecDeque<Behaviour>>,
    spawned: Vec<(String, &'static str)>,
}

/// A fake stage runner that:
/// - records which step labels were spawned, per cluster
/// - plays back queued behaviours per label, defaulting to a silent exit 0.
///
/// Output goes through the real `LogStream` with the same tagging as the
/// production runner.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<State>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `behaviour` for the next spawn of the step labelled `label`.
    pub fn script(&self, label: &'static str, behaviour: Behaviour) -> &Self {
        self.state
            .lock()
            .scripts
            .entry(label)
            .or_default()
            .push_back(behaviour);
        self
    }

    /// Labels spawned so far, in order, across all clusters.
    pub fn spawned(&self) -> Vec<&'static str> {
        self.state.lock().spawned.iter().map(|(_, l)| *l).collect()
    }

    pub fn spawned_for(&self, cluster: &str) -> Vec<&'static str> {
        self.state
            .lock()
            .spawned
            .iter()
            .filter(|(c, _)| c == cluster)
            .map(|(_, l)| *l)
            .collect()
    }
}

impl StageRunner for ScriptedRunner {
    fn spawn(
        &self,
        cluster: &str,
        command: &StageCommand,
        stream: &LogStream,
    ) -> Result<RunningStage, SpawnError> {
        let label = command.label();
        let behaviour = {
            let mut state = self.state.lock();
            let behaviour = state
                .scripts
                .get_mut(label)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Behaviour::ok(&[]));
            if let Behaviour::SpawnFail(kind) = &behaviour {
                return Err(SpawnError::new(command.program_display(), io::Error::from(*kind)));
            }
            state.spawned.push((cluster.to_string(), label));
            behaviour
        };

        let (kill, kill_rx) = KillSwitch::pair();
        let (exit_tx, exit_rx) = oneshot::channel();
        let cluster = cluster.to_string();
        let stream = stream.clone();

        tokio::spawn(async move {
            let exit = match behaviour {
                Behaviour::Exit {
                    code,
                    lines,
                    marker_seen,
                } => {
                    emit_lines(&stream, &cluster, label, &lines);
                    StageExit::Exited { code, marker_seen }
                }
                Behaviour::Hold { lines, release } => {
                    emit_lines(&stream, &cluster, label, &lines);
                    tokio::select! {
                        _ = release.notified() => StageExit::Exited { code: 0, marker_seen: false },
                        Ok(()) = kill_rx => StageExit::Killed { code: None },
                    }
                }
                Behaviour::SpawnFail(_) => unreachable!("spawn failures return early"),
            };

            let closing = match exit {
                StageExit::Exited { code, .. } => format!("[{label}] process exited with code {code}"),
                StageExit::Killed { .. } => format!("[{label}] process killed (signal)"),
            };
            stream.emit(&cluster, &closing);
            let _ = exit_tx.send(exit);
        });

        Ok(RunningStage { kill, exit: exit_rx })
    }
}

fn emit_lines(stream: &LogStream, cluster: &str, label: &'static str, lines: &[String]) {
    for line in lines {
        stream.emit(cluster, &tag_line(label, StreamKind::Stdout, line));
    }
}
