// tests/observer_replay.rs

mod common;
use crate::common::{Harness, wait_until};

use std::error::Error;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc::UnboundedReceiver;

use autokube::engine::JobOutcome;
use autokube::fs::mock::MockFileSystem;
use autokube::logs::{LogLine, LogStream, Observer};
use autokube_test_utils::fake_runner::Behaviour;

type TestResult = Result<(), Box<dyn Error>>;

fn drain(rx: &mut UnboundedReceiver<LogLine>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(line) = rx.try_recv() {
        out.push(line.text);
    }
    out
}

#[tokio::test]
async fn mid_run_attach_gets_history_notice_then_live() -> TestResult {
    let mut h = Harness::new();
    let (hold, release) = Behaviour::hold(&["creating node 1", "creating node 2"]);
    h.runner.script("python", hold);

    h.supervisor.start("c1")?;
    h.wait_for_step("c1", "python").await;
    wait_until(|| h.log("c1").contains(&"[python] creating node 2".to_string())).await;

    let history_at_attach = h.log("c1");
    let (observer, mut rx) = Observer::channel();
    let replayed = h.supervisor.attach("c1", observer)?;
    assert_eq!(replayed, history_at_attach.len());

    let first = drain(&mut rx);
    let notice = "[supervisor] re-attached to running stage RUN_PROVISION".to_string();
    let mut expected = history_at_attach.clone();
    expected.push(notice.clone());
    assert_eq!(first, expected);

    release.notify_one();
    assert_eq!(h.next_outcome().await.outcome, JobOutcome::Done);

    // Everything after the notice is exactly the part of the log written
    // after the attach: nothing missing, nothing twice.
    let live = drain(&mut rx);
    let full = h.log("c1");
    assert_eq!(live, full[history_at_attach.len()..].to_vec());
    assert!(!live.contains(&notice));
    Ok(())
}

#[tokio::test]
async fn attach_when_idle_has_no_notice() -> TestResult {
    let mut h = Harness::new();
    h.supervisor.start("c1")?;
    h.next_outcome().await;

    let (observer, mut rx) = Observer::channel();
    h.supervisor.attach("c1", observer)?;

    let replay = drain(&mut rx);
    assert_eq!(replay, h.log("c1"));
    assert!(!replay.iter().any(|l| l.contains("re-attached")));
    Ok(())
}

#[tokio::test]
async fn attaching_the_same_observer_again_does_not_replay() -> TestResult {
    let mut h = Harness::new();
    h.supervisor.start("c1")?;
    h.next_outcome().await;

    let (observer, mut rx) = Observer::channel();
    h.supervisor.attach("c1", observer.clone())?;
    h.supervisor.attach("c1", observer)?;
    h.supervisor.stream().emit("c1", "[python] later");

    assert_eq!(drain(&mut rx), h.log("c1"));
    Ok(())
}

#[tokio::test]
async fn detached_observer_receives_nothing_more() -> TestResult {
    let mut h = Harness::new();
    let (observer, mut rx) = Observer::channel();
    let id = observer.id();
    h.supervisor.attach("c1", observer)?;
    h.supervisor.detach(id);

    h.supervisor.start("c1")?;
    h.next_outcome().await;

    assert!(drain(&mut rx).is_empty());
    assert!(!h.log("c1").is_empty());
    Ok(())
}

#[tokio::test]
async fn every_observer_sees_every_line_once() -> TestResult {
    let mut h = Harness::new();
    let (a, mut rx_a) = Observer::channel();
    let (b, mut rx_b) = Observer::channel();
    h.supervisor.attach("c1", a)?;
    h.supervisor.attach("c1", b)?;

    h.supervisor.start("c1")?;
    h.next_outcome().await;

    let full = h.log("c1");
    assert_eq!(drain(&mut rx_a), full);
    assert_eq!(drain(&mut rx_b), full);
    Ok(())
}

#[test]
fn attach_racing_a_writer_is_gap_free() {
    let stream = LogStream::new(Arc::new(MockFileSystem::new()), "logs");
    let writer_stream = stream.clone();

    let writer = thread::spawn(move || {
        for i in 0..500 {
            writer_stream.emit("c1", &format!("line {i}"));
        }
    });

    while stream.history("c1").map(|h| h.len()).unwrap_or(0) < 50 {
        thread::yield_now();
    }
    let (observer, mut rx) = Observer::channel();
    stream.attach("c1", observer, || None).expect("attach");

    writer.join().expect("writer thread");

    let seen = drain(&mut rx);
    let expected: Vec<String> = (0..500).map(|i| format!("line {i}")).collect();
    assert_eq!(seen, expected);
}
