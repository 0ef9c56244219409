use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::handle::fake::FakeFactory;
use crate::handle::{HandleEvent, ShellParams};
use crate::relay::SessionEvent;

const GRACE: Duration = Duration::from_millis(100);

fn supervisor(factory: &FakeFactory, readiness: ReadinessPolicy) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(factory.clone()),
        SupervisorConfig {
            close_grace: GRACE,
            readiness,
        },
    ))
}

fn quick(on_timeout: TimeoutAction) -> ReadinessPolicy {
    ReadinessPolicy {
        interval: Duration::from_millis(10),
        attempts: 3,
        on_timeout,
    }
}

fn sid(raw: &str) -> SessionId {
    SessionId::parse(raw).unwrap()
}

fn shell() -> SessionParams {
    SessionParams::InteractiveShell(ShellParams::default())
}

/// Let spawned tasks run until they are all idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_create_opens_once() {
    let factory = FakeFactory::new().slow_open(Duration::from_millis(50));
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, _rx) = EventSink::channel(16);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let sup = Arc::clone(&sup);
            let sink = sink.clone();
            tokio::spawn(async move { sup.create(sid("t1"), shell(), OwnerId::new(), sink).await })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(SessionError::DuplicateSession(_)) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(factory.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_twice_kills_once() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, mut rx) = EventSink::channel(16);
    let owner = OwnerId::new();

    sup.create(sid("t1"), shell(), owner, sink).await.unwrap();
    sup.close(&sid("t1")).unwrap();
    assert!(matches!(
        sup.close(&sid("t1")),
        Err(SessionError::AlreadyClosing(_))
    ));

    let event = next_event(&mut rx).await;
    assert_eq!(
        event,
        SessionEvent::Closed {
            session_id: sid("t1"),
            exit_code: None
        }
    );
    settle().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(factory.kills(), 1);
    assert!(matches!(sup.close(&sid("t1")), Err(SessionError::NotFound(_))));
    assert_eq!(sup.registry().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_within_grace_reuses_handle() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (first_sink, mut first_rx) = EventSink::channel(16);
    let (second_sink, mut second_rx) = EventSink::channel(16);

    let created = sup
        .create(sid("t1"), shell(), OwnerId::new(), first_sink)
        .await
        .unwrap();
    assert!(!created.reused);

    sup.close(&sid("t1")).unwrap();
    tokio::time::sleep(GRACE / 2).await;

    let second_owner = OwnerId::new();
    let reopened = sup
        .create(sid("t1"), shell(), second_owner, second_sink)
        .await
        .unwrap();
    assert!(reopened.reused);

    // Past the original grace window the session is still alive
    tokio::time::sleep(GRACE * 2).await;
    let session = sup.registry().get(&sid("t1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.owner, second_owner);
    assert_eq!(factory.opens(), 1);
    assert_eq!(factory.kills(), 0);

    sup.write(&sid("t1"), b"ls\n".to_vec()).unwrap();
    factory
        .feed("t1")
        .send(HandleEvent::Data(b"file.txt\n".to_vec()))
        .await
        .unwrap();

    match next_event(&mut second_rx).await {
        SessionEvent::Data { payload, .. } => assert_eq!(payload, "file.txt\n"),
        other => panic!("unexpected event: {:?}", other),
    }
    settle().await;
    assert_eq!(factory.writes(), vec![b"ls\n".to_vec()]);
    assert!(first_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_close_right_after_reopen_still_kills() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (first_sink, _first_rx) = EventSink::channel(16);
    let (second_sink, mut second_rx) = EventSink::channel(16);

    sup.create(sid("t1"), shell(), OwnerId::new(), first_sink)
        .await
        .unwrap();
    sup.close(&sid("t1")).unwrap();

    let reopened = sup
        .create(sid("t1"), shell(), OwnerId::new(), second_sink)
        .await
        .unwrap();
    assert!(reopened.reused);
    sup.close(&sid("t1")).unwrap();

    assert!(matches!(
        next_event(&mut second_rx).await,
        SessionEvent::Closed { exit_code: None, .. }
    ));
    settle().await;
    assert_eq!(factory.kills(), 1);
    assert_eq!(sup.registry().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_output_order_preserved() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, mut rx) = EventSink::channel(4);

    sup.create(sid("t1"), shell(), OwnerId::new(), sink).await.unwrap();
    let feed = factory.feed("t1");
    let producer = tokio::spawn(async move {
        for i in 0..200 {
            feed.send(HandleEvent::Data(format!("{},", i).into_bytes()))
                .await
                .unwrap();
        }
        feed.send(HandleEvent::Exit(Some(0))).await.unwrap();
    });

    let mut output = String::new();
    let exit_code = loop {
        match next_event(&mut rx).await {
            SessionEvent::Data { payload, .. } => output.push_str(&payload),
            SessionEvent::Closed { exit_code, .. } => break exit_code,
            other => panic!("unexpected event: {:?}", other),
        }
    };
    producer.await.unwrap();

    let expected: String = (0..200).map(|i| format!("{},", i)).collect();
    assert_eq!(output, expected);
    assert_eq!(exit_code, Some(0));
    assert!(!sup.registry().contains(&sid("t1")).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_owner_disconnect_releases_sessions() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let window_a = OwnerId::new();
    let window_b = OwnerId::new();
    let (sink_a, mut rx_a) = EventSink::channel(16);
    let (sink_b, _rx_b) = EventSink::channel(16);

    for raw in ["a1", "a2", "a3"] {
        sup.create(sid(raw), shell(), window_a, sink_a.clone())
            .await
            .unwrap();
    }
    sup.create(sid("b1"), shell(), window_b, sink_b).await.unwrap();

    assert_eq!(sup.owner_disconnected(window_a).unwrap(), 3);
    assert!(sup.registry().list_by_owner(window_a).unwrap().is_empty());
    assert_eq!(sup.registry().count(), 1);

    settle().await;
    assert_eq!(factory.kills(), 3);
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_fails() {
    let factory = FakeFactory::new().never_ready();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, _rx) = EventSink::channel(16);

    let result = sup.create(sid("k1"), shell(), OwnerId::new(), sink).await;
    match result {
        Err(SessionError::ReadinessTimeout { id, attempts }) => {
            assert_eq!(id, "k1");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(sup.registry().count(), 0);
    assert_eq!(factory.kills(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_warns() {
    let factory = FakeFactory::new().never_ready();
    let sup = supervisor(&factory, quick(TimeoutAction::Warn));
    let (sink, _rx) = EventSink::channel(16);

    let created = sup
        .create(sid("k1"), shell(), OwnerId::new(), sink)
        .await
        .unwrap();
    assert!(created.warning.is_some());
    let session = sup.registry().get(&sid("k1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.pid, Some(4242));
}

#[tokio::test(start_paused = true)]
async fn test_close_while_starting_cancels_open() {
    let factory = FakeFactory::new().slow_open(Duration::from_secs(10));
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, _rx) = EventSink::channel(16);

    let pending = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.create(sid("k1"), shell(), OwnerId::new(), sink).await })
    };
    settle().await;
    assert_eq!(
        sup.registry().get(&sid("k1")).unwrap().unwrap().state,
        SessionState::Starting
    );

    sup.close(&sid("k1")).unwrap();
    assert!(matches!(
        sup.close(&sid("k1")),
        Err(SessionError::AlreadyClosing(_))
    ));
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(SessionError::Cancelled(_))));
    assert_eq!(factory.opens(), 0);
    assert_eq!(sup.registry().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_write_refused_while_draining() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, _rx) = EventSink::channel(16);

    sup.create(sid("t1"), shell(), OwnerId::new(), sink).await.unwrap();
    sup.close(&sid("t1")).unwrap();

    let result = sup.write(&sid("t1"), b"late".to_vec());
    assert!(matches!(
        result,
        Err(SessionError::NotAccepting {
            state: SessionState::Draining,
            ..
        })
    ));
    // Resize and interrupt are still delivered
    sup.resize(&sid("t1"), PtySize::new(30, 100)).unwrap();
    sup.interrupt(&sid("t1")).unwrap();
    settle().await;
    assert!(factory.writes().is_empty());
    assert_eq!(
        *factory.state.resizes.lock().unwrap(),
        vec![PtySize::new(30, 100)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_spawn_failure_leaves_nothing() {
    let factory = FakeFactory::new().failing("no such shell");
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, _rx) = EventSink::channel(16);

    let result = sup.create(sid("t1"), shell(), OwnerId::new(), sink).await;
    assert!(matches!(result, Err(SessionError::Spawn(_))));
    assert_eq!(sup.registry().count(), 0);

    // The ID is free again
    let factory_ok = FakeFactory::new();
    let sup = Supervisor::new(
        Arc::clone(sup.registry()),
        Arc::new(factory_ok),
        SupervisorConfig::default(),
    );
    let (sink, _rx) = EventSink::channel(16);
    assert!(sup.create(sid("t1"), shell(), OwnerId::new(), sink).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_handle_error_fails_session() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, mut rx) = EventSink::channel(16);

    sup.create(sid("s1"), shell(), OwnerId::new(), sink).await.unwrap();
    factory
        .feed("s1")
        .send(HandleEvent::Error("read failed".into()))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut rx).await,
        SessionEvent::Error {
            session_id: sid("s1"),
            error: "read failed".into()
        }
    );
    settle().await;
    assert_eq!(factory.kills(), 1);
    assert_eq!(sup.registry().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_sink_kills_handle() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, rx) = EventSink::channel(16);

    sup.create(sid("s1"), shell(), OwnerId::new(), sink).await.unwrap();
    drop(rx);
    factory
        .feed("s1")
        .send(HandleEvent::Data(b"chunk".to_vec()))
        .await
        .unwrap();

    settle().await;
    assert_eq!(factory.kills(), 1);
    assert!(!sup.registry().contains(&sid("s1")).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_evict_skips_grace() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, mut rx) = EventSink::channel(16);

    sup.create(sid("t1"), shell(), OwnerId::new(), sink).await.unwrap();
    sup.evict(&sid("t1")).unwrap();
    assert!(!sup.registry().contains(&sid("t1")).unwrap());
    assert!(matches!(next_event(&mut rx).await, SessionEvent::Closed { .. }));
    assert_eq!(factory.kills(), 1);
    assert!(matches!(sup.evict(&sid("t1")), Err(SessionError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_everything() {
    let factory = FakeFactory::new();
    let sup = supervisor(&factory, quick(TimeoutAction::Fail));
    let (sink, _rx) = EventSink::channel(16);

    for raw in ["t1", "t2"] {
        sup.create(sid(raw), shell(), OwnerId::new(), sink.clone())
            .await
            .unwrap();
    }
    assert_eq!(sup.shutdown().unwrap(), 2);
    settle().await;
    assert_eq!(sup.registry().count(), 0);
    assert_eq!(factory.kills(), 2);
}
