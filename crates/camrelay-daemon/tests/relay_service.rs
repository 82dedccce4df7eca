#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests for the relay service with shell stand-ins for ffmpeg.

mod common;

use std::sync::Arc;
use std::time::Duration;

use camrelay_daemon::service::{ActiveSessions, RelayError, StopOutcome};
use camrelay_daemon::stream::SourceAddress;
use camrelay_daemon::subprocess::Profile;

use common::{IGNORES_QUIT, QUITS_ON_BYTE, ShellLauncher, drained, expected_path, service, timings};

const CAM1: &str = "rtsp://cam1/stream";

// =========================================================================
// play
// =========================================================================

#[tokio::test]
async fn repeated_play_shares_one_subprocess() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    let first = svc.play(CAM1).await.unwrap();
    let second = svc.play(CAM1).await.unwrap();

    assert_eq!(first, expected_path(CAM1));
    assert_eq!(first, second);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(svc.active_sessions().await, ActiveSessions { live: 1, record: 0 });

    svc.shutdown().await;
}

#[tokio::test]
async fn concurrent_play_launches_once() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = Arc::new(service(&launcher, timings(10_000, 1_000)));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move { svc.play(CAM1).await.unwrap() }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), expected_path(CAM1));
    }

    assert_eq!(launcher.launches(), 1);
    svc.shutdown().await;
}

#[tokio::test]
async fn equivalent_addresses_share_a_key() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    let a = svc.play("rtsp://cam1/stream").await.unwrap();
    let b = svc.play("RTSP://cam1//stream/").await.unwrap();

    assert_eq!(a, b);
    assert_eq!(launcher.launches(), 1);
    svc.shutdown().await;
}

#[tokio::test]
async fn distinct_addresses_get_distinct_sessions() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    let a = svc.play("rtsp://cam1/stream").await.unwrap();
    let b = svc.play("rtsp://cam2/stream").await.unwrap();

    assert_ne!(a, b);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(svc.active_sessions().await.live, 2);
    svc.shutdown().await;
}

#[tokio::test]
async fn invalid_address_creates_no_session() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    let err = svc.play("http://not-rtsp").await.unwrap_err();

    assert!(matches!(err, RelayError::InvalidAddress(_)));
    assert_eq!(launcher.launches(), 0);
    assert_eq!(svc.active_sessions().await, ActiveSessions { live: 0, record: 0 });
}

#[tokio::test]
async fn launch_failure_leaves_nothing_behind() {
    let launcher = Arc::new(ShellLauncher::missing_binary());
    let svc = service(&launcher, timings(10_000, 1_000));

    let err = svc.record(CAM1).await.unwrap_err();

    assert!(matches!(err, RelayError::Launch(_)));
    let key = SourceAddress::parse(CAM1).unwrap().key();
    assert!(!svc.registry(Profile::Record).contains(key).await);
    assert!(!svc.signals().contains(key).await);

    // No retries: the next request tries again from scratch.
    assert!(svc.record(CAM1).await.is_err());
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_launch_does_not_delay_other_sources() {
    let launcher = Arc::new(ShellLauncher::slow_for(
        QUITS_ON_BYTE,
        CAM1,
        Duration::from_millis(800),
    ));
    let svc = Arc::new(service(&launcher, timings(10_000, 1_000)));

    let slow = {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move { svc.play(CAM1).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    svc.play("rtsp://cam2/stream").await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_millis(400),
        "cam2 waited {elapsed:?} on cam1's launch"
    );
    assert_eq!(slow.await.unwrap().unwrap(), expected_path(CAM1));
    assert_eq!(svc.active_sessions().await.live, 2);
    svc.shutdown().await;
}

// =========================================================================
// Idle timeout
// =========================================================================

#[tokio::test]
async fn idle_session_is_torn_down() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(200, 1_000));
    let key = SourceAddress::parse(CAM1).unwrap().key();

    svc.play(CAM1).await.unwrap();
    assert!(svc.registry(Profile::Live).contains(key).await);

    assert!(drained(&svc, Profile::Live).await);
}

#[tokio::test]
async fn play_after_teardown_relaunches() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(200, 1_000));

    svc.play(CAM1).await.unwrap();
    assert!(drained(&svc, Profile::Live).await);

    svc.play(CAM1).await.unwrap();
    assert_eq!(launcher.launches(), 2);
    svc.shutdown().await;
}

#[tokio::test]
async fn refreshing_requests_keep_session_alive() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(300, 1_000));
    let key = SourceAddress::parse(CAM1).unwrap().key();

    svc.play(CAM1).await.unwrap();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        svc.play(CAM1).await.unwrap();
    }

    assert!(svc.registry(Profile::Live).contains(key).await);
    assert_eq!(launcher.launches(), 1);
    svc.shutdown().await;
}

// =========================================================================
// record / stop_recording
// =========================================================================

#[tokio::test]
async fn stop_without_recording_is_not_found() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    assert_eq!(svc.stop_recording(CAM1).await.unwrap(), StopOutcome::NotFound);
    assert_eq!(launcher.launches(), 0);
    assert!(svc.signals().is_empty().await);
}

#[tokio::test]
async fn stop_recording_terminates_before_idle_timeout() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(60_000, 1_000));
    let key = SourceAddress::parse(CAM1).unwrap().key();

    assert_eq!(svc.record(CAM1).await.unwrap(), expected_path(CAM1));
    assert!(svc.signals().contains(key).await);

    assert_eq!(svc.stop_recording(CAM1).await.unwrap(), StopOutcome::Ack);
    assert!(drained(&svc, Profile::Record).await);
    assert!(!svc.signals().contains(key).await);
    assert_eq!(svc.stop_recording(CAM1).await.unwrap(), StopOutcome::NotFound);
}

#[tokio::test]
async fn stubborn_recording_is_killed_after_grace() {
    let launcher = Arc::new(ShellLauncher::new(IGNORES_QUIT));
    let svc = service(&launcher, timings(60_000, 200));

    svc.record(CAM1).await.unwrap();
    assert_eq!(svc.stop_recording(CAM1).await.unwrap(), StopOutcome::Ack);

    assert!(drained(&svc, Profile::Record).await);
}

#[tokio::test]
async fn live_and_record_of_one_source_coexist() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    let live = svc.play(CAM1).await.unwrap();
    let record = svc.record(CAM1).await.unwrap();

    assert_eq!(live, record);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(svc.active_sessions().await, ActiveSessions { live: 1, record: 1 });

    // Stop only reaches the recording.
    assert_eq!(svc.stop_recording(CAM1).await.unwrap(), StopOutcome::Ack);
    assert!(drained(&svc, Profile::Record).await);
    assert_eq!(svc.active_sessions().await.live, 1);

    svc.shutdown().await;
}

#[tokio::test]
async fn stop_with_invalid_address_is_rejected() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(10_000, 1_000));

    let err = svc.stop_recording("rtsp://").await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidAddress(_)));
}

// =========================================================================
// shutdown
// =========================================================================

#[tokio::test]
async fn shutdown_terminates_every_session() {
    let launcher = Arc::new(ShellLauncher::new(QUITS_ON_BYTE));
    let svc = service(&launcher, timings(60_000, 1_000));

    svc.play("rtsp://cam1/stream").await.unwrap();
    svc.play("rtsp://cam2/stream").await.unwrap();
    svc.record("rtsp://cam1/stream").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), svc.shutdown())
        .await
        .unwrap();

    assert_eq!(svc.active_sessions().await, ActiveSessions { live: 0, record: 0 });
    assert!(svc.signals().is_empty().await);
    assert!(matches!(
        svc.play(CAM1).await.unwrap_err(),
        RelayError::ShuttingDown
    ));
    assert_eq!(launcher.launches(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn launch_racing_shutdown_is_refused() {
    let launcher = Arc::new(ShellLauncher::slow_for(
        QUITS_ON_BYTE,
        CAM1,
        Duration::from_millis(400),
    ));
    let svc = Arc::new(service(&launcher, timings(60_000, 1_000)));

    let pending = {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move { svc.record(CAM1).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    svc.shutdown().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, RelayError::ShuttingDown));
    assert_eq!(launcher.launches(), 1);
    assert_eq!(svc.active_sessions().await, ActiveSessions { live: 0, record: 0 });
    assert!(svc.signals().is_empty().await);
}
