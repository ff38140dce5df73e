//! Activity lifecycle scenarios: rendezvous, timeouts, failures, cancellation.

use std::cell::RefCell;
use std::rc::Rc;

use platsim_kernel::{
    ActivityError, ActivityState, Engine, EngineError, PlatformConfig, ScheduledEvent, SimulationConfig,
};

fn platform(yaml: &str) -> PlatformConfig {
    serde_yaml::from_str(yaml).unwrap()
}

fn assert_time(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected t={}, got t={}",
        expected,
        actual
    );
}

const TWO_HOSTS_10MBS: &str = "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: l1, bandwidth: 10e6, latency: 0}
routes:
  - {src: h1, dst: h2, links: [l1]}
";

#[test]
fn mailbox_rendezvous() {
    // Receiver blocks at t = 0; sender posts 1 MB at t = 1 on a 10 MB/s link; the
    // receiver unblocks at t = 1.1 with the payload.
    let mut engine = Engine::new(42);
    engine.build_platform(&platform(TWO_HOSTS_10MBS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("receiver", h2, |ctx| async move {
        let payload: String = ctx.get("mb").await.unwrap();
        assert_eq!(payload, "hello");
        assert!((ctx.time() - 1.1).abs() < 1e-6);
    });
    engine.spawn("sender", h1, |ctx| async move {
        ctx.sleep(1.0).await.unwrap();
        ctx.put("mb", "hello".to_string(), 1e6).await.unwrap();
    });

    assert_time(engine.run().unwrap(), 1.1);
}

#[test]
fn mailbox_matching_is_fifo() {
    let mut engine = Engine::new(42);
    engine.build_platform(&platform(TWO_HOSTS_10MBS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("sender", h1, |ctx| async move {
        for k in 0..5u32 {
            ctx.put("seq", k, 1e6).await.unwrap();
        }
    });
    engine.spawn("receiver", h2, |ctx| async move {
        for k in 0..5u32 {
            let got: u32 = ctx.get("seq").await.unwrap();
            assert_eq!(got, k);
        }
    });

    engine.run().unwrap();
}

#[test]
fn timeout_wins_over_slow_comm() {
    // 10 MB over a 1 MB/s link with a 1 s timeout: the wait returns TimeoutError at
    // t = 1 and the comm is canceled, releasing the link.
    let mut engine = Engine::new(3);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: l1, bandwidth: 1e6, latency: 0}
routes:
  - {src: h1, dst: h2, links: [l1]}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("impatient", h1, move |ctx| async move {
        let comm = ctx.sendto_async(h1, h2, 10e6);
        let err = comm.wait_for(1.0).await.unwrap_err();
        assert_eq!(err, ActivityError::Timeout);
        assert!((ctx.time() - 1.0).abs() < 1e-6);
        assert_eq!(comm.state(), ActivityState::SrcTimeout);

        // The link is free again: a fresh 1 MB transfer takes exactly 1 s.
        ctx.sendto(h1, h2, 1e6).await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn host_failure_mid_exec() {
    // 10 Gflops on a 1 Gflop/s CPU, host turned off at t = 3: the exec fails with
    // HostFailure and the issuer observes it on wait().
    let mut engine = Engine::new(17);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();
    engine.schedule(3.0, ScheduledEvent::HostOff(h1));

    engine.spawn("observer", h2, move |ctx| async move {
        let exec = ctx.exec_init(10e9).with_host(h1).start();
        let err = exec.wait().await.unwrap_err();
        assert_eq!(err, ActivityError::HostFailure);
        assert!((ctx.time() - 3.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 3.0);
}

#[test]
fn link_failure_fails_comm() {
    let mut engine = Engine::new(17);
    engine.build_platform(&platform(TWO_HOSTS_10MBS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();
    let l1 = engine.link_by_name("l1").unwrap();
    engine.schedule(0.5, ScheduledEvent::LinkOff(l1));

    engine.spawn("sender", h1, move |ctx| async move {
        let err = ctx.sendto(h1, h2, 100e6).await.unwrap_err();
        assert_eq!(err, ActivityError::NetworkFailure);
        assert!((ctx.time() - 0.5).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 0.5);
}

#[test]
fn cancel_is_idempotent() {
    let mut engine = Engine::new(2);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("canceler", h1, |ctx| async move {
        let exec = ctx.exec_async(10e9);
        exec.cancel();
        assert_eq!(exec.state(), ActivityState::Canceled);
        // Canceling a terminal activity is a no-op.
        exec.cancel();
        assert_eq!(exec.state(), ActivityState::Canceled);
        let err = exec.wait().await.unwrap_err();
        assert_eq!(err, ActivityError::Canceled);
        assert!((ctx.time() - 0.0).abs() < 1e-9);
    });

    assert_time(engine.run().unwrap(), 0.0);
}

#[test]
fn suspend_resume_preserves_remaining() {
    // 1 Gflop at 1 Gflop/s, suspended for half a second: finishes at t = 1.5.
    let mut engine = Engine::new(2);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("controller", h1, |ctx| async move {
        let exec = ctx.exec_async(1e9);
        ctx.sleep(0.25).await.unwrap();
        exec.suspend();
        let ratio = exec.remaining_ratio();
        assert!((ratio - 0.75).abs() < 1e-6);
        ctx.sleep(0.5).await.unwrap();
        // Nothing progressed while suspended.
        assert!((exec.remaining_ratio() - ratio).abs() < 1e-9);
        exec.resume();
        exec.wait().await.unwrap();
        assert!((ctx.time() - 1.5).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 1.5);
}

#[test]
fn wait_any_returns_first_and_lowest_index() {
    let mut engine = Engine::new(2);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("waiter", h1, move |ctx| async move {
        let slow = ctx.exec_init(2e9).with_host(h1).start();
        let fast = ctx.exec_init(1e9).with_host(h2).start();
        let index = ctx.wait_any(&[slow.clone(), fast.clone()]).await.unwrap();
        assert_eq!(index, 1);
        assert!((ctx.time() - 1.0).abs() < 1e-6);

        // Two already-terminal activities: the lowest index wins.
        slow.wait().await.unwrap();
        let index = ctx.wait_any(&[slow, fast]).await.unwrap();
        assert_eq!(index, 0);
    });

    engine.run().unwrap();
}

#[test]
fn wait_any_for_times_out() {
    let mut engine = Engine::new(2);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("waiter", h1, |ctx| async move {
        let exec = ctx.exec_async(10e9);
        let index = ctx.wait_any_for(&[exec.clone()], 0.5).await;
        assert_eq!(index, None);
        assert!((ctx.time() - 0.5).abs() < 1e-6);
        exec.cancel();
    });

    engine.run().unwrap();
}

#[test]
fn detached_send_does_not_block_teardown() {
    let mut engine = Engine::new(2);
    engine.build_platform(&platform(TWO_HOSTS_10MBS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("fire-and-forget", h1, |ctx| async move {
        let comm = ctx.put_async("nobody-listens", "orphan".to_string(), 1e6);
        comm.detach();
        // The sender neither waits nor leaks; the simulation ends cleanly.
    });

    assert_time(engine.run().unwrap(), 0.0);
}

#[test]
fn permanent_receiver_buffers_eagerly() {
    // The payload crosses the network as soon as it is posted; a late get() returns it
    // without paying the transfer again.
    let mut engine = Engine::new(2);
    engine.build_platform(&platform(TWO_HOSTS_10MBS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    let receiver = engine.spawn("storage", h2, |ctx| async move {
        ctx.sleep(1.0).await.unwrap();
        let payload: String = ctx.get("buffered").await.unwrap();
        assert_eq!(payload, "stored");
        // Transfer finished at t = 0.1, long before the get.
        assert!((ctx.time() - 1.0).abs() < 1e-6);
    });
    engine.spawn("producer", h1, move |ctx| async move {
        ctx.set_receiver("buffered", receiver);
        ctx.put("buffered", "stored".to_string(), 1e6).await.unwrap();
        assert!((ctx.time() - 0.1).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 1.0);
}

#[test]
fn sleep_advances_clock() {
    let mut engine = Engine::new(2);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("sleeper", h1, |ctx| async move {
        ctx.sleep(2.5).await.unwrap();
        assert!((ctx.time() - 2.5).abs() < 1e-9);
    });

    assert_time(engine.run().unwrap(), 2.5);
}

#[test]
fn breakpoint_stops_the_engine() {
    let mut config = SimulationConfig::default();
    config.breakpoint = Some(1.0);
    let mut engine = Engine::with_config(2, config);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("sleeper", h1, |ctx| async move {
        ctx.sleep(5.0).await.unwrap();
    });

    match engine.run() {
        Err(EngineError::Breakpoint(t)) => assert!((t - 1.0).abs() < 1e-9),
        other => panic!("expected a breakpoint, got {:?}", other.map_err(|e| e.to_string())),
    }
    assert!((engine.clock() - 1.0).abs() < 1e-9);
}

#[test]
fn daemons_are_killed_at_the_end() {
    let mut engine = Engine::new(2);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    let beats = Rc::new(RefCell::new(0u32));
    {
        let beats = beats.clone();
        engine.spawn_daemon("heartbeat", h1, move |ctx| async move {
            loop {
                ctx.sleep(0.1).await.unwrap();
                *beats.borrow_mut() += 1;
            }
        });
    }
    engine.spawn("worker", h1, |ctx| async move {
        ctx.execute(1e9).await.unwrap();
    });

    assert_time(engine.run().unwrap(), 1.0);
    assert_eq!(*beats.borrow(), 10);
}
