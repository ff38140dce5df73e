//! Resource-model behavior: disks, parallel execs, p-states, profiles, model flavors.

use platsim_kernel::{
    Engine, NetworkModelKind, OpType, PlatformConfig, SimulationConfig,
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

const HOST_WITH_DISK: &str = "
hosts:
  - name: h1
    speed: 1e9
    disks:
      - {name: d1, read_bw: 100e6, write_bw: 50e6}
";

#[test]
fn disk_read_alone_runs_at_peak() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(HOST_WITH_DISK)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let d1 = engine.disk_by_name("d1").unwrap();

    engine.spawn("reader", h1, move |ctx| async move {
        ctx.disk_read(d1, 100e6).await.unwrap();
        assert!((ctx.time() - 1.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 1.0);
}

#[test]
fn disk_aggregate_shares_read_and_write() {
    // The aggregate constraint is max(read, write) = 100 MB/s; a concurrent reader and
    // writer settle at 50 MB/s each, so 100 MB take 2 s both ways.
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(HOST_WITH_DISK)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let d1 = engine.disk_by_name("d1").unwrap();

    engine.spawn("reader", h1, move |ctx| async move {
        ctx.disk_read(d1, 100e6).await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });
    engine.spawn("writer", h1, move |ctx| async move {
        ctx.disk_write(d1, 100e6).await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn disk_write_capped_by_write_bandwidth() {
    let mut engine = Engine::new(1);
    engine.build_platform(&platform(HOST_WITH_DISK)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let d1 = engine.disk_by_name("d1").unwrap();

    engine.spawn("writer", h1, move |ctx| async move {
        ctx.io_async(d1, 100e6, OpType::Write).wait().await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn parallel_exec_is_limited_by_slowest_host_and_mesh() {
    // Host 2 must push 2 Gflops through a 1 Gflop/s core, so the task progresses at
    // rate 0.5 and lasts 2 s; the 1 MB mesh transfer is far from limiting.
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: l1, bandwidth: 100e6, latency: 0}
routes:
  - {src: h1, dst: h2, links: [l1]}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("coordinator", h1, move |ctx| async move {
        let hosts = vec![h1, h2];
        let flops = vec![1e9, 2e9];
        let bytes = vec![0.0, 1e6, 0.0, 0.0];
        ctx.parallel_execute(hosts, flops, bytes).await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn pstate_change_rescales_the_cpu() {
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform("hosts: [{name: h1, speeds: [1e9, 2e9]}]"))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("turbo", h1, move |ctx| async move {
        ctx.execute(1e9).await.unwrap();
        assert!((ctx.time() - 1.0).abs() < 1e-6);
        ctx.set_pstate(h1, 1);
        ctx.execute(1e9).await.unwrap();
        assert!((ctx.time() - 1.5).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 1.5);
}

#[test]
fn speed_profile_rescales_mid_exec() {
    // Capacity halves at t = 1: 1.5 Gflops = 1 Gflop in the first second plus
    // 0.5 Gflop at 0.5 Gflop/s.
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - name: h1
    speed: 1e9
    speed_profile:
      events: [[1.0, 0.5]]
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("worker", h1, |ctx| async move {
        ctx.execute(1.5e9).await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn state_profile_turns_link_off() {
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - name: l1
    bandwidth: 10e6
    latency: 0
    state_profile:
      events: [[0.5, 0.0]]
routes:
  - {src: h1, dst: h2, links: [l1]}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("sender", h1, move |ctx| async move {
        let err = ctx.sendto(h1, h2, 100e6).await.unwrap_err();
        assert!((ctx.time() - 0.5).abs() < 1e-6);
        let _ = err;
    });

    assert_time(engine.run().unwrap(), 0.5);
}

#[test]
fn latency_is_paid_before_transfer() {
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: l1, bandwidth: 10e6, latency: 0.25}
routes:
  - {src: h1, dst: h2, links: [l1]}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("sender", h1, move |ctx| async move {
        ctx.sendto(h1, h2, 10e6).await.unwrap();
        assert!((ctx.time() - 1.25).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 1.25);
}

#[test]
fn constant_network_model_fixes_transfer_time() {
    let mut config = SimulationConfig::default();
    config.network_model = NetworkModelKind::Constant;
    config.latency_factor = 2.0;
    let mut engine = Engine::with_config(1, config);
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

    for (name, size) in [("small", 1e3), ("huge", 1e12)] {
        engine.spawn(name, h1, move |ctx| async move {
            ctx.sendto(h1, h2, size).await.unwrap();
            assert!((ctx.time() - 2.0).abs() < 1e-6);
        });
    }

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn wifi_medium_shares_air_time() {
    // Two stations at 10 MB/s share the medium: each effectively gets half the air
    // time, so a 10 MB upload from each takes 2 s.
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: sta1, speed: 1e9}
  - {name: sta2, speed: 1e9}
  - {name: ap, speed: 1e9}
links:
  - name: radio
    bandwidth: 10e6
    latency: 0
    policy: wifi
    host_rates: {sta1: 10e6, sta2: 10e6}
routes:
  - {src: sta1, dst: ap, links: [radio]}
  - {src: sta2, dst: ap, links: [radio]}
",
        ))
        .unwrap();
    let sta1 = engine.host_by_name("sta1").unwrap();
    let sta2 = engine.host_by_name("sta2").unwrap();
    let ap = engine.host_by_name("ap").unwrap();

    for (name, src) in [("u1", sta1), ("u2", sta2)] {
        engine.spawn(name, src, move |ctx| async move {
            ctx.sendto(src, ap, 10e6).await.unwrap();
            assert!((ctx.time() - 2.0).abs() < 1e-6);
        });
    }

    assert_time(engine.run().unwrap(), 2.0);
}

#[test]
fn splitduplex_directions_are_independent() {
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: duplex, bandwidth: 10e6, latency: 0, policy: splitduplex}
routes:
  - {src: h1, dst: h2, links: [duplex_UP], symmetric: false}
  - {src: h2, dst: h1, links: [duplex_DOWN], symmetric: false}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    // One 10 MB transfer per direction: each runs at the full 10 MB/s.
    engine.spawn("up", h1, move |ctx| async move {
        ctx.sendto(h1, h2, 10e6).await.unwrap();
        assert!((ctx.time() - 1.0).abs() < 1e-6);
    });
    engine.spawn("down", h2, move |ctx| async move {
        ctx.sendto(h2, h1, 10e6).await.unwrap();
        assert!((ctx.time() - 1.0).abs() < 1e-6);
    });

    assert_time(engine.run().unwrap(), 1.0);
}

#[test]
fn exec_conservation_over_shared_steps() {
    // Three staggered execs reshuffle rates several times; each still burns exactly its
    // flop budget.
    let mut engine = Engine::new(1);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    // Start times 0, 0.5 and 1.0; 1 Gflop each on a 1 Gflop/s core. Total work is
    // 3 Gflops, so the last completion is at t = 3 regardless of interleaving.
    for (name, delay) in [("a", 0.0), ("b", 0.5), ("c", 1.0)] {
        engine.spawn(name, h1, move |ctx| async move {
            if delay > 0.0 {
                ctx.sleep(delay).await.unwrap();
            }
            ctx.execute(1e9).await.unwrap();
        });
    }

    assert_time(engine.run().unwrap(), 3.0);
}
