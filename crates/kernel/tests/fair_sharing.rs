//! Bandwidth and CPU sharing scenarios with hand-computed completion times.

use std::cell::RefCell;
use std::rc::Rc;

use platsim_kernel::{Engine, PlatformConfig, SimulationConfig};

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

const TWO_HOSTS: &str = "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: l1, bandwidth: 100e6, latency: 0}
routes:
  - {src: h1, dst: h2, links: [l1]}
";

#[test]
fn fair_sharing_on_one_link() {
    // Two 100 MB transfers over one 100 MB/s link: both finish at t = 2.
    let mut engine = Engine::new(123);
    engine.build_platform(&platform(TWO_HOSTS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    let times = Rc::new(RefCell::new(Vec::new()));
    for name in ["a", "b"] {
        let times = times.clone();
        engine.spawn(name, h1, move |ctx| async move {
            ctx.sendto(h1, h2, 100e6).await.unwrap();
            times.borrow_mut().push(ctx.time());
        });
    }

    let clock = engine.run().unwrap();
    assert_time(clock, 2.0);
    for &t in times.borrow().iter() {
        assert_time(t, 2.0);
    }
}

#[test]
fn max_min_with_three_flows() {
    // L1 = 10 MB/s carries X and Y, L2 = 5 MB/s carries Y and Z. Steady-state rates are
    // X = 7.5, Y = 2.5, Z = 2.5; sized accordingly, all three finish at t = 1.
    let mut engine = Engine::new(1);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: ha, speed: 1e9}
  - {name: hb, speed: 1e9}
  - {name: hc, speed: 1e9}
links:
  - {name: l1, bandwidth: 10e6, latency: 0}
  - {name: l2, bandwidth: 5e6, latency: 0}
routes:
  - {src: ha, dst: hb, links: [l1]}
  - {src: ha, dst: hc, links: [l1, l2]}
  - {src: hb, dst: hc, links: [l2]}
",
        ))
        .unwrap();
    let ha = engine.host_by_name("ha").unwrap();
    let hb = engine.host_by_name("hb").unwrap();
    let hc = engine.host_by_name("hc").unwrap();

    let times = Rc::new(RefCell::new(Vec::new()));
    for (name, src, dst, size) in [
        ("x", ha, hb, 7.5e6),
        ("y", ha, hc, 2.5e6),
        ("z", hb, hc, 2.5e6),
    ] {
        let times = times.clone();
        engine.spawn(name, src, move |ctx| async move {
            ctx.sendto(src, dst, size).await.unwrap();
            times.borrow_mut().push((ctx.label(), ctx.time()));
        });
    }

    engine.run().unwrap();
    for (name, t) in times.borrow().iter() {
        assert!((t - 1.0).abs() < 1e-6, "flow {} finished at {}", name, t);
    }
}

#[test]
fn cpu_priorities_share_proportionally() {
    // Priority-2 and priority-1 execs of 1 Gflop on a 1 Gflop/s core: the heavy one
    // finishes at t = 1.5, the light one at t = 2.
    let mut engine = Engine::new(7);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    let times = Rc::new(RefCell::new(Vec::new()));
    for (name, priority) in [("heavy", 2.0), ("light", 1.0)] {
        let times = times.clone();
        engine.spawn(name, h1, move |ctx| async move {
            ctx.exec_init(1e9).with_priority(priority).start().wait().await.unwrap();
            times.borrow_mut().push((ctx.label(), ctx.time()));
        });
    }

    let clock = engine.run().unwrap();
    assert_time(clock, 2.0);
    let times = times.borrow();
    let heavy = times.iter().find(|(n, _)| n.as_str() == "heavy").unwrap().1;
    let light = times.iter().find(|(n, _)| n.as_str() == "light").unwrap().1;
    assert_time(heavy, 1.5);
    assert_time(light, 2.0);
}

#[test]
fn bounded_exec_leaves_capacity_unused() {
    // A 0.5 Gflop/s bound on a 1 Gflop/s core doubles the execution time.
    let mut engine = Engine::new(7);
    engine.build_platform(&platform("hosts: [{name: h1, speed: 1e9}]")).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();

    engine.spawn("capped", h1, move |ctx| async move {
        ctx.exec_init(1e9).with_bound(0.5e9).start().wait().await.unwrap();
        assert!((ctx.time() - 2.0).abs() < 1e-6);
    });

    assert!((engine.run().unwrap() - 2.0).abs() < 1e-6);
}

#[test]
fn comm_rate_cap_applies() {
    let mut engine = Engine::new(9);
    engine.build_platform(&platform(TWO_HOSTS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("recv", h2, |ctx| async move {
        ctx.get::<String>("slow").await.unwrap();
        assert!((ctx.time() - 4.0).abs() < 1e-6);
    });
    engine.spawn("send", h1, |ctx| async move {
        // 100 MB at a user cap of 25 MB/s takes 4 s.
        ctx.put_async_rated("slow", "payload".to_string(), 100e6, 25e6)
            .wait()
            .await
            .unwrap();
    });

    assert!((engine.run().unwrap() - 4.0).abs() < 1e-6);
}

#[test]
fn crosstraffic_installs_reverse_share() {
    // With cross-traffic on, the single flow also charges 5% of its rate on the return
    // path, which crosses the same link: rate = 100 / 1.05 MB/s.
    let mut config = SimulationConfig::default();
    config.crosstraffic = true;
    let mut engine = Engine::with_config(5, config);
    engine.build_platform(&platform(TWO_HOSTS)).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    engine.spawn("a", h1, move |ctx| async move {
        ctx.sendto(h1, h2, 100e6).await.unwrap();
    });

    let clock = engine.run().unwrap();
    assert!((clock - 1.05).abs() < 1e-6, "got {}", clock);
}

#[test]
fn fatpipe_does_not_share() {
    let mut engine = Engine::new(11);
    engine
        .build_platform(&platform(
            "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
links:
  - {name: backbone, bandwidth: 100e6, latency: 0, policy: fatpipe}
routes:
  - {src: h1, dst: h2, links: [backbone]}
",
        ))
        .unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();

    // Two 100 MB transfers on a fatpipe each get the full 100 MB/s.
    for name in ["a", "b"] {
        engine.spawn(name, h1, move |ctx| async move {
            ctx.sendto(h1, h2, 100e6).await.unwrap();
            assert!((ctx.time() - 1.0).abs() < 1e-6);
        });
    }

    assert!((engine.run().unwrap() - 1.0).abs() < 1e-6);
}
