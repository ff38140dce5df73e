//! Bit-reproducibility: identical setups must produce identical event traces.

use std::cell::RefCell;
use std::rc::Rc;

use platsim_kernel::{Engine, PlatformConfig};

fn platform() -> PlatformConfig {
    serde_yaml::from_str(
        "
hosts:
  - {name: h1, speed: 1e9}
  - {name: h2, speed: 1e9}
  - {name: h3, speed: 2e9}
links:
  - {name: l1, bandwidth: 50e6, latency: 1e-3}
  - {name: l2, bandwidth: 20e6, latency: 2e-3}
routes:
  - {src: h1, dst: h2, links: [l1]}
  - {src: h2, dst: h3, links: [l2]}
  - {src: h1, dst: h3, links: [l1, l2]}
",
    )
    .unwrap()
}

type Trace = Vec<(usize, String, u64)>;

/// A workload exercising comms, execs, io-free sharing and randomness, recording every
/// activity completion as (id, state, time-bits).
fn run_once(seed: u64) -> (f64, Trace) {
    let mut engine = Engine::new(seed);
    engine.build_platform(&platform()).unwrap();
    let h1 = engine.host_by_name("h1").unwrap();
    let h2 = engine.host_by_name("h2").unwrap();
    let h3 = engine.host_by_name("h3").unwrap();

    let trace: Rc<RefCell<Trace>> = Rc::new(RefCell::new(Vec::new()));
    {
        let trace = trace.clone();
        engine.on_activity_completion(move |event| {
            trace
                .borrow_mut()
                .push((event.id.0, format!("{:?}", event.state), event.time.to_bits()));
        });
    }

    for (name, src, dst) in [("s12", h1, h2), ("s23", h2, h3), ("s13", h1, h3)] {
        engine.spawn(name, src, move |ctx| async move {
            for round in 0..3u32 {
                ctx.sendto(src, dst, 10e6 * (round + 1) as f64).await.unwrap();
                let jitter = ctx.gen_range(1..10) as f64 / 100.0;
                ctx.sleep(jitter).await.unwrap();
                ctx.execute(1e8).await.unwrap();
            }
        });
    }

    let clock = engine.run().unwrap();
    (clock, Rc::try_unwrap(trace).unwrap().into_inner())
}

#[test]
fn identical_runs_produce_identical_traces() {
    let (clock_a, trace_a) = run_once(1234);
    let (clock_b, trace_b) = run_once(1234);
    assert_eq!(clock_a.to_bits(), clock_b.to_bits());
    assert_eq!(trace_a, trace_b);
    assert!(!trace_a.is_empty());
}

#[test]
fn different_seeds_only_change_random_choices() {
    // Sanity check that the trace actually depends on the seeded jitter, which is what
    // the determinism above is guarding.
    let (_, trace_a) = run_once(1);
    let (_, trace_b) = run_once(2);
    assert_ne!(trace_a, trace_b);
}
