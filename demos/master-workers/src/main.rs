//! A master actor scatters compute jobs to workers over mailboxes and gathers acks.

use platsim_kernel::{log_info, Engine, PlatformConfig};

const PLATFORM: &str = "
hosts:
  - {name: master, speed: 1e9}
  - {name: node1, speed: 1e9}
  - {name: node2, speed: 2e9}
  - {name: node3, speed: 0.5e9}
links:
  - {name: lan, bandwidth: 100e6, latency: 1e-4}
routes:
  - {src: master, dst: node1, links: [lan]}
  - {src: master, dst: node2, links: [lan]}
  - {src: master, dst: node3, links: [lan]}
";

struct Job {
    flops: f64,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let platform: PlatformConfig = serde_yaml::from_str(PLATFORM).unwrap();
    let mut engine = Engine::new(42);
    engine.build_platform(&platform).unwrap();

    let workers = ["node1", "node2", "node3"];
    for name in workers {
        let host = engine.host_by_name(name).unwrap();
        engine.spawn(name, host, move |ctx| async move {
            let mailbox = ctx.label();
            let mut done = 0usize;
            loop {
                match ctx.get::<Option<Job>>(&mailbox).await {
                    Ok(Some(job)) => {
                        ctx.execute(job.flops).await.unwrap();
                        done += 1;
                        ctx.put("results", done, 64.0).await.unwrap();
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            log_info!(ctx, "worker done after {} jobs", done);
        });
    }

    let master = engine.host_by_name("master").unwrap();
    engine.spawn("master", master, move |ctx| async move {
        let jobs = 12usize;
        for k in 0..jobs {
            let target = workers[k % workers.len()];
            ctx.put(target, Some(Job { flops: 2e9 }), 1e6).await.unwrap();
        }
        for k in 0..jobs {
            let _: usize = ctx.get("results").await.unwrap();
            log_info!(ctx, "collected ack {}/{}", k + 1, jobs);
        }
        for target in workers {
            ctx.put(target, None::<Job>, 64.0).await.unwrap();
        }
        log_info!(ctx, "all jobs done");
    });

    let clock = engine.run().unwrap();
    println!("simulation finished at t={:.6}", clock);
    println!("{:#?}", engine.stats());
}
