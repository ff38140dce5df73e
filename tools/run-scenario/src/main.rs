//! CLI runner: load a platform YAML, deploy a canned scenario, print the run summary.

use std::path::PathBuf;

use clap::Parser;

use platsim_kernel::{Engine, Experiment, PlatformConfig, SimulationConfig};

#[derive(Parser)]
#[command(about = "Runs a canned scenario against a platform description")]
struct Args {
    /// Platform description file (YAML).
    #[arg(long)]
    platform: PathBuf,
    /// Scenario name: ping-pong, all-to-all, cpu-bound, or "all" for the whole grid.
    #[arg(long, default_value = "ping-pong")]
    scenario: String,
    /// Simulation seed.
    #[arg(long, default_value_t = 123)]
    seed: u64,
    /// Worker threads for the "all" grid.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

const SCENARIOS: [&str; 3] = ["ping-pong", "all-to-all", "cpu-bound"];

fn deploy(scenario: &str, engine: &mut Engine) {
    let hosts = engine.hosts();
    assert!(hosts.len() >= 2, "scenarios need at least two hosts");
    match scenario {
        "ping-pong" => {
            let (h1, h2) = (hosts[0], hosts[1]);
            engine.spawn("ping", h1, |ctx| async move {
                for round in 0..10u32 {
                    ctx.put("pong", round, 1e6).await.unwrap();
                    let _: u32 = ctx.get("ping").await.unwrap();
                }
            });
            engine.spawn("pong", h2, |ctx| async move {
                for round in 0..10u32 {
                    let _: u32 = ctx.get("pong").await.unwrap();
                    ctx.put("ping", round, 1e6).await.unwrap();
                }
            });
        }
        "all-to-all" => {
            for &src in hosts.iter() {
                let targets = hosts.clone();
                let name = format!("spreader-{}", engine.host_name(src));
                engine.spawn(&name, src, move |ctx| async move {
                    let comms: Vec<_> = targets
                        .iter()
                        .filter(|&&dst| dst != src)
                        .map(|&dst| ctx.sendto_async(src, dst, 10e6).as_activity())
                        .collect();
                    for (index, comm) in comms.iter().enumerate() {
                        comm.wait().await.unwrap_or_else(|e| panic!("transfer {} failed: {}", index, e));
                    }
                });
            }
        }
        "cpu-bound" => {
            for &host in hosts.iter() {
                let name = format!("cruncher-{}", engine.host_name(host));
                engine.spawn(&name, host, |ctx| async move {
                    for _ in 0..5 {
                        ctx.execute(1e9).await.unwrap();
                        ctx.sleep(0.01).await.unwrap();
                    }
                });
            }
        }
        other => panic!("unknown scenario '{}'", other),
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();
    let platform = PlatformConfig::from_yaml(&args.platform);

    if args.scenario == "all" {
        let experiment = Experiment::new(
            args.seed,
            vec![("platform".to_string(), platform)],
            vec![("default".to_string(), SimulationConfig::default())],
            SCENARIOS.iter().map(|s| s.to_string()).collect(),
            deploy,
        );
        let results = experiment.run(args.threads);
        println!("{}", serde_json::to_string_pretty(&results).unwrap());
        return;
    }

    let mut engine = Engine::new(args.seed);
    engine.build_platform(&platform).unwrap();
    deploy(&args.scenario, &mut engine);
    match engine.run() {
        Ok(clock) => {
            println!("finished at t={:.6}", clock);
            println!("{}", serde_json::to_string_pretty(&engine.stats()).unwrap());
        }
        Err(error) => {
            eprintln!("simulation failed: {}", error);
            std::process::exit(1);
        }
    }
}
