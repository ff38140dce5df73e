//! Batch experiments: many independent simulations on a thread pool.

use std::sync::mpsc;
use std::time::Instant;

use log::info;
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;

use crate::config::SimulationConfig;
use crate::engine::Engine;
use crate::platform::PlatformConfig;
use crate::stats::RunStats;

/// Deploys the actors of a named scenario onto a freshly built engine.
pub type ScenarioResolver = fn(&str, &mut Engine);

struct Run {
    platform: (String, PlatformConfig),
    config: (String, SimulationConfig),
    scenario: String,
}

impl Run {
    fn execute(self, seed: u64, resolver: ScenarioResolver) -> RunResult {
        let mut engine = Engine::with_config(seed, self.config.1);
        engine
            .build_platform(&self.platform.1)
            .unwrap_or_else(|e| panic!("bad platform {}: {}", self.platform.0, e));
        resolver(&self.scenario, &mut engine);

        let (clock, error) = match engine.run() {
            Ok(clock) => (clock, None),
            Err(e) => (engine.clock(), Some(e.to_string())),
        };
        RunResult {
            platform: self.platform.0,
            config: self.config.0,
            scenario: self.scenario,
            clock,
            stats: engine.stats(),
            error,
        }
    }
}

/// Outcome of one run of the experiment grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub platform: String,
    pub config: String,
    pub scenario: String,
    pub clock: f64,
    pub stats: RunStats,
    /// Engine error (deadlock, breakpoint), if the run did not finish cleanly.
    pub error: Option<String>,
}

/// Every combination of platform, configuration and scenario, each simulated in its own
/// single-threaded engine; only independent runs execute in parallel.
pub struct Experiment {
    seed: u64,
    platforms: Vec<(String, PlatformConfig)>,
    configs: Vec<(String, SimulationConfig)>,
    scenarios: Vec<String>,
    scenario_resolver: ScenarioResolver,
}

impl Experiment {
    pub fn new(
        seed: u64,
        platforms: Vec<(String, PlatformConfig)>,
        configs: Vec<(String, SimulationConfig)>,
        scenarios: Vec<String>,
        scenario_resolver: ScenarioResolver,
    ) -> Self {
        Self {
            seed,
            platforms,
            configs,
            scenarios,
            scenario_resolver,
        }
    }

    /// Runs the whole grid on `threads` workers. Results come back over a channel as
    /// runs finish and are returned sorted by (platform, config, scenario).
    pub fn run(self, threads: usize) -> Vec<RunResult> {
        let mut grid = Vec::new();
        for platform in self.platforms.iter() {
            for config in self.configs.iter() {
                for scenario in self.scenarios.iter() {
                    grid.push(Run {
                        platform: platform.clone(),
                        config: config.clone(),
                        scenario: scenario.clone(),
                    });
                }
            }
        }

        let total = grid.len();
        let seed = self.seed;
        let resolver = self.scenario_resolver;
        let started = Instant::now();
        let pool = ThreadPool::new(threads);
        let (tx, rx) = mpsc::channel();
        for run in grid {
            let tx = tx.clone();
            pool.execute(move || {
                let result = run.execute(seed, resolver);
                // The receiver outlives the pool; a send only fails if a sibling
                // worker panicked the whole experiment down.
                let _ = tx.send(result);
            });
        }
        drop(tx);

        // Drain in completion order; the channel closes once the last worker is done.
        let mut results = Vec::with_capacity(total);
        for result in rx.iter() {
            info!(
                "run {}/{} done: {} / {} / {} (clock {:.6}, {:.2?} elapsed)",
                results.len() + 1,
                total,
                result.platform,
                result.config,
                result.scenario,
                result.clock,
                started.elapsed()
            );
            results.push(result);
        }
        info!("experiment done: {} runs in {:.2?}", results.len(), started.elapsed());

        results.sort_by(|a, b| {
            (&a.platform, &a.config, &a.scenario).cmp(&(&b.platform, &b.config, &b.scenario))
        });
        results
    }
}
