//! CPU model: executions, parallel executions and clock-driven sleeps.

use platsim_maxmin::UNBOUNDED;

use crate::activity::ActivityId;
use crate::error::ActivityError;
use crate::platform::HostId;
use crate::resource::{
    Action, ActionId, ActionState, Completions, ModelKind, Resources, StateToggle, NO_MAX_DURATION,
};

pub(crate) struct CpuModel;

impl CpuModel {
    /// Installs an execution. One host means a sequential exec whose remaining work is
    /// counted in flops. Several hosts mean a parallel exec: the variable progresses in
    /// fractions of the whole task, each host constraint is entered with that host's
    /// flop amount and each link of the communication mesh with its byte amount.
    #[allow(clippy::too_many_arguments)]
    pub fn exec_start(
        &self,
        res: &mut Resources,
        activity: ActivityId,
        hosts: &[HostId],
        flops: &[f64],
        bytes: &[f64],
        bound: f64,
        priority: f64,
        now: f64,
    ) -> Result<ActionId, ActivityError> {
        assert!(!hosts.is_empty(), "an execution needs at least one host");
        assert_eq!(hosts.len(), flops.len(), "one flop amount per host");
        if hosts.iter().any(|&h| !res.platform.host(h).is_on) {
            return Err(ActivityError::HostFailure);
        }

        let bound = if bound > 0.0 { bound } else { UNBOUNDED };
        let variable = res.system.variable_new(priority, bound);
        let mut links = Vec::new();
        let (remaining, cost);
        if hosts.len() == 1 {
            remaining = flops[0];
            cost = flops[0];
            res.system.expand(res.platform.host(hosts[0]).constraint, variable, 1.0);
        } else {
            remaining = 1.0;
            cost = 1.0;
            for (&host, &amount) in hosts.iter().zip(flops.iter()) {
                if amount > 0.0 {
                    res.system.expand(res.platform.host(host).constraint, variable, amount);
                }
            }
            let n = hosts.len();
            assert_eq!(bytes.len(), n * n, "the byte matrix must be hosts x hosts");
            for i in 0..n {
                for j in 0..n {
                    let amount = bytes[i * n + j];
                    if amount <= 0.0 || i == j {
                        continue;
                    }
                    let route = res
                        .platform
                        .routing
                        .route(hosts[i], hosts[j])
                        .unwrap_or_else(|| {
                            panic!(
                                "no route between {} and {}",
                                res.platform.host(hosts[i]).name,
                                res.platform.host(hosts[j]).name
                            )
                        })
                        .links
                        .clone();
                    for link in route {
                        res.system.expand(res.platform.link(link).constraint, variable, amount);
                        if !links.contains(&link) {
                            links.push(link);
                        }
                    }
                }
            }
        }

        Ok(res.actions.insert(Action {
            kind: ModelKind::Cpu,
            state: ActionState::Started,
            remaining,
            cost,
            max_duration: NO_MAX_DURATION,
            sharing_penalty: priority,
            suspended: false,
            variable: Some(variable),
            activity,
            latency: 0.0,
            last_update: now,
            last_value: 0.0,
            hosts: hosts.to_vec(),
            disk: None,
            links,
        }))
    }

    /// Installs a sleep: no solver variable, just a wall-clock budget tied to the host
    /// so that turning the host off fails it.
    pub fn sleep_start(
        &self,
        res: &mut Resources,
        activity: ActivityId,
        host: HostId,
        duration: f64,
        now: f64,
    ) -> Result<ActionId, ActivityError> {
        if !res.platform.host(host).is_on {
            return Err(ActivityError::HostFailure);
        }
        Ok(res.actions.insert(Action {
            kind: ModelKind::Cpu,
            state: ActionState::Started,
            remaining: duration,
            cost: duration,
            max_duration: f64::max(duration, 0.0),
            sharing_penalty: 0.0,
            suspended: false,
            variable: None,
            activity,
            latency: 0.0,
            last_update: now,
            last_value: 0.0,
            hosts: vec![host],
            disk: None,
            links: Vec::new(),
        }))
    }

    pub fn next_event(&self, res: &Resources, now: f64) -> Option<f64> {
        let mut min: Option<f64> = None;
        let mut consider = |candidate: f64| {
            min = Some(min.map_or(candidate, |m| f64::min(m, candidate)));
        };
        for id in res.actions.ids() {
            if res.actions.get(id).kind != ModelKind::Cpu {
                continue;
            }
            if let Some(horizon) = res.action_horizon(id) {
                consider(horizon);
            }
        }
        for host in res.platform.hosts.iter() {
            for cursor in [&host.speed_profile, &host.state_profile].into_iter().flatten() {
                if let Some(time) = cursor.next_event_time() {
                    consider(f64::max(time - now, 0.0));
                }
            }
        }
        min
    }

    pub fn update(
        &self,
        res: &mut Resources,
        now: f64,
        delta: f64,
        completions: &mut Completions,
        toggles: &mut Vec<StateToggle>,
    ) {
        for id in res.actions.ids() {
            if res.actions.get(id).kind != ModelKind::Cpu {
                continue;
            }
            if let Some(outcome) = res.advance_action(id, now, delta) {
                completions.push((id, outcome));
            }
        }

        let eps = res.precision.work;
        let Resources { system, platform, .. } = res;
        for (idx, host) in platform.hosts.iter_mut().enumerate() {
            if let Some(cursor) = host.speed_profile.as_mut() {
                let mut fired = false;
                while let Some(scale) = cursor.pop_due(now, eps) {
                    host.speed_scale = scale;
                    fired = true;
                }
                if fired {
                    system.update_constraint_capacity(host.constraint, host.capacity());
                }
            }
            if let Some(cursor) = host.state_profile.as_mut() {
                while let Some(value) = cursor.pop_due(now, eps) {
                    toggles.push(StateToggle::Host(HostId(idx), value > 0.0));
                }
            }
        }
    }
}
