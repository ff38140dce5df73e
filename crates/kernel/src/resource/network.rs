//! Network models: max-min shared bandwidth (default) and constant-time transfers.

use platsim_maxmin::UNBOUNDED;

use crate::activity::ActivityId;
use crate::error::ActivityError;
use crate::platform::{HostId, LinkId, SharingPolicy};
use crate::resource::{
    Action, ActionId, ActionState, Completions, ModelKind, Resources, StateToggle, NO_MAX_DURATION,
};

/// The weight of the phantom reverse flow installed when cross-traffic is enabled.
const CROSSTRAFFIC_COEFF: f64 = 0.05;

/// Creates and advances communication actions.
pub(crate) trait NetworkModel {
    /// Installs a transfer of `size` bytes from `src` to `dst`, bounded by `rate` when
    /// positive.
    fn comm_start(
        &self,
        res: &mut Resources,
        activity: ActivityId,
        src: HostId,
        dst: HostId,
        size: f64,
        rate: f64,
        now: f64,
    ) -> Result<ActionId, ActivityError>;

    fn next_event(&self, res: &Resources, now: f64) -> Option<f64>;

    fn update(
        &self,
        res: &mut Resources,
        now: f64,
        delta: f64,
        completions: &mut Completions,
        toggles: &mut Vec<StateToggle>,
    );
}

fn actions_next_event(res: &Resources, _now: f64) -> Option<f64> {
    let mut min: Option<f64> = None;
    for id in res.actions.ids() {
        if res.actions.get(id).kind != ModelKind::Network {
            continue;
        }
        if let Some(horizon) = res.action_horizon(id) {
            min = Some(min.map_or(horizon, |m| f64::min(m, horizon)));
        }
    }
    min
}

fn actions_update(res: &mut Resources, now: f64, delta: f64, completions: &mut Completions) {
    for id in res.actions.ids() {
        if res.actions.get(id).kind != ModelKind::Network {
            continue;
        }
        if let Some(outcome) = res.advance_action(id, now, delta) {
            completions.push((id, outcome));
        }
    }
}

/// Fair bandwidth sharing over the routed links, with latency paid up front: while the
/// propagation delay runs, the action's variable has weight zero and transfers nothing.
pub(crate) struct SharedNetworkModel {
    pub latency_factor: f64,
    pub bandwidth_factor: f64,
    pub crosstraffic: bool,
}

impl SharedNetworkModel {
    /// Coefficient of one route link for this flow: plain capacity use for wired links,
    /// air-time share for a wifi medium at either end of the route.
    fn link_coeff(
        res: &Resources,
        link_id: LinkId,
        position: usize,
        route_len: usize,
        src: HostId,
        dst: HostId,
        base: f64,
    ) -> f64 {
        let link = res.platform.link(link_id);
        if link.policy != SharingPolicy::Wifi {
            return base;
        }
        assert!(
            position == 0 || position == route_len - 1,
            "wifi link {} must be at the beginning or the end of the route",
            link.name
        );
        let station = if position == 0 { src } else { dst };
        let rate = link.host_rates.get(&station).copied().unwrap_or_else(|| {
            panic!(
                "host {} is not a station of wifi link {}",
                res.platform.host(station).name,
                link.name
            )
        });
        base / rate
    }
}

impl NetworkModel for SharedNetworkModel {
    fn comm_start(
        &self,
        res: &mut Resources,
        activity: ActivityId,
        src: HostId,
        dst: HostId,
        size: f64,
        rate: f64,
        now: f64,
    ) -> Result<ActionId, ActivityError> {
        let (route, base_latency) = match res.platform.routing.route(src, dst) {
            Some(entry) => (entry.links.clone(), entry.latency),
            None if src == dst => (Vec::new(), 0.0),
            None => panic!(
                "no route between {} and {}",
                res.platform.host(src).name,
                res.platform.host(dst).name
            ),
        };
        if route.iter().any(|&l| !res.platform.link(l).is_on) {
            return Err(ActivityError::NetworkFailure);
        }
        if !res.platform.host(src).is_on || !res.platform.host(dst).is_on {
            return Err(ActivityError::HostFailure);
        }

        let latency = base_latency * self.latency_factor;

        // The flow can never go faster than the slowest wired link on its path.
        let mut bound = UNBOUNDED;
        for &link_id in route.iter() {
            let link = res.platform.link(link_id);
            if link.policy == SharingPolicy::Wifi {
                continue;
            }
            let bw = link.bandwidth * link.scale * self.bandwidth_factor;
            bound = if bound <= 0.0 { bw } else { f64::min(bound, bw) };
        }
        if rate > 0.0 {
            bound = if bound <= 0.0 { rate } else { f64::min(bound, rate) };
        }

        let weight = if latency > 0.0 { 0.0 } else { 1.0 };
        let variable = res.system.variable_new(weight, bound);
        let route_len = route.len();
        for (position, &link_id) in route.iter().enumerate() {
            let coeff = Self::link_coeff(res, link_id, position, route_len, src, dst, 1.0);
            res.system.expand(res.platform.link(link_id).constraint, variable, coeff);
        }
        if self.crosstraffic {
            let back = res
                .platform
                .routing
                .route(dst, src)
                .map(|entry| entry.links.clone())
                .unwrap_or_default();
            let back_len = back.len();
            for (position, &link_id) in back.iter().enumerate() {
                let coeff = Self::link_coeff(res, link_id, position, back_len, dst, src, CROSSTRAFFIC_COEFF);
                res.system.expand(res.platform.link(link_id).constraint, variable, coeff);
            }
        }

        // A route with no links transfers instantly once the latency is paid.
        let remaining = if route.is_empty() { 0.0 } else { size };

        Ok(res.actions.insert(Action {
            kind: ModelKind::Network,
            state: ActionState::Started,
            remaining,
            cost: size,
            max_duration: NO_MAX_DURATION,
            sharing_penalty: 1.0,
            suspended: false,
            variable: Some(variable),
            activity,
            latency,
            last_update: now,
            last_value: 0.0,
            hosts: vec![src, dst],
            disk: None,
            links: route,
        }))
    }

    fn next_event(&self, res: &Resources, now: f64) -> Option<f64> {
        let mut min = actions_next_event(res, now);
        let mut consider = |candidate: f64| {
            min = Some(min.map_or(candidate, |m| f64::min(m, candidate)));
        };
        for link in res.platform.links.iter() {
            for cursor in [&link.bandwidth_profile, &link.latency_profile, &link.state_profile]
                .into_iter()
                .flatten()
            {
                if let Some(time) = cursor.next_event_time() {
                    consider(f64::max(time - now, 0.0));
                }
            }
        }
        min
    }

    fn update(
        &self,
        res: &mut Resources,
        now: f64,
        delta: f64,
        completions: &mut Completions,
        toggles: &mut Vec<StateToggle>,
    ) {
        actions_update(res, now, delta, completions);

        let eps = res.precision.work;
        let Resources { system, platform, .. } = res;
        for (idx, link) in platform.links.iter_mut().enumerate() {
            if let Some(cursor) = link.bandwidth_profile.as_mut() {
                let mut fired = false;
                while let Some(scale) = cursor.pop_due(now, eps) {
                    link.scale = scale;
                    fired = true;
                }
                if fired && link.policy != SharingPolicy::Wifi {
                    system.update_constraint_capacity(link.constraint, link.capacity());
                }
            }
            if let Some(cursor) = link.latency_profile.as_mut() {
                while let Some(value) = cursor.pop_due(now, eps) {
                    link.latency = value;
                }
            }
            if let Some(cursor) = link.state_profile.as_mut() {
                while let Some(value) = cursor.pop_due(now, eps) {
                    toggles.push(StateToggle::Link(LinkId(idx), value > 0.0));
                }
            }
        }
    }
}

/// Every transfer completes after the configured constant time, with no contention.
pub(crate) struct ConstantNetworkModel {
    pub duration: f64,
}

impl NetworkModel for ConstantNetworkModel {
    fn comm_start(
        &self,
        res: &mut Resources,
        activity: ActivityId,
        src: HostId,
        dst: HostId,
        size: f64,
        _rate: f64,
        now: f64,
    ) -> Result<ActionId, ActivityError> {
        if !res.platform.host(src).is_on || !res.platform.host(dst).is_on {
            return Err(ActivityError::HostFailure);
        }
        Ok(res.actions.insert(Action {
            kind: ModelKind::Network,
            state: ActionState::Started,
            remaining: self.duration,
            cost: size,
            max_duration: f64::max(self.duration, 0.0),
            sharing_penalty: 1.0,
            suspended: false,
            variable: None,
            activity,
            latency: 0.0,
            last_update: now,
            last_value: 0.0,
            hosts: vec![src, dst],
            disk: None,
            links: Vec::new(),
        }))
    }

    fn next_event(&self, res: &Resources, now: f64) -> Option<f64> {
        actions_next_event(res, now)
    }

    fn update(
        &self,
        res: &mut Resources,
        now: f64,
        delta: f64,
        completions: &mut Completions,
        _toggles: &mut Vec<StateToggle>,
    ) {
        actions_update(res, now, delta, completions);
    }
}
