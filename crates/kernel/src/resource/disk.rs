//! Disk model: read and write operations fairly sharing the disk's three constraints.

use platsim_maxmin::UNBOUNDED;

use crate::activity::ActivityId;
use crate::error::ActivityError;
use crate::platform::{DiskId, OpType};
use crate::resource::{
    Action, ActionId, ActionState, Completions, ModelKind, Resources, StateToggle, NO_MAX_DURATION,
};

pub(crate) struct DiskModel;

impl DiskModel {
    /// Installs an I/O operation touching the aggregate constraint and whichever of the
    /// read/write constraints matches the operation type.
    pub fn io_start(
        &self,
        res: &mut Resources,
        activity: ActivityId,
        disk_id: DiskId,
        size: f64,
        op: OpType,
        now: f64,
    ) -> Result<ActionId, ActivityError> {
        let disk = res.platform.disk(disk_id);
        if !disk.is_on {
            return Err(ActivityError::StorageFailure);
        }
        let host = disk.host;
        let aggregate = disk.aggregate_constraint;
        let direction = match op {
            OpType::Read => disk.read_constraint,
            OpType::Write => disk.write_constraint,
        };
        let variable = res.system.variable_new(1.0, UNBOUNDED);
        res.system.expand(aggregate, variable, 1.0);
        res.system.expand(direction, variable, 1.0);
        Ok(res.actions.insert(Action {
            kind: ModelKind::Disk,
            state: ActionState::Started,
            remaining: size,
            cost: size,
            max_duration: NO_MAX_DURATION,
            sharing_penalty: 1.0,
            suspended: false,
            variable: Some(variable),
            activity,
            latency: 0.0,
            last_update: now,
            last_value: 0.0,
            hosts: vec![host],
            disk: Some(disk_id),
            links: Vec::new(),
        }))
    }

    pub fn next_event(&self, res: &Resources, now: f64) -> Option<f64> {
        let mut min: Option<f64> = None;
        let mut consider = |candidate: f64| {
            min = Some(min.map_or(candidate, |m| f64::min(m, candidate)));
        };
        for id in res.actions.ids() {
            if res.actions.get(id).kind != ModelKind::Disk {
                continue;
            }
            if let Some(horizon) = res.action_horizon(id) {
                consider(horizon);
            }
        }
        for disk in res.platform.disks.iter() {
            for cursor in [&disk.read_bw_profile, &disk.write_bw_profile, &disk.state_profile]
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

    pub fn update(
        &self,
        res: &mut Resources,
        now: f64,
        delta: f64,
        completions: &mut Completions,
        toggles: &mut Vec<StateToggle>,
    ) {
        for id in res.actions.ids() {
            if res.actions.get(id).kind != ModelKind::Disk {
                continue;
            }
            if let Some(outcome) = res.advance_action(id, now, delta) {
                completions.push((id, outcome));
            }
        }

        let eps = res.precision.work;
        let Resources { system, platform, .. } = res;
        for (idx, disk) in platform.disks.iter_mut().enumerate() {
            let mut fired = false;
            if let Some(cursor) = disk.read_bw_profile.as_mut() {
                while let Some(scale) = cursor.pop_due(now, eps) {
                    disk.read_scale = scale;
                    fired = true;
                }
            }
            if let Some(cursor) = disk.write_bw_profile.as_mut() {
                while let Some(scale) = cursor.pop_due(now, eps) {
                    disk.write_scale = scale;
                    fired = true;
                }
            }
            if fired {
                system.update_constraint_capacity(disk.read_constraint, disk.read_capacity());
                system.update_constraint_capacity(disk.write_constraint, disk.write_capacity());
                system.update_constraint_capacity(disk.aggregate_constraint, disk.aggregate_capacity());
            }
            if let Some(cursor) = disk.state_profile.as_mut() {
                while let Some(value) = cursor.pop_due(now, eps) {
                    toggles.push(StateToggle::Disk(DiskId(idx), value > 0.0));
                }
            }
        }
    }
}
