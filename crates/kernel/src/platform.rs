//! The modeled platform: hosts, disks and links, plus its serde description.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use platsim_maxmin::{ConstraintId, System};

use crate::actor::ActorId;
use crate::error::EngineError;
use crate::profile::{Profile, ProfileCursor};
use crate::routing::{FullRouting, Routing};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub usize);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// How a link shares its bandwidth between flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingPolicy {
    /// Max-min fair sharing (default).
    Shared,
    /// No sharing: every flow gets the full bandwidth.
    Fatpipe,
    /// Two independent half-duplex sub-links, one per direction.
    Splitduplex,
    /// A single radio medium shared in time; stations have individual rates.
    Wifi,
}

/// Direction of an I/O operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Read,
    Write,
}

pub(crate) struct Host {
    pub name: String,
    pub speeds: Vec<f64>,
    pub pstate: usize,
    pub cores: u32,
    pub speed_scale: f64,
    pub is_on: bool,
    pub constraint: ConstraintId,
    pub disks: Vec<DiskId>,
    pub actors: Vec<ActorId>,
    pub speed_profile: Option<ProfileCursor>,
    pub state_profile: Option<ProfileCursor>,
}

impl Host {
    pub fn speed(&self) -> f64 {
        self.speeds[self.pstate]
    }

    /// Computing capacity currently offered to the solver.
    pub fn capacity(&self) -> f64 {
        if self.is_on {
            self.cores as f64 * self.speed() * self.speed_scale
        } else {
            0.0
        }
    }
}

pub(crate) struct Disk {
    pub name: String,
    pub host: HostId,
    pub read_bw: f64,
    pub write_bw: f64,
    pub read_scale: f64,
    pub write_scale: f64,
    pub is_on: bool,
    pub read_constraint: ConstraintId,
    pub write_constraint: ConstraintId,
    pub aggregate_constraint: ConstraintId,
    pub read_bw_profile: Option<ProfileCursor>,
    pub write_bw_profile: Option<ProfileCursor>,
    pub state_profile: Option<ProfileCursor>,
}

impl Disk {
    pub fn read_capacity(&self) -> f64 {
        self.read_bw * self.read_scale
    }

    pub fn write_capacity(&self) -> f64 {
        self.write_bw * self.write_scale
    }

    pub fn aggregate_capacity(&self) -> f64 {
        f64::max(self.read_capacity(), self.write_capacity())
    }
}

pub(crate) struct Link {
    pub name: String,
    pub bandwidth: f64,
    pub scale: f64,
    pub latency: f64,
    pub policy: SharingPolicy,
    pub is_on: bool,
    pub constraint: ConstraintId,
    pub host_rates: BTreeMap<HostId, f64>,
    pub bandwidth_profile: Option<ProfileCursor>,
    pub latency_profile: Option<ProfileCursor>,
    pub state_profile: Option<ProfileCursor>,
}

impl Link {
    /// Capacity offered to the solver. A wifi medium is shared in time: flows consume
    /// `1/station_rate` of it per transferred byte, so its capacity is one second of air.
    pub fn capacity(&self) -> f64 {
        match self.policy {
            SharingPolicy::Wifi => 1.0,
            _ => self.bandwidth * self.scale,
        }
    }
}

pub(crate) struct Platform {
    pub hosts: Vec<Host>,
    pub disks: Vec<Disk>,
    pub links: Vec<Link>,
    host_index: BTreeMap<String, HostId>,
    disk_index: BTreeMap<String, DiskId>,
    link_index: BTreeMap<String, LinkId>,
    pub routing: Box<dyn Routing>,
}

impl Platform {
    /// A platform with no resources, used before any description is loaded.
    pub fn empty() -> Platform {
        Platform {
            hosts: Vec::new(),
            disks: Vec::new(),
            links: Vec::new(),
            host_index: BTreeMap::new(),
            disk_index: BTreeMap::new(),
            link_index: BTreeMap::new(),
            routing: Box::new(FullRouting::new()),
        }
    }

    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.0]
    }

    pub fn host_mut(&mut self, id: HostId) -> &mut Host {
        &mut self.hosts[id.0]
    }

    pub fn disk(&self, id: DiskId) -> &Disk {
        &self.disks[id.0]
    }

    pub fn disk_mut(&mut self, id: DiskId) -> &mut Disk {
        &mut self.disks[id.0]
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id.0]
    }

    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.host_index.get(name).copied()
    }

    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        self.disk_index.get(name).copied()
    }

    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.link_index.get(name).copied()
    }
}

/// One disk attached to a host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskConfig {
    pub name: String,
    pub read_bw: f64,
    pub write_bw: f64,
    #[serde(default)]
    pub read_bw_profile: Option<Profile>,
    #[serde(default)]
    pub write_bw_profile: Option<Profile>,
    #[serde(default)]
    pub state_profile: Option<Profile>,
}

/// One compute host. Either a single `speed` or a `speeds` p-state vector must be given.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub speeds: Option<Vec<f64>>,
    #[serde(default = "default_cores")]
    pub cores: u32,
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
    #[serde(default)]
    pub speed_profile: Option<Profile>,
    #[serde(default)]
    pub state_profile: Option<Profile>,
}

fn default_cores() -> u32 {
    1
}

/// One network link. A splitduplex link materializes as `<name>_UP` and `<name>_DOWN`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub bandwidth: f64,
    #[serde(default)]
    pub latency: f64,
    #[serde(default = "default_policy")]
    pub policy: SharingPolicy,
    /// Per-station rates for wifi links, keyed by host name.
    #[serde(default)]
    pub host_rates: BTreeMap<String, f64>,
    #[serde(default)]
    pub bandwidth_profile: Option<Profile>,
    #[serde(default)]
    pub latency_profile: Option<Profile>,
    #[serde(default)]
    pub state_profile: Option<Profile>,
}

fn default_policy() -> SharingPolicy {
    SharingPolicy::Shared
}

/// An explicit route between two hosts. Latency is the sum of the link latencies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteConfig {
    pub src: String,
    pub dst: String,
    pub links: Vec<String>,
    #[serde(default = "default_symmetric")]
    pub symmetric: bool,
}

fn default_symmetric() -> bool {
    true
}

/// The whole platform description, loadable from YAML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl PlatformConfig {
    pub fn from_yaml<P: AsRef<Path>>(file: P) -> Self {
        serde_yaml::from_str(
            &std::fs::read_to_string(&file).unwrap_or_else(|_| panic!("Can't read file {}", file.as_ref().display())),
        )
        .unwrap_or_else(|e| panic!("Can't parse YAML from file {}: {e:?}", file.as_ref().display()))
    }
}

impl Platform {
    /// Instantiates the platform, registering one constraint per CPU, three per disk and
    /// one per materialized link in the given solver system.
    pub fn build(config: &PlatformConfig, system: &mut System, now: f64) -> Result<Platform, EngineError> {
        let mut platform = Platform {
            hosts: Vec::new(),
            disks: Vec::new(),
            links: Vec::new(),
            host_index: BTreeMap::new(),
            disk_index: BTreeMap::new(),
            link_index: BTreeMap::new(),
            routing: Box::new(FullRouting::new()),
        };

        for host_config in config.hosts.iter() {
            let speeds = match (&host_config.speeds, host_config.speed) {
                (Some(speeds), _) if !speeds.is_empty() => speeds.clone(),
                (None, Some(speed)) => vec![speed],
                _ => {
                    return Err(EngineError::Config(format!(
                        "host {} needs a speed or a non-empty speeds vector",
                        host_config.name
                    )))
                }
            };
            let host_id = HostId(platform.hosts.len());
            if platform.host_index.insert(host_config.name.clone(), host_id).is_some() {
                return Err(EngineError::Config(format!("duplicate host name {}", host_config.name)));
            }
            let capacity = host_config.cores as f64 * speeds[0];
            let constraint = system.constraint_new(capacity, true);
            let mut host = Host {
                name: host_config.name.clone(),
                speeds,
                pstate: 0,
                cores: host_config.cores,
                speed_scale: 1.0,
                is_on: true,
                constraint,
                disks: Vec::new(),
                actors: Vec::new(),
                speed_profile: host_config
                    .speed_profile
                    .clone()
                    .map(|profile| ProfileCursor::new(profile, now)),
                state_profile: host_config
                    .state_profile
                    .clone()
                    .map(|profile| ProfileCursor::new(profile, now)),
            };
            for disk_config in host_config.disks.iter() {
                let disk_id = DiskId(platform.disks.len());
                if platform.disk_index.insert(disk_config.name.clone(), disk_id).is_some() {
                    return Err(EngineError::Config(format!("duplicate disk name {}", disk_config.name)));
                }
                platform.disks.push(Disk {
                    name: disk_config.name.clone(),
                    host: host_id,
                    read_bw: disk_config.read_bw,
                    write_bw: disk_config.write_bw,
                    read_scale: 1.0,
                    write_scale: 1.0,
                    is_on: true,
                    read_constraint: system.constraint_new(disk_config.read_bw, true),
                    write_constraint: system.constraint_new(disk_config.write_bw, true),
                    aggregate_constraint: system
                        .constraint_new(f64::max(disk_config.read_bw, disk_config.write_bw), true),
                    read_bw_profile: disk_config
                        .read_bw_profile
                        .clone()
                        .map(|profile| ProfileCursor::new(profile, now)),
                    write_bw_profile: disk_config
                        .write_bw_profile
                        .clone()
                        .map(|profile| ProfileCursor::new(profile, now)),
                    state_profile: disk_config
                        .state_profile
                        .clone()
                        .map(|profile| ProfileCursor::new(profile, now)),
                });
                host.disks.push(disk_id);
            }
            platform.hosts.push(host);
        }

        for link_config in config.links.iter() {
            match link_config.policy {
                SharingPolicy::Splitduplex => {
                    for suffix in ["_UP", "_DOWN"] {
                        let name = format!("{}{}", link_config.name, suffix);
                        platform.add_link(&name, link_config, SharingPolicy::Shared, system, now)?;
                    }
                }
                policy => {
                    platform.add_link(&link_config.name.clone(), link_config, policy, system, now)?;
                }
            }
        }

        let mut routing = FullRouting::new();
        for route in config.routes.iter() {
            let src = platform
                .host_by_name(&route.src)
                .ok_or_else(|| EngineError::Config(format!("route references unknown host {}", route.src)))?;
            let dst = platform
                .host_by_name(&route.dst)
                .ok_or_else(|| EngineError::Config(format!("route references unknown host {}", route.dst)))?;
            let mut links = Vec::new();
            let mut latency = 0.0;
            for link_name in route.links.iter() {
                let link_id = platform
                    .link_by_name(link_name)
                    .ok_or_else(|| EngineError::Config(format!("route references unknown link {}", link_name)))?;
                latency += platform.link(link_id).latency;
                links.push(link_id);
            }
            routing.add_route(src, dst, links, latency, route.symmetric);
        }
        platform.routing = Box::new(routing);

        Ok(platform)
    }

    fn add_link(
        &mut self,
        name: &str,
        config: &LinkConfig,
        policy: SharingPolicy,
        system: &mut System,
        now: f64,
    ) -> Result<(), EngineError> {
        let link_id = LinkId(self.links.len());
        if self.link_index.insert(name.to_string(), link_id).is_some() {
            return Err(EngineError::Config(format!("duplicate link name {}", name)));
        }
        let mut host_rates = BTreeMap::new();
        for (host_name, rate) in config.host_rates.iter() {
            let host = self
                .host_by_name(host_name)
                .ok_or_else(|| EngineError::Config(format!("wifi link {} references unknown host {}", name, host_name)))?;
            host_rates.insert(host, *rate);
        }
        let shared = policy != SharingPolicy::Fatpipe;
        let capacity = match policy {
            SharingPolicy::Wifi => 1.0,
            _ => config.bandwidth,
        };
        self.links.push(Link {
            name: name.to_string(),
            bandwidth: config.bandwidth,
            scale: 1.0,
            latency: config.latency,
            policy,
            is_on: true,
            constraint: system.constraint_new(capacity, shared),
            host_rates,
            bandwidth_profile: config
                .bandwidth_profile
                .clone()
                .map(|profile| ProfileCursor::new(profile, now)),
            latency_profile: config
                .latency_profile
                .clone()
                .map(|profile| ProfileCursor::new(profile, now)),
            state_profile: config
                .state_profile
                .clone()
                .map(|profile| ProfileCursor::new(profile, now)),
        });
        Ok(())
    }
}
