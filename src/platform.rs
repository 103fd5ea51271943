//! Simulated hardware: hosts, links, storages and the routes between hosts.
//!
//! The platform owns one CPU constraint per host, one network constraint
//! per shared link and a read and a write constraint per storage, all
//! registered in the [`ResourceModel`]. Fat-pipe links have no constraint of
//! their own; they only cap each flow's rate.

use std::collections::HashMap;

use crate::config::{ConfigError, ConfigResult, LinkSharing, PlatformConfig};
use crate::error::{SimError, SimResult};
use crate::resource::{ResourceId, ResourceModel};
use crate::storage::Storage;
use crate::types::{Bytes, HostId, LinkId, SimTime, StorageId};

/// A physical host.
#[derive(Clone, Debug)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    /// Speed of one core, in flops per second.
    pub speed: f64,
    pub cores: u32,
    /// Memory available to VMs; `None` means unlimited.
    pub ram: Option<Bytes>,
    /// Whether the host is powered on.
    pub on: bool,
    pub(crate) cpu: ResourceId,
}

impl Host {
    /// Aggregate CPU capacity, `speed × cores`.
    pub fn capacity(&self) -> f64 {
        self.speed * self.cores as f64
    }
}

/// A network link.
#[derive(Clone, Debug)]
pub struct Link {
    pub id: LinkId,
    pub name: String,
    pub bandwidth: f64,
    pub latency: SimTime,
    pub sharing: LinkSharing,
    pub(crate) resource: Option<ResourceId>,
}

/// A resolved path between two hosts, ready to start a transfer on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Route {
    /// Links crossed, in order.
    pub links: Vec<LinkId>,
    /// Sum of the links' latencies.
    pub latency: SimTime,
    pub(crate) resources: Vec<ResourceId>,
    pub(crate) bound: Option<f64>,
}

/// Hosts, links, storages and routing table.
#[derive(Debug, Default)]
pub struct Platform {
    hosts: Vec<Host>,
    host_index: HashMap<String, HostId>,
    links: Vec<Link>,
    storages: Vec<Storage>,
    storage_index: HashMap<String, StorageId>,
    routes: HashMap<(HostId, HostId), Vec<LinkId>>,
    default_route: Option<Vec<LinkId>>,
}

impl Platform {
    /// Builds the platform described by `config`, registering its constraints.
    pub(crate) fn build(config: &PlatformConfig, resources: &mut ResourceModel) -> ConfigResult<Self> {
        let mut platform = Platform::default();

        for h in &config.hosts {
            let id = HostId(platform.hosts.len() as u32);
            let cpu = resources.add_constraint(format!("{}:cpu", h.name), h.speed * h.cores as f64);
            platform.host_index.insert(h.name.clone(), id);
            platform.hosts.push(Host {
                id,
                name: h.name.clone(),
                speed: h.speed,
                cores: h.cores,
                ram: h.ram,
                on: true,
                cpu,
            });
        }

        let mut link_index = HashMap::new();
        for l in &config.links {
            let id = LinkId(platform.links.len() as u32);
            let resource = match l.sharing {
                LinkSharing::Shared => Some(resources.add_constraint(l.name.clone(), l.bandwidth)),
                LinkSharing::Fatpipe => None,
            };
            link_index.insert(l.name.clone(), id);
            platform.links.push(Link {
                id,
                name: l.name.clone(),
                bandwidth: l.bandwidth,
                latency: l.latency,
                sharing: l.sharing,
                resource,
            });
        }

        let resolve = |names: &[String]| -> ConfigResult<Vec<LinkId>> {
            names
                .iter()
                .map(|n| {
                    link_index
                        .get(n)
                        .copied()
                        .ok_or_else(|| ConfigError::Validation(format!("unknown link: {}", n)))
                })
                .collect()
        };

        for r in &config.routes {
            let src = platform.host_id(&r.src).map_err(|e| ConfigError::Validation(e.to_string()))?;
            let dst = platform.host_id(&r.dst).map_err(|e| ConfigError::Validation(e.to_string()))?;
            let links = resolve(&r.links)?;
            if r.symmetrical {
                let mut back = links.clone();
                back.reverse();
                platform.routes.entry((dst, src)).or_insert(back);
            }
            platform.routes.insert((src, dst), links);
        }

        if let Some(default) = &config.default_route {
            platform.default_route = Some(resolve(default)?);
        }

        for st in &config.storages {
            let id = StorageId(platform.storages.len() as u32);
            let host = platform
                .host_id(&st.host)
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
            let read = resources.add_constraint(format!("{}:read", st.name), st.read_bandwidth);
            let write = resources.add_constraint(format!("{}:write", st.name), st.write_bandwidth);
            platform.storage_index.insert(st.name.clone(), id);
            platform.storages.push(Storage::new(
                id,
                st.name.clone(),
                host,
                st.size,
                read,
                write,
                &st.content,
            ));
        }

        Ok(platform)
    }

    /// Looks a host up by name.
    pub fn host_id(&self, name: &str) -> SimResult<HostId> {
        self.host_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownHost(name.to_string()))
    }

    /// Returns a host.
    pub fn host(&self, id: HostId) -> SimResult<&Host> {
        self.hosts
            .get(id.0 as usize)
            .ok_or_else(|| SimError::UnknownHost(id.to_string()))
    }

    pub(crate) fn host_mut(&mut self, id: HostId) -> SimResult<&mut Host> {
        self.hosts
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimError::UnknownHost(id.to_string()))
    }

    /// All hosts, in declaration order.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// All links, in declaration order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Looks a storage up by name.
    pub fn storage_id(&self, name: &str) -> SimResult<StorageId> {
        self.storage_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownStorage(name.to_string()))
    }

    pub fn storage(&self, id: StorageId) -> SimResult<&Storage> {
        self.storages
            .get(id.0 as usize)
            .ok_or_else(|| SimError::UnknownStorage(id.to_string()))
    }

    pub(crate) fn storage_mut(&mut self, id: StorageId) -> SimResult<&mut Storage> {
        self.storages
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimError::UnknownStorage(id.to_string()))
    }

    /// All storages, in declaration order.
    pub fn storages(&self) -> &[Storage] {
        &self.storages
    }

    /// Resolves the route from `src` to `dst`.
    ///
    /// A host talking to itself uses an empty route. Other pairs use their
    /// declared route, then the default route; with neither, the call fails
    /// with [`SimError::NoRoute`].
    pub fn route(&self, src: HostId, dst: HostId) -> SimResult<Route> {
        let links = if src == dst {
            self.routes.get(&(src, dst)).cloned().unwrap_or_default()
        } else {
            match self.routes.get(&(src, dst)).or(self.default_route.as_ref()) {
                Some(links) => links.clone(),
                None => {
                    return Err(SimError::NoRoute {
                        src: self.host(src)?.name.clone(),
                        dst: self.host(dst)?.name.clone(),
                    })
                }
            }
        };

        let mut route = Route::default();
        for id in &links {
            let link = &self.links[id.0 as usize];
            route.latency += link.latency;
            match link.resource {
                Some(r) => route.resources.push(r),
                None => {
                    route.bound = Some(route.bound.map_or(link.bandwidth, |b| b.min(link.bandwidth)));
                }
            }
        }
        route.links = links;
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformBuilder;

    fn platform() -> (Platform, ResourceModel) {
        let config = PlatformBuilder::new()
            .host("a", 1e9, 2)
            .host("b", 2e9, 1)
            .host("c", 1e9, 1)
            .link("l1", 1e6, 0.25)
            .fatpipe("fp", 5e5, 0.5)
            .route("a", "b", &["l1", "fp"])
            .storage("disk", "c", 1e9, 1e8, 5e7)
            .file("disk", "/boot", 1e6)
            .build()
            .unwrap();
        let mut resources = ResourceModel::new();
        let platform = Platform::build(&config, &mut resources).unwrap();
        (platform, resources)
    }

    #[test]
    fn test_hosts() {
        let (p, r) = platform();
        let a = p.host_id("a").unwrap();
        assert_eq!(p.host(a).unwrap().capacity(), 2e9);
        assert_eq!(r.capacity(p.host(a).unwrap().cpu), 2e9);
        assert!(matches!(p.host_id("zz"), Err(SimError::UnknownHost(_))));
    }

    #[test]
    fn test_route_latency_and_bound() {
        let (p, _) = platform();
        let a = p.host_id("a").unwrap();
        let b = p.host_id("b").unwrap();
        let route = p.route(a, b).unwrap();
        assert_eq!(route.latency, 0.75);
        assert_eq!(route.resources.len(), 1);
        assert_eq!(route.bound, Some(5e5));
    }

    #[test]
    fn test_symmetrical_route() {
        let (p, _) = platform();
        let a = p.host_id("a").unwrap();
        let b = p.host_id("b").unwrap();
        let forward = p.route(a, b).unwrap();
        let back = p.route(b, a).unwrap();
        let mut reversed = forward.links.clone();
        reversed.reverse();
        assert_eq!(back.links, reversed);
    }

    #[test]
    fn test_same_host_route_is_empty() {
        let (p, _) = platform();
        let c = p.host_id("c").unwrap();
        let route = p.route(c, c).unwrap();
        assert!(route.links.is_empty());
        assert_eq!(route.latency, 0.0);
    }

    #[test]
    fn test_storage_constraints() {
        let (p, r) = platform();
        let id = p.storage_id("disk").unwrap();
        let disk = p.storage(id).unwrap();
        assert_eq!(disk.host, p.host_id("c").unwrap());
        assert_eq!(r.capacity(disk.read), 1e8);
        assert_eq!(r.capacity(disk.write), 5e7);
        assert_eq!(disk.used(), 1e6);
        assert!(matches!(p.storage_id("tape"), Err(SimError::UnknownStorage(_))));
    }

    #[test]
    fn test_no_route() {
        let (p, _) = platform();
        let a = p.host_id("a").unwrap();
        let c = p.host_id("c").unwrap();
        assert!(matches!(p.route(a, c), Err(SimError::NoRoute { .. })));
    }
}
