//! Maintains the hostname lookup table consulted for every proxied
//! connection.
//!
//! Two watches feed the index: `Service` events carry a destination's
//! addressing mode and port list, `Endpoints` events the live instances
//! behind it. The two streams arrive independently and in no particular
//! order, so each event stores its half in the index and re-correlates the
//! pair; once both halves are cached, the destination's synthesized hostname
//! variants are (re)installed in the shared address table:
//!
//! ```text
//! [ Service ] ──┐
//!               ├── correlate ──> table: "name[.ns[.svc[.cluster.local]]]:port"
//! [ Endpoints ]─┘
//! ```
//!
//! A destination with a stable virtual address gets one target per service
//! port, aggregating every backing instance. A headless destination gets one
//! target per (subset, port), keyed by each instance's hostname label so
//! clients can address instances individually.
//!
//! The table is the only state shared with connection handling: lookups are
//! unbounded concurrent reads, and each update replaces a destination's full
//! key set under one write lock.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod endpoints;
mod service;
mod table;


pub use self::table::Reader;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tunnel_proxy_core::{DestinationRef, ForwardTarget};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Cluster-level settings that shape key synthesis.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The namespace whose destinations also get short, unqualified keys.
    pub default_namespace: String,
}

/// Holds all indexing state. Owned and updated by the watch tasks, publishing
/// results to the shared address table for per-connection lookups.
#[derive(Debug)]
pub struct Index {
    /// Service halves of every known pairing.
    services: HashMap<DestinationRef, SvcMeta>,

    /// Endpoints halves of every known pairing.
    endpoints: HashMap<DestinationRef, EndpointSet>,

    table: table::Writer,

    cluster: Arc<ClusterInfo>,
}

/// The parts of a `Service` the proxy cares about.
#[derive(Debug, PartialEq)]
struct SvcMeta {
    /// Set when the service has no stable virtual address (`clusterIP: None`)
    /// and its instances are addressed individually.
    headless: bool,

    ports: Vec<u16>,
}

/// The instance sets behind a destination, one entry per endpoint subset.
#[derive(Debug, Default, PartialEq)]
struct EndpointSet {
    subsets: Vec<Subset>,
}

#[derive(Debug, PartialEq)]
struct Subset {
    addresses: Vec<Address>,
    ports: Vec<u16>,
}

/// One endpoint address. `instance` is set only when the address is backed by
/// a recognized unit kind; `hostname` names the address in headless variants.
#[derive(Debug, PartialEq)]
struct Address {
    hostname: Option<String>,
    instance: Option<String>,
}

// === impl Index ===

impl Index {
    pub fn shared(cluster: impl Into<Arc<ClusterInfo>>) -> (Reader, SharedIndex) {
        let (writer, reader) = table::pair();
        let idx = Self {
            services: HashMap::default(),
            endpoints: HashMap::default(),
            table: writer,
            cluster: cluster.into(),
        };
        (reader, Arc::new(RwLock::new(idx)))
    }

    /// Recomputes and reinstalls the key set for `dest`.
    ///
    /// Returns false when the other half of the pairing is not yet cached; in
    /// that case nothing changes and the next event for the missing half
    /// retries the pairing.
    fn correlate(&mut self, dest: &DestinationRef) -> bool {
        let (svc, eps) = match (self.services.get(dest), self.endpoints.get(dest)) {
            (Some(svc), Some(eps)) => (svc, eps),
            _ => return false,
        };

        let entries = if svc.headless {
            headless_entries(&self.cluster, dest, eps)
        } else {
            addressed_entries(&self.cluster, dest, svc, eps)
        };

        tracing::debug!(keys = entries.len(), "installing forwarding keys");
        self.table.replace(dest, entries);
        true
    }

    /// Drops every key installed for `dest`.
    fn forget(&mut self, dest: &DestinationRef) {
        self.table.remove(dest);
    }
}

// === helpers ===

/// One target per service port, aggregating the backed instances of every
/// subset in discovery order.
fn addressed_entries(
    cluster: &ClusterInfo,
    dest: &DestinationRef,
    svc: &SvcMeta,
    eps: &EndpointSet,
) -> Vec<(String, Arc<ForwardTarget>)> {
    let instances = eps
        .subsets
        .iter()
        .flat_map(|subset| subset.addresses.iter())
        .filter_map(|addr| addr.instance.clone())
        .collect::<Vec<_>>();

    let mut entries = Vec::new();
    for &port in &svc.ports {
        let target = Arc::new(ForwardTarget {
            namespace: dest.namespace.clone(),
            instances: instances.clone(),
            port,
        });
        for key in named_variants(cluster, dest, None, port) {
            entries.push((key, target.clone()));
        }
    }
    entries
}

/// One target per (subset, port), holding exactly that subset's backed
/// instances and keyed by the subset's hostname labels. Instances of one
/// subset are never reachable through another subset's hostnames.
fn headless_entries(
    cluster: &ClusterInfo,
    dest: &DestinationRef,
    eps: &EndpointSet,
) -> Vec<(String, Arc<ForwardTarget>)> {
    let mut entries = Vec::new();
    for subset in &eps.subsets {
        let instances = subset
            .addresses
            .iter()
            .filter_map(|addr| addr.instance.clone())
            .collect::<Vec<_>>();

        for &port in &subset.ports {
            let target = Arc::new(ForwardTarget {
                namespace: dest.namespace.clone(),
                instances: instances.clone(),
                port,
            });
            for addr in &subset.addresses {
                let Some(hostname) = addr.hostname.as_deref() else {
                    continue;
                };
                for key in named_variants(cluster, dest, Some(hostname), port) {
                    entries.push((key, target.clone()));
                }
            }
        }
    }
    entries
}

/// Synthesizes the hostname variants for one destination and port, prefixed
/// with an instance hostname in headless mode. The short variant is reserved
/// for the configured default namespace.
fn named_variants(
    cluster: &ClusterInfo,
    dest: &DestinationRef,
    hostname: Option<&str>,
    port: u16,
) -> Vec<String> {
    let DestinationRef { name, namespace } = dest;
    let base = match hostname {
        Some(h) => format!("{h}.{name}"),
        None => name.clone(),
    };

    let mut keys = Vec::with_capacity(4);
    if *namespace == cluster.default_namespace {
        keys.push(format!("{base}:{port}"));
    }
    keys.push(format!("{base}.{namespace}:{port}"));
    keys.push(format!("{base}.{namespace}.svc:{port}"));
    keys.push(format!("{base}.{namespace}.svc.cluster.local:{port}"));
    keys
}
