use crate::{Index, SvcMeta};
use ahash::AHashSet as HashSet;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use tracing::info_span;
use tunnel_proxy_core::DestinationRef;
use tunnel_proxy_k8s_api::{self as k8s, ResourceExt};

impl IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, svc: k8s::Service) {
        let namespace = svc.namespace().expect("service must be namespaced");
        let name = svc.name_unchecked();
        let _span = info_span!("apply", %namespace, %name).entered();

        let meta = SvcMeta::from_spec(svc.spec.unwrap_or_default());
        let dest = DestinationRef { name, namespace };
        self.services.insert(dest.clone(), meta);

        if !self.correlate(&dest) {
            tracing::warn!("no endpoints cached for service");
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let _span = info_span!("delete", %namespace, %name).entered();
        let dest = DestinationRef { name, namespace };
        self.services.remove(&dest);
        self.forget(&dest);
        tracing::debug!("service removed");
    }

    fn reset(&mut self, svcs: Vec<k8s::Service>, deleted: NamespacedRemoved) {
        let _span = info_span!("reset").entered();

        // Track destinations that disappeared while the watch was down.
        let mut prior = self.services.keys().cloned().collect::<HashSet<_>>();
        for svc in svcs.into_iter() {
            let dest = DestinationRef {
                name: svc.name_unchecked(),
                namespace: svc.namespace().expect("service must be namespaced"),
            };
            prior.remove(&dest);
            self.apply(svc);
        }
        for (namespace, names) in deleted.into_iter() {
            for name in names.into_iter() {
                prior.insert(DestinationRef {
                    name,
                    namespace: namespace.clone(),
                });
            }
        }
        for dest in prior.into_iter() {
            self.services.remove(&dest);
            self.forget(&dest);
        }
    }
}

// === impl SvcMeta ===

impl SvcMeta {
    fn from_spec(spec: k8s::ServiceSpec) -> Self {
        let headless = spec.cluster_ip.as_deref() == Some("None");
        let ports = spec
            .ports
            .into_iter()
            .flatten()
            .filter_map(|p| u16::try_from(p.port).ok())
            .collect();
        Self { headless, ports }
    }
}
