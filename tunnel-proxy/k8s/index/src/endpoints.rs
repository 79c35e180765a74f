use crate::{Address, EndpointSet, Index, Subset};
use ahash::AHashSet as HashSet;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use tracing::info_span;
use tunnel_proxy_core::DestinationRef;
use tunnel_proxy_k8s_api::{self as k8s, ResourceExt};

impl IndexNamespacedResource<k8s::Endpoints> for Index {
    fn apply(&mut self, eps: k8s::Endpoints) {
        let namespace = eps.namespace().expect("endpoints must be namespaced");
        let name = eps.name_unchecked();
        let _span = info_span!("apply", %namespace, %name).entered();

        let set = EndpointSet::from_resource(eps);
        let dest = DestinationRef { name, namespace };
        self.endpoints.insert(dest.clone(), set);

        if !self.correlate(&dest) {
            // Expected while the service listing is still streaming in.
            tracing::trace!("no service cached for endpoints");
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let _span = info_span!("delete", %namespace, %name).entered();
        let dest = DestinationRef { name, namespace };
        self.endpoints.remove(&dest);
        self.forget(&dest);
        tracing::debug!("endpoints removed");
    }

    fn reset(&mut self, epss: Vec<k8s::Endpoints>, deleted: NamespacedRemoved) {
        let _span = info_span!("reset").entered();

        let mut prior = self.endpoints.keys().cloned().collect::<HashSet<_>>();
        for eps in epss.into_iter() {
            let dest = DestinationRef {
                name: eps.name_unchecked(),
                namespace: eps.namespace().expect("endpoints must be namespaced"),
            };
            prior.remove(&dest);
            self.apply(eps);
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
            self.endpoints.remove(&dest);
            self.forget(&dest);
        }
    }
}

// === impl EndpointSet ===

impl EndpointSet {
    fn from_resource(eps: k8s::Endpoints) -> Self {
        let subsets = eps
            .subsets
            .into_iter()
            .flatten()
            .map(|subset| Subset {
                addresses: subset
                    .addresses
                    .into_iter()
                    .flatten()
                    .map(|addr| Address {
                        hostname: addr.hostname,
                        // Addresses backed by anything other than a pod are
                        // not dialable and carry no instance.
                        instance: addr.target_ref.and_then(|target| {
                            if target.kind.as_deref() == Some("Pod") {
                                target.name
                            } else {
                                None
                            }
                        }),
                    })
                    .collect(),
                ports: subset
                    .ports
                    .into_iter()
                    .flatten()
                    .filter_map(|p| u16::try_from(p.port).ok())
                    .collect(),
            })
            .collect();
        Self { subsets }
    }
}
