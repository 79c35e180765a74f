use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tunnel_proxy_core::{DestinationRef, ForwardTarget};

/// Installs and removes forwarding keys. Held only by the index.
#[derive(Clone, Debug, Default)]
pub(crate) struct Writer(Shared);

/// Supports lookups in the shared key map. Cheap to clone into every
/// connection-handling task.
#[derive(Clone, Debug, Default)]
pub struct Reader(Shared);

type Shared = Arc<RwLock<Table>>;

#[derive(Debug, Default)]
struct Table {
    by_key: HashMap<String, Arc<ForwardTarget>>,

    /// The keys currently installed per destination, so a re-resolution can
    /// drop stale variants and a deletion can clear the destination entirely.
    by_dest: HashMap<DestinationRef, Vec<String>>,
}

pub(crate) fn pair() -> (Writer, Reader) {
    let shared = Shared::default();
    let w = Writer(shared.clone());
    let r = Reader(shared);
    (w, r)
}

// === impl Writer ===

impl Writer {
    /// Replaces the full key set of `dest`.
    ///
    /// The destination's prior keys are removed and the new entries installed
    /// under a single write lock, so readers observe the swap atomically per
    /// destination.
    pub(crate) fn replace(
        &mut self,
        dest: &DestinationRef,
        entries: Vec<(String, Arc<ForwardTarget>)>,
    ) {
        let mut table = self.0.write();
        if let Some(stale) = table.by_dest.remove(dest) {
            for key in stale {
                table.by_key.remove(&key);
            }
        }

        let keys = entries.iter().map(|(key, _)| key.clone()).collect();
        for (key, target) in entries {
            table.by_key.insert(key, target);
        }
        table.by_dest.insert(dest.clone(), keys);
    }

    /// Removes every key installed for `dest`.
    pub(crate) fn remove(&mut self, dest: &DestinationRef) {
        let mut table = self.0.write();
        if let Some(keys) = table.by_dest.remove(dest) {
            for key in keys {
                table.by_key.remove(&key);
            }
        }
    }
}

// === impl Reader ===

impl Reader {
    #[inline]
    pub fn lookup(&self, key: &str) -> Option<Arc<ForwardTarget>> {
        self.0.read().by_key.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(name: &str) -> DestinationRef {
        DestinationRef {
            name: name.to_string(),
            namespace: "default".to_string(),
        }
    }

    fn target(instances: &[&str]) -> Arc<ForwardTarget> {
        Arc::new(ForwardTarget {
            namespace: "default".to_string(),
            instances: instances.iter().map(ToString::to_string).collect(),
            port: 80,
        })
    }

    #[test]
    fn replace_drops_stale_variants() {
        let (mut writer, reader) = pair();
        let web = dest("web");

        writer.replace(&web, vec![("web:80".to_string(), target(&["web-0"]))]);
        assert!(reader.lookup("web:80").is_some());

        writer.replace(&web, vec![("web:8080".to_string(), target(&["web-0"]))]);
        assert!(reader.lookup("web:80").is_none(), "stale key must be gone");
        assert!(reader.lookup("web:8080").is_some());
    }

    #[test]
    fn remove_clears_all_keys() {
        let (mut writer, reader) = pair();
        let web = dest("web");

        writer.replace(
            &web,
            vec![
                ("web:80".to_string(), target(&["web-0"])),
                ("web.default:80".to_string(), target(&["web-0"])),
            ],
        );
        writer.remove(&web);

        assert!(reader.lookup("web:80").is_none());
        assert!(reader.lookup("web.default:80").is_none());
    }

    /// Readers racing a writer must only ever observe a complete target
    /// value, never a mix of two.
    #[test]
    fn concurrent_lookups_never_tear() {
        let (mut writer, reader) = pair();
        let web = dest("web");
        let old = target(&["web-0"]);
        let new = target(&["web-1", "web-2"]);

        writer.replace(&web, vec![("web:80".to_string(), old.clone())]);

        let readers = (0..4)
            .map(|_| {
                let reader = reader.clone();
                let (old, new) = (old.clone(), new.clone());
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let seen = reader.lookup("web:80").expect("key must stay installed");
                        assert!(
                            *seen == *old || *seen == *new,
                            "observed a torn target: {seen:?}"
                        );
                    }
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..1000 {
            writer.replace(&web, vec![("web:80".to_string(), new.clone())]);
            writer.replace(&web, vec![("web:80".to_string(), old.clone())]);
        }

        for handle in readers {
            handle.join().expect("reader must not panic");
        }
    }
}
