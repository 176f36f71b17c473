//! The process-wide volume registry: one process-wide table of every
//! `Volume`, partitioned by lifecycle state so `volume_list` queries
//! don't have to scan the whole table.

use super::{
    error::{self, Result},
    volume::{Volume, VolumeState},
};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// `all` is the source of truth for name lookup; `online`/`configuring`/
/// `offline` mirror it, partitioned by state, so `list()` is a single map
/// iteration rather than a full scan with a per-volume state check. A
/// volume's entry moves between these maps only through [`VolumeRegistry`]
/// methods -- `Volume::set_state` itself does not touch the registry, so
/// any caller that flips a volume's state directly must follow up with
/// [`VolumeRegistry::resync`] or the partitions go stale.
#[derive(Default)]
struct Lists {
    all: HashMap<String, Arc<Volume>>,
    online: HashMap<String, Arc<Volume>>,
    configuring: HashMap<String, Arc<Volume>>,
    offline: HashMap<String, Arc<Volume>>,
}

impl Lists {
    fn category_mut(&mut self, state: VolumeState) -> &mut HashMap<String, Arc<Volume>> {
        match state {
            VolumeState::Online => &mut self.online,
            VolumeState::Configuring => &mut self.configuring,
            VolumeState::Offline => &mut self.offline,
        }
    }

    /// Removes `name` from whichever of the three state partitions
    /// currently holds it. At most one will, but checking all three is
    /// cheaper than also tracking which one.
    fn remove_from_partitions(&mut self, name: &str) {
        self.online.remove(name);
        self.configuring.remove(name);
        self.offline.remove(name);
    }
}

/// Owns every `Volume` the process knows about. Reads take a shared lock;
/// mutations (create/delete/state transition) are expected to come from
/// the control thread.
#[derive(Default)]
pub struct VolumeRegistry {
    lists: RwLock<Lists>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: &str, declared_replicas: usize) -> Result<Arc<Volume>> {
        let mut lists = self.lists.write();
        if lists.all.contains_key(name) {
            return error::NameExists {
                name: name.to_string(),
            }
            .fail();
        }
        let volume = Volume::new(name, declared_replicas);
        lists.all.insert(name.to_string(), volume.clone());
        lists.configuring.insert(name.to_string(), volume.clone());
        Ok(volume)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Volume>> {
        self.lists
            .read()
            .all
            .get(name)
            .cloned()
            .ok_or_else(|| {
                error::NotFound {
                    name: name.to_string(),
                }
                .build()
            })
    }

    /// Removes `name` from the registry. Callers must have already driven
    /// the volume to Offline (or it was never more than Configuring with
    /// no remaining replicas) -- the registry itself does not enforce the
    /// state machine, only membership.
    pub fn forget(&self, name: &str) -> Result<()> {
        let mut lists = self.lists.write();
        if lists.all.remove(name).is_none() {
            return error::NotFound {
                name: name.to_string(),
            }
            .fail();
        }
        lists.remove_from_partitions(name);
        Ok(())
    }

    /// Moves `volume`'s entry into the state partition matching its
    /// current `state()`. Must be called after anything moves a volume
    /// between Configuring/Online/Offline outside of `create`/`forget`,
    /// e.g. a replica attach that brings the volume online, or a delete
    /// that takes it offline.
    pub fn resync(&self, volume: &Arc<Volume>) {
        let mut lists = self.lists.write();
        if !lists.all.contains_key(&volume.name) {
            return;
        }
        lists.remove_from_partitions(&volume.name);
        lists
            .category_mut(volume.state())
            .insert(volume.name.clone(), volume.clone());
    }

    pub fn list(&self, category: ListCategory) -> Vec<Arc<Volume>> {
        let lists = self.lists.read();
        match category {
            ListCategory::All => lists.all.values().cloned().collect(),
            ListCategory::Online => lists.online.values().cloned().collect(),
            ListCategory::Configuring => lists.configuring.values().cloned().collect(),
            ListCategory::Offline => lists.offline.values().cloned().collect(),
        }
    }
}

/// The `volume_list` query categories.
#[derive(Debug, Copy, Clone, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ListCategory {
    All,
    Online,
    Configuring,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_delete_returns_to_pre_create_state() {
        let registry = VolumeRegistry::new();
        registry.create("v1", 1).unwrap();
        assert!(registry.lookup("v1").is_ok());
        registry.forget("v1").unwrap();
        assert!(matches!(registry.lookup("v1").unwrap_err(), error::Error::NotFound { .. }));
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let registry = VolumeRegistry::new();
        registry.create("v1", 1).unwrap();
        let err = registry.create("v1", 2).unwrap_err();
        assert!(matches!(err, error::Error::NameExists { .. }));
    }

    #[test]
    fn forget_unknown_name_fails_not_found() {
        let registry = VolumeRegistry::new();
        assert!(matches!(registry.forget("ghost").unwrap_err(), error::Error::NotFound { .. }));
    }

    #[test]
    fn create_places_a_new_volume_in_the_configuring_partition() {
        let registry = VolumeRegistry::new();
        registry.create("a", 1).unwrap();
        assert_eq!(registry.list(ListCategory::Configuring).len(), 1);
        assert_eq!(registry.list(ListCategory::Online).len(), 0);
        assert_eq!(registry.list(ListCategory::All).len(), 1);
    }

    #[test]
    fn resync_moves_a_volume_between_partitions_as_its_state_changes() {
        let registry = VolumeRegistry::new();
        let a = registry.create("a", 1).unwrap();
        let b = registry.create("b", 1).unwrap();
        b.set_state(VolumeState::Online);
        registry.resync(&b);

        assert_eq!(registry.list(ListCategory::All).len(), 2);
        assert_eq!(registry.list(ListCategory::Online).len(), 1);
        assert_eq!(registry.list(ListCategory::Configuring).len(), 1);

        b.set_state(VolumeState::Offline);
        registry.resync(&b);
        assert_eq!(registry.list(ListCategory::Online).len(), 0);
        assert_eq!(registry.list(ListCategory::Offline).len(), 1);
        let _ = a;
    }

    #[test]
    fn forget_removes_an_online_volume_from_its_partition_too() {
        let registry = VolumeRegistry::new();
        let a = registry.create("a", 1).unwrap();
        a.set_state(VolumeState::Online);
        registry.resync(&a);
        registry.forget("a").unwrap();
        assert_eq!(registry.list(ListCategory::Online).len(), 0);
        assert_eq!(registry.list(ListCategory::All).len(), 0);
    }

    #[test]
    fn list_category_parses_known_names_only() {
        assert_eq!("online".parse::<ListCategory>().unwrap(), ListCategory::Online);
        assert!("bogus".parse::<ListCategory>().is_err());
    }
}
