//! Instance registry with hostname index and display order.
//!
//! The registry is the single owner of every [`Instance`] in the session.
//! Remote pushes, REST responses and local placeholders all land here
//! through [`Registry::upsert`], so a record describing the same instance
//! converges on one entity no matter which path delivered it first.
//!
//! # Structure
//!
//! ```text
//! instances:   { "node1" => Instance, "node2" => Instance }
//! by_hostname: { "manager1" => "node1", "worker1" => "node2" }
//!              (a shared hostname points at the most recent holder)
//! order:       [ "node1", "node2" ]        (tab order)
//! selected:    Some("node2")
//! ```
//!
//! Invariants, checked by [`Registry::is_consistent`]:
//! - the key set of `instances` equals the set of names in `order`,
//! - `order` has no duplicates,
//! - every `by_hostname` target is present in `instances`,
//! - `selected`, when set, names an entry of `order`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::instance::{Instance, InstanceRecord};

/// Authoritative store of the session's instances.
#[derive(Debug, Default)]
pub struct Registry {
    /// All instances by name.
    instances: HashMap<String, Instance>,

    /// Reverse index: hostname -> instance name. Lookup only.
    by_hostname: HashMap<String, String>,

    /// Display order of instance names.
    order: Vec<String>,

    /// Currently selected instance name.
    selected: Option<String>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new instance or merge into an existing one.
    ///
    /// New instances get empty buffers, no widget, and are appended to the
    /// display order. Existing instances keep their widget, buffers and
    /// timer; only record fields are merged. A merge confirms a
    /// provisional entity.
    pub fn upsert(&mut self, record: InstanceRecord) -> &mut Instance {
        let name = record.name.clone();

        // Present fields win on merge, so the record's hostname is the new one.
        if let Some(new_hostname) = &record.hostname {
            let replaced = self
                .instances
                .get(&name)
                .and_then(|i| i.hostname.clone())
                .filter(|old| old != new_hostname);
            if let Some(old) = replaced {
                self.unindex_hostname(&old, &name);
            }
            self.by_hostname.insert(new_hostname.clone(), name.clone());
        }

        match self.instances.entry(name) {
            Entry::Occupied(entry) => {
                let instance = entry.into_mut();
                instance.merge(record);
                instance.provisional = false;
                log::trace!("[Registry] Merged record for {}", instance.name);
                instance
            }
            Entry::Vacant(entry) => {
                self.order.push(entry.key().clone());
                log::debug!(
                    "[Registry] Added instance {} ({} total)",
                    entry.key(),
                    self.order.len()
                );
                entry.insert(Instance::from_record(record))
            }
        }
    }

    /// Insert a local creation placeholder under a provisional key.
    pub fn insert_placeholder(&mut self, key: impl Into<String>) -> &mut Instance {
        let key = key.into();
        let instance = self.upsert(InstanceRecord::named(key));
        instance.provisional = true;
        instance
    }

    /// Remove an instance, releasing its timer and widget.
    ///
    /// When the removed instance was selected, selection falls back to the
    /// first remaining instance in display order, or to none.
    pub fn remove(&mut self, name: &str) -> Option<Instance> {
        let mut instance = self.instances.remove(name)?;
        instance.release();

        if let Some(hostname) = &instance.hostname {
            self.unindex_hostname(hostname, name);
        }
        self.order.retain(|n| n != name);

        if self.selected.as_deref() == Some(name) {
            self.selected = self.order.first().cloned();
            log::debug!(
                "[Registry] Selection fell back to {:?} after removing {}",
                self.selected,
                name
            );
        }

        log::debug!("[Registry] Removed instance {} ({} left)", name, self.order.len());
        Some(instance)
    }

    /// Mark an instance as selected. Returns `false` if it is not present.
    pub fn select(&mut self, name: &str) -> bool {
        if !self.instances.contains_key(name) {
            return false;
        }
        self.selected = Some(name.to_string());
        true
    }

    /// Release and drop every instance.
    ///
    /// Returns how many instances were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.instances.len();
        for instance in self.instances.values_mut() {
            instance.release();
        }
        self.instances.clear();
        self.by_hostname.clear();
        self.order.clear();
        self.selected = None;
        count
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    /// Look up by name (mutable).
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.instances.get_mut(name)
    }

    /// Look up by hostname.
    pub fn get_by_hostname(&self, hostname: &str) -> Option<&Instance> {
        self.by_hostname
            .get(hostname)
            .and_then(|name| self.instances.get(name))
    }

    /// Apply `f` to the named instance. Returns `false` if it is absent.
    pub fn update<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut Instance),
    {
        match self.instances.get_mut(name) {
            Some(instance) => {
                f(instance);
                true
            }
            None => false,
        }
    }

    /// Whether an instance with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Name of the selected instance.
    pub fn selected_name(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// The selected instance.
    pub fn selected(&self) -> Option<&Instance> {
        self.selected.as_deref().and_then(|name| self.instances.get(name))
    }

    /// Instance names in display order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Instances in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.order.iter().filter_map(|name| self.instances.get(name))
    }

    /// Instances in arbitrary order (mutable).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        self.instances.values_mut()
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the registry holds no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Check the structural invariants listed in the module docs.
    pub fn is_consistent(&self) -> bool {
        let unique_order = {
            let mut seen = std::collections::HashSet::new();
            self.order.iter().all(|name| seen.insert(name))
        };

        unique_order
            && self.order.len() == self.instances.len()
            && self.order.iter().all(|name| self.instances.contains_key(name))
            && self
                .by_hostname
                .values()
                .all(|name| self.instances.contains_key(name))
            && self
                .selected
                .as_ref()
                .map_or(true, |name| self.order.contains(name))
    }

    /// Drop a hostname entry if it points at `name`.
    ///
    /// Another instance with the same hostname, if any, takes the entry over
    /// (first in display order).
    fn unindex_hostname(&mut self, hostname: &str, name: &str) {
        if self.by_hostname.get(hostname).map(String::as_str) != Some(name) {
            return;
        }
        let heir = self
            .order
            .iter()
            .filter(|n| n.as_str() != name)
            .find(|n| {
                self.instances
                    .get(n.as_str())
                    .is_some_and(|i| i.hostname.as_deref() == Some(hostname))
            })
            .cloned();
        match heir {
            Some(heir) => {
                self.by_hostname.insert(hostname.to_string(), heir);
            }
            None => {
                self.by_hostname.remove(hostname);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> InstanceRecord {
        InstanceRecord::named(name)
            .with_ip("10.0.0.1")
            .with_hostname(format!("{name}-host"))
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut registry = Registry::new();
        let rec = record("node1");

        registry.upsert(rec.clone());
        let once = registry.get("node1").map(Instance::to_record);
        registry.upsert(rec.clone());
        registry.upsert(rec);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), ["node1"]);
        assert_eq!(registry.get("node1").map(Instance::to_record), once);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_placeholder_then_push_yields_one_entity() {
        let mut registry = Registry::new();
        registry.insert_placeholder("node1");
        assert!(registry.get("node1").is_some_and(|i| i.provisional));

        registry.upsert(InstanceRecord::named("node1").with_ip("10.0.0.2"));

        assert_eq!(registry.len(), 1);
        let node = registry.get("node1").expect("node1");
        assert_eq!(node.ip.as_deref(), Some("10.0.0.2"));
        assert!(!node.provisional);
    }

    #[test]
    fn test_remove_selected_falls_back_to_first() {
        let mut registry = Registry::new();
        for name in ["node1", "node2", "node3"] {
            registry.upsert(record(name));
        }
        assert!(registry.select("node1"));

        registry.remove("node1");
        assert_eq!(registry.selected_name(), Some("node2"));

        assert!(registry.select("node3"));
        registry.remove("node3");
        assert_eq!(registry.selected_name(), Some("node2"));

        registry.remove("node2");
        assert_eq!(registry.selected_name(), None);
        assert!(registry.is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_remove_unselected_keeps_selection() {
        let mut registry = Registry::new();
        registry.upsert(record("node1"));
        registry.upsert(record("node2"));
        registry.select("node2");

        registry.remove("node1");
        assert_eq!(registry.selected_name(), Some("node2"));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut registry = Registry::new();
        registry.upsert(record("node1"));
        assert!(registry.remove("ghost").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_select_missing_is_rejected() {
        let mut registry = Registry::new();
        assert!(!registry.select("ghost"));
        assert_eq!(registry.selected_name(), None);
    }

    #[test]
    fn test_hostname_index_follows_merges_and_removal() {
        let mut registry = Registry::new();
        registry.upsert(InstanceRecord::named("node1").with_hostname("manager1"));
        assert_eq!(
            registry.get_by_hostname("manager1").map(|i| i.name.as_str()),
            Some("node1")
        );

        registry.upsert(InstanceRecord::named("node1").with_hostname("manager2"));
        assert!(registry.get_by_hostname("manager1").is_none());
        assert!(registry.get_by_hostname("manager2").is_some());

        registry.remove("node1");
        assert!(registry.get_by_hostname("manager2").is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_shared_hostname_falls_back_to_remaining_holder() {
        let mut registry = Registry::new();
        registry.upsert(InstanceRecord::named("node1").with_hostname("dup"));
        registry.upsert(InstanceRecord::named("node2").with_hostname("dup"));
        assert_eq!(
            registry.get_by_hostname("dup").map(|i| i.name.as_str()),
            Some("node2")
        );

        registry.remove("node2");
        assert_eq!(
            registry.get_by_hostname("dup").map(|i| i.name.as_str()),
            Some("node1")
        );

        // Renaming the host of the remaining holder drops the old entry.
        registry.upsert(InstanceRecord::named("node1").with_hostname("solo"));
        assert!(registry.get_by_hostname("dup").is_none());
        assert!(registry.is_consistent());
    }

    #[tokio::test]
    async fn test_remove_cancels_flush_timer() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut registry = Registry::new();
        let node = registry.upsert(record("node1"));
        crate::input::start_flush_timer(node, std::time::Duration::from_millis(70), tx, || ());
        crate::input::push(node, b"ls");
        assert!(registry.get("node1").is_some_and(Instance::has_flush_timer));

        let removed = registry.remove("node1").expect("node1");
        assert!(!removed.has_flush_timer());
        assert!(removed.pending_input().is_empty());
    }

    #[test]
    fn test_consistency_over_mixed_sequence() {
        let mut registry = Registry::new();
        // Deterministic pseudo-random walk over create/delete operations.
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let name = format!("node{}", seed % 7);
            match seed % 3 {
                0 => {
                    registry.remove(&name);
                }
                1 => {
                    registry.upsert(record(&name));
                }
                _ => {
                    registry.upsert(InstanceRecord::named(&name));
                    registry.select(&name);
                }
            }

            assert!(registry.is_consistent());
            let mut listed: Vec<_> = registry.names().to_vec();
            listed.sort();
            let mut keys: Vec<_> = registry.iter().map(|i| i.name.clone()).collect();
            keys.sort();
            assert_eq!(listed, keys);
        }
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut registry = Registry::new();
        registry.upsert(record("node1"));
        registry.upsert(record("node2"));
        registry.select("node1");

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
        assert_eq!(registry.selected_name(), None);
        assert!(registry.get_by_hostname("node1-host").is_none());
    }

    #[test]
    fn test_update_applies_to_present_only() {
        let mut registry = Registry::new();
        registry.upsert(record("node1"));

        assert!(registry.update("node1", |i| i.status = Some("connect".into())));
        assert!(!registry.update("ghost", |i| i.status = Some("connect".into())));
        assert_eq!(
            registry.get("node1").and_then(|i| i.status.as_deref()),
            Some("connect")
        );
    }
}
