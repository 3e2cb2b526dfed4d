use foldhash::fast::RandomState;
use std::collections::HashMap;

use crate::{NetworkId, codec::Policy, handler::Invoker};

/// A registered function: how many parameters the caller must send and how
/// to run it.
#[derive(Clone, Debug)]
pub struct FunctionEntry {
    pub arity: usize,
    pub signature: Vec<Policy>,
    pub invoker: Invoker,
}

impl FunctionEntry {
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.invoker.is_bound()
    }
}

/// Identifier to function map. The first registration for an identifier wins.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry, RandomState>,
}

impl FunctionRegistry {
    pub fn register(&mut self, identifier: &str, entry: FunctionEntry) -> bool {
        if self.functions.contains_key(identifier) {
            tracing::warn!("function {identifier:?} is already registered");
            return false;
        }
        self.functions.insert(identifier.to_string(), entry);
        true
    }

    /// Entries are never removed; this always returns `false`.
    pub fn unregister(&mut self, identifier: &str) -> bool {
        tracing::debug!("ignoring unregister of {identifier:?}");
        false
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.functions.contains_key(identifier)
    }

    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&FunctionEntry> {
        self.functions.get(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.functions.keys()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys())
            .finish()
    }
}

/// One listener of a signal.
#[derive(Clone, Debug)]
pub struct SlotEntry {
    /// Object the slot is bound to, `None` for free slots.
    pub target: Option<NetworkId>,
    pub sequence: u64,
    pub priority: i32,
    pub invoker: Invoker,
}

/// Listeners of one identifier, highest priority first, then in
/// registration order.
#[derive(Clone, Debug, Default)]
pub struct SlotGroup {
    entries: Vec<SlotEntry>,
}

impl SlotGroup {
    fn insert(&mut self, entry: SlotEntry) {
        let at = self.entries.partition_point(|e| {
            e.priority > entry.priority
                || (e.priority == entry.priority && e.sequence < entry.sequence)
        });
        self.entries.insert(at, entry);
    }

    fn remove_sequence(&mut self, sequence: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.sequence != sequence);
        self.entries.len() != before
    }

    #[must_use]
    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identifier to listener-group map.
#[derive(Default)]
pub struct SlotRegistry {
    groups: HashMap<String, SlotGroup, RandomState>,
    next_sequence: u64,
}

impl SlotRegistry {
    /// Adds a listener; duplicates are kept. Returns its sequence number.
    pub fn register(
        &mut self,
        identifier: &str,
        target: Option<NetworkId>,
        priority: i32,
        invoker: Invoker,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.groups
            .entry(identifier.to_string())
            .or_default()
            .insert(SlotEntry {
                target,
                sequence,
                priority,
                invoker,
            });
        sequence
    }

    /// A copy of the group, so listeners can re-register while it runs.
    #[must_use]
    pub fn snapshot(&self, identifier: &str) -> Option<SlotGroup> {
        self.groups.get(identifier).cloned()
    }

    /// Removes a stale listener from the live group.
    pub fn prune(&mut self, identifier: &str, sequence: u64) -> bool {
        self.groups
            .get_mut(identifier)
            .is_some_and(|group| group.remove_sequence(sequence))
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.groups.contains_key(identifier)
    }

    #[must_use]
    pub fn len(&self, identifier: &str) -> usize {
        self.groups.get(identifier).map_or(0, SlotGroup::len)
    }
}

impl std::fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("groups", &self.groups.keys())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Invoker {
        Invoker::free(|| {})
    }

    #[test]
    fn test_function_first_wins() {
        let mut registry = FunctionRegistry::default();
        let entry = FunctionEntry {
            arity: 0,
            signature: vec![],
            invoker: noop(),
        };
        assert!(registry.register("f", entry.clone()));
        assert!(!registry.register(
            "f",
            FunctionEntry {
                arity: 2,
                ..entry
            }
        ));
        assert_eq!(registry.get("f").unwrap().arity, 0);
        assert!(!registry.unregister("f"));
        assert!(registry.contains("f"));
        assert!(!registry.contains("g"));
    }

    #[test]
    fn test_slot_order() {
        let mut registry = SlotRegistry::default();
        let a = registry.register("evt", None, 0, noop());
        let b = registry.register("evt", None, 5, noop());
        let c = registry.register("evt", None, 0, noop());
        let d = registry.register("evt", None, -1, noop());
        let e = registry.register("evt", None, 5, noop());

        let order: Vec<_> = registry
            .snapshot("evt")
            .unwrap()
            .entries()
            .iter()
            .map(|s| s.sequence)
            .collect();
        assert_eq!(order, vec![b, e, a, c, d]);
        assert_eq!(registry.len("evt"), 5);
    }

    #[test]
    fn test_prune() {
        let mut registry = SlotRegistry::default();
        let a = registry.register("evt", Some(NetworkId(1)), 0, noop());
        registry.register("evt", None, 0, noop());
        let snapshot = registry.snapshot("evt").unwrap();

        assert!(registry.prune("evt", a));
        assert!(!registry.prune("evt", a));
        assert!(!registry.prune("other", a));
        assert_eq!(registry.len("evt"), 1);
        assert_eq!(snapshot.len(), 2);
        assert!(registry.contains("evt"));
        assert_eq!(registry.len("missing"), 0);
    }
}
