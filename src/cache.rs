//! The component cache.
//!
//! A precise map from component signatures to compiled node handles. Unlike
//! a lossy operation cache, an entry here is only ever correct: signatures
//! are compared in full on probe, never just by hash, because a false hit
//! would silently corrupt every count derived from the circuit.
//!
//! A probe that misses *reserves* a slot holding `undef` (`None`): the
//! in-flight component records the location and fills it once compiled.
//! Backjumping can abandon a reservation; [`ComponentCache::erase`] unlinks
//! the slot so the storage is reclaimed by the next [`ComponentCache::clear`]
//! sweep, which compacts the whole table down to the locations the caller
//! still holds and reports where they moved.

use log::debug;

use crate::ccdd::Relabeling;
use crate::reference::NodeId;
use crate::types::Var;
use crate::utils::pairing_seq;

/// Index of a reserved or filled cache slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CacheLoc(u32);

/// Outcome of a probe: a compiled handle, or a slot to fill later.
#[derive(Debug, Copy, Clone)]
pub enum Probe {
    Hit(NodeId),
    Miss(CacheLoc),
}

const NONE: u32 = u32::MAX;

struct Entry {
    hash: u64,
    /// Packed signature: variable count, variable ids, clause ids.
    key: Box<[u32]>,
    value: Option<NodeId>,
    dead: bool,
    next: u32,
}

pub struct ComponentCache {
    entries: Vec<Entry>,
    buckets: Vec<u32>,
    bitmask: u64,
    key_bytes: usize,
    hits: usize,
    misses: usize,
}

fn encode(vars: &[Var], clauses: &[u32]) -> Box<[u32]> {
    let mut key = Vec::with_capacity(1 + vars.len() + clauses.len());
    key.push(vars.len() as u32);
    key.extend(vars.iter().map(|v| v.id()));
    key.extend_from_slice(clauses);
    key.into_boxed_slice()
}

impl ComponentCache {
    pub fn new() -> Self {
        let size = 1usize << 10;
        Self {
            entries: Vec::new(),
            buckets: vec![NONE; size],
            bitmask: (size - 1) as u64,
            key_bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.dead).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Approximate heap footprint in bytes.
    pub fn memory(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
            + self.key_bytes
            + self.buckets.capacity() * 4
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash & self.bitmask) as usize
    }

    /// Two components are the same sub-problem iff they have the same
    /// variable set and the same set of content-addressed clause ids.
    pub fn probe(&mut self, vars: &[Var], clauses: &[u32]) -> Probe {
        let key = encode(vars, clauses);
        let hash = pairing_seq(key.iter().map(|&x| x as u64));
        let bucket = self.bucket_of(hash);

        let mut index = self.buckets[bucket];
        while index != NONE {
            let entry = &self.entries[index as usize];
            if !entry.dead && entry.hash == hash && entry.key == key {
                return match entry.value {
                    Some(node) => {
                        self.hits += 1;
                        Probe::Hit(node)
                    }
                    // A reservation someone upstream holds; reuse it rather
                    // than aliasing the signature.
                    None => {
                        self.misses += 1;
                        Probe::Miss(CacheLoc(index))
                    }
                };
            }
            index = entry.next;
        }

        self.misses += 1;
        let index = self.entries.len() as u32;
        self.key_bytes += key.len() * 4;
        self.entries.push(Entry {
            hash,
            key,
            value: None,
            dead: false,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = index;
        if self.entries.len() > self.buckets.len() * 2 {
            self.grow();
        }
        Probe::Miss(CacheLoc(index))
    }

    /// Fill a reserved slot.
    pub fn write(&mut self, loc: CacheLoc, node: NodeId) {
        let entry = &mut self.entries[loc.0 as usize];
        debug_assert!(!entry.dead, "write to an erased slot");
        debug_assert!(entry.value.is_none(), "slot written twice");
        entry.value = Some(node);
    }

    /// Abandon a reservation (the component will never be compiled on this
    /// path). The storage is reclaimed by the next `clear`.
    pub fn erase(&mut self, loc: CacheLoc) {
        let index = loc.0;
        let entry = &mut self.entries[index as usize];
        debug_assert!(entry.value.is_none(), "erasing a resolved slot");
        entry.dead = true;

        // Unlink so the signature can be re-reserved later.
        let bucket = self.bucket_of(self.entries[index as usize].hash);
        let mut cursor = self.buckets[bucket];
        if cursor == index {
            self.buckets[bucket] = self.entries[index as usize].next;
            return;
        }
        while cursor != NONE {
            let next = self.entries[cursor as usize].next;
            if next == index {
                self.entries[cursor as usize].next = self.entries[index as usize].next;
                return;
            }
            cursor = next;
        }
    }

    fn grow(&mut self) {
        let size = self.buckets.len() * 2;
        self.buckets = vec![NONE; size];
        self.bitmask = (size - 1) as u64;
        for index in 0..self.entries.len() {
            if self.entries[index].dead {
                continue;
            }
            let bucket = self.bucket_of(self.entries[index].hash);
            self.entries[index].next = self.buckets[bucket];
            self.buckets[bucket] = index as u32;
        }
    }

    /// Drop every entry except the locations in `keep` (the reservations
    /// live search frames still point at) and compact the storage. Returns
    /// the new location of each kept slot, in order.
    pub fn clear(&mut self, keep: &[CacheLoc]) -> Vec<CacheLoc> {
        debug!("cache: clearing {} entries, keeping {}", self.entries.len(), keep.len());
        let mut kept: Vec<Entry> = Vec::with_capacity(keep.len());
        let mut new_locs = Vec::with_capacity(keep.len());
        let mut key_bytes = 0;
        for &loc in keep {
            let old = &mut self.entries[loc.0 as usize];
            debug_assert!(!old.dead, "keeping an erased slot");
            new_locs.push(CacheLoc(kept.len() as u32));
            key_bytes += old.key.len() * 4;
            kept.push(Entry {
                hash: old.hash,
                key: std::mem::take(&mut old.key),
                value: old.value,
                dead: false,
                next: NONE,
            });
        }
        self.entries = kept;
        self.key_bytes = key_bytes;
        self.buckets = vec![NONE; self.buckets.len()];
        for index in 0..self.entries.len() {
            let bucket = self.bucket_of(self.entries[index].hash);
            self.entries[index].next = self.buckets[bucket];
            self.buckets[bucket] = index as u32;
        }
        new_locs
    }

    /// Live compiled handles, for garbage-collection marking.
    pub fn values(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.dead)
            .filter_map(|e| e.value)
    }

    /// Rewrite stored handles after a node-store compaction.
    pub fn relabel_values(&mut self, relabeling: &Relabeling) {
        for entry in &mut self.entries {
            if entry.dead {
                continue;
            }
            if let Some(value) = entry.value {
                entry.value = Some(relabeling.remap(value));
            }
        }
    }
}

impl Default for ComponentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(ids: &[u32]) -> Vec<Var> {
        ids.iter().map(|&v| Var::new(v)).collect()
    }

    #[test]
    fn test_probe_reserve_write_hit() {
        let mut cache = ComponentCache::new();
        let vs = vars(&[1, 2]);
        let loc = match cache.probe(&vs, &[0, 1]) {
            Probe::Miss(loc) => loc,
            Probe::Hit(_) => panic!("fresh probe hit"),
        };
        cache.write(loc, NodeId::new(42));
        match cache.probe(&vs, &[0, 1]) {
            Probe::Hit(node) => assert_eq!(node, NodeId::new(42)),
            Probe::Miss(_) => panic!("expected hit"),
        }
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_distinct_signatures() {
        let mut cache = ComponentCache::new();
        // Same clause ids, different variable sets: different sub-problems.
        let a = cache.probe(&vars(&[1, 2]), &[7]);
        let b = cache.probe(&vars(&[1, 3]), &[7]);
        match (a, b) {
            (Probe::Miss(la), Probe::Miss(lb)) => assert_ne!(la, lb),
            _ => panic!("expected two misses"),
        }
    }

    #[test]
    fn test_reserved_slot_is_reused() {
        let mut cache = ComponentCache::new();
        let vs = vars(&[1]);
        let first = match cache.probe(&vs, &[3]) {
            Probe::Miss(loc) => loc,
            _ => panic!(),
        };
        let second = match cache.probe(&vs, &[3]) {
            Probe::Miss(loc) => loc,
            _ => panic!(),
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_erase_allows_fresh_reservation() {
        let mut cache = ComponentCache::new();
        let vs = vars(&[1]);
        let loc = match cache.probe(&vs, &[3]) {
            Probe::Miss(loc) => loc,
            _ => panic!(),
        };
        cache.erase(loc);
        let fresh = match cache.probe(&vs, &[3]) {
            Probe::Miss(loc) => loc,
            _ => panic!(),
        };
        assert_ne!(loc, fresh);
    }

    #[test]
    fn test_clear_keeps_and_relocates() {
        let mut cache = ComponentCache::new();
        let filled = match cache.probe(&vars(&[1]), &[0]) {
            Probe::Miss(loc) => loc,
            _ => panic!(),
        };
        cache.write(filled, NodeId::new(9));
        let reserved = match cache.probe(&vars(&[2]), &[1]) {
            Probe::Miss(loc) => loc,
            _ => panic!(),
        };

        let new_locs = cache.clear(&[reserved]);
        assert_eq!(new_locs.len(), 1);
        assert_eq!(cache.len(), 1);
        // The filled entry is gone; its signature misses now.
        assert!(matches!(cache.probe(&vars(&[1]), &[0]), Probe::Miss(_)));
        // The kept reservation is still writable at its new location.
        cache.write(new_locs[0], NodeId::new(5));
        match cache.probe(&vars(&[2]), &[1]) {
            Probe::Hit(node) => assert_eq!(node, NodeId::new(5)),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn test_growth() {
        let mut cache = ComponentCache::new();
        for i in 0..5000u32 {
            let loc = match cache.probe(&vars(&[1]), &[i]) {
                Probe::Miss(loc) => loc,
                _ => panic!(),
            };
            cache.write(loc, NodeId::new(i));
        }
        for i in 0..5000u32 {
            match cache.probe(&vars(&[1]), &[i]) {
                Probe::Hit(node) => assert_eq!(node, NodeId::new(i)),
                _ => panic!("lost entry {}", i),
            }
        }
    }
}
