//! Chained-bucket hash-consing table.
//!
//! The table is an append-only arena plus an intrusive chain index: a value
//! inserted twice returns the same index both times. Buckets double when the
//! load factor passes 2 and the chains are rebuilt from cached hashes, which
//! also makes whole-table reconstruction after garbage collection cheap
//! ([`Table::from_vec`]).

use crate::utils::MyHash;

const NONE: u32 = u32::MAX;

pub struct Table<T> {
    values: Vec<T>,
    hashes: Vec<u64>,
    buckets: Vec<u32>,
    next: Vec<u32>,
    bitmask: u64,
}

impl<T> Table<T>
where
    T: MyHash + Eq,
{
    /// Create a new table with `2^bits` initial buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits >= 1 && bits <= 31, "Bucket bits should be in the range 1..=31");
        let size = 1usize << bits;
        Self {
            values: Vec::new(),
            hashes: Vec::new(),
            buckets: vec![NONE; size],
            next: Vec::new(),
            bitmask: (size - 1) as u64,
        }
    }

    /// Rebuild a table around an existing value vector (e.g. the survivors
    /// of a compaction pass).
    pub fn from_vec(values: Vec<T>) -> Self {
        let mut bits = 4;
        while (1usize << bits) < values.len() {
            bits += 1;
        }
        let mut table = Table::new(bits + 1);
        for value in values {
            let hash = value.hash();
            table.values.push(value);
            table.hashes.push(hash);
        }
        table.rebuild();
        table
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: u32) -> &T {
        &self.values[index as usize]
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Heap footprint of the table bookkeeping itself, in bytes. Values with
    /// their own heap storage are the caller's to account for.
    pub fn memory(&self) -> usize {
        self.values.capacity() * std::mem::size_of::<T>()
            + self.hashes.capacity() * 8
            + self.buckets.capacity() * 4
            + self.next.capacity() * 4
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash & self.bitmask) as usize
    }

    /// Look up a value without inserting it.
    pub fn get(&self, value: &T) -> Option<u32> {
        let hash = value.hash();
        let mut index = self.buckets[self.bucket_of(hash)];
        while index != NONE {
            if self.hashes[index as usize] == hash && &self.values[index as usize] == value {
                return Some(index);
            }
            index = self.next[index as usize];
        }
        None
    }

    /// Insert a value, returning its index and whether it was new. A
    /// duplicate is dropped on the spot and the existing index returned.
    pub fn put(&mut self, value: T) -> (u32, bool) {
        let hash = value.hash();
        let bucket = self.bucket_of(hash);
        let mut index = self.buckets[bucket];
        while index != NONE {
            if self.hashes[index as usize] == hash && self.values[index as usize] == value {
                return (index, false);
            }
            index = self.next[index as usize];
        }

        let index = self.values.len() as u32;
        assert!(index != NONE, "Table is full");
        self.values.push(value);
        self.hashes.push(hash);
        self.next.push(self.buckets[bucket]);
        self.buckets[bucket] = index;

        if self.values.len() > self.buckets.len() * 2 {
            self.grow();
        }
        (index, true)
    }

    fn grow(&mut self) {
        let size = self.buckets.len() * 2;
        self.buckets = vec![NONE; size];
        self.bitmask = (size - 1) as u64;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.buckets.fill(NONE);
        self.next.resize(self.values.len(), NONE);
        for index in 0..self.values.len() {
            let bucket = self.bucket_of(self.hashes[index]);
            self.next[index] = self.buckets[bucket];
            self.buckets[bucket] = index as u32;
        }
    }
}
