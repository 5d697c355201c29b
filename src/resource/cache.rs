//! Read-side cache of decoded resource payloads.
//!
//! Bounded in bytes, strictly LRU. Values are post-unwrap, post-decompress
//! inner payloads so fragment slicing on a hit costs nothing. The assembler
//! never writes here; payloads enter on the download path only.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use uuid::Uuid;

pub struct ResourceCache {
    capacity: u64,
    used: u64,
    entries: HashMap<Uuid, Arc<Vec<u8>>>,
    order: VecDeque<Uuid>,
}

impl ResourceCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, id: &Uuid) -> Option<Arc<Vec<u8>>> {
        let payload = self.entries.get(id)?.clone();
        self.touch(id);
        Some(payload)
    }

    pub fn insert(&mut self, id: Uuid, payload: Arc<Vec<u8>>) {
        if payload.len() as u64 > self.capacity {
            return; // would evict everything and still not fit
        }
        if let Some(previous) = self.entries.insert(id, payload.clone()) {
            self.used -= previous.len() as u64;
            self.touch(&id);
        } else {
            self.order.push_back(id);
        }
        self.used += payload.len() as u64;
        while self.used > self.capacity {
            let Some(victim) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&victim) {
                self.used -= evicted.len() as u64;
            }
        }
    }

    /// Drop one entry (the resource was deleted or rewritten).
    pub fn invalidate(&mut self, id: &Uuid) {
        if let Some(payload) = self.entries.remove(id) {
            self.used -= payload.len() as u64;
            if let Some(pos) = self.order.iter().position(|k| k == id) {
                self.order.remove(pos);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.used = 0;
    }

    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, id: &Uuid) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
            self.order.push_back(*id);
        }
    }
}
