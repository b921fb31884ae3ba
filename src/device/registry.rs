use std::sync::Mutex;
use indexmap::IndexMap;

use crate::device::types::PeripheralRef;

/**
 * Deduplicated, address-keyed collection of discovered peripherals.
 * Entries keep their first-seen position; a repeated advertisement for the
 * same address replaces the stored value wholesale.
 */
#[derive(Debug)]
pub struct ScanRegistry {
    entries: Mutex<IndexMap<String, PeripheralRef>>,
}

impl ScanRegistry {
    pub fn new() -> ScanRegistry {
        ScanRegistry { entries: Mutex::new(IndexMap::new()) }
    }

    pub fn upsert(&self, peripheral: PeripheralRef) {
        let mut entries = self.entries.lock().expect("Failed to lock ScanRegistry entries");
        entries.insert(peripheral.address.clone(), peripheral);
    }

    pub fn get(&self, address: &str) -> Option<PeripheralRef> {
        let entries = self.entries.lock().expect("Failed to lock ScanRegistry entries");
        entries.get(address).cloned()
    }

    // readers get a copy; an entry may be replaced concurrently by the scan pump
    pub fn snapshot(&self) -> Vec<PeripheralRef> {
        let entries = self.entries.lock().expect("Failed to lock ScanRegistry entries");
        entries.values().cloned().collect()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("Failed to lock ScanRegistry entries");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("Failed to lock ScanRegistry entries");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
