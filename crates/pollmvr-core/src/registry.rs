//! Device registry: the merge point for every discoverer.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::record::{DeviceKey, DeviceRecord};

/// Result of merging one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Default)]
struct Inner {
    order: Vec<DeviceKey>,
    records: HashMap<DeviceKey, DeviceRecord>,
}

/// Identity key to record, in arrival order. Safe to share between threads.
#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`, or fold it into the record already under its key.
    ///
    /// Optional fields present in `record` replace the stored ones, absent
    /// ones keep the stored value. The name is replaced when non-empty. The
    /// fixture reference is kept unless `record` carries its own.
    pub fn merge(&self, record: DeviceRecord) -> MergeOutcome {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let Some(existing) = inner.records.get_mut(&record.key) else {
            inner.order.push(record.key.clone());
            inner.records.insert(record.key.clone(), record);
            return MergeOutcome::Inserted;
        };

        let before = existing.clone();
        if !record.name.is_empty() {
            existing.name = record.name;
        }
        existing.source = record.source;
        fold(&mut existing.ip, record.ip);
        fold(&mut existing.bus, record.bus);
        fold(&mut existing.universe, record.universe);
        fold(&mut existing.address, record.address);
        fold(&mut existing.manufacturer, record.manufacturer);
        fold(&mut existing.model, record.model);
        fold(&mut existing.rdm, record.rdm);
        fold(&mut existing.fixture_ref, record.fixture_ref);

        if *existing == before {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Updated
        }
    }

    /// Copy of all records in arrival order.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|key| inner.records.get(key).cloned())
            .collect()
    }

    /// Attach a collaborator's fixture reference. False for an unknown key.
    pub fn annotate(&self, key: &DeviceKey, fixture_ref: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.records.get_mut(key) {
            Some(record) => {
                record.fixture_ref = Some(fixture_ref.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &DeviceKey) -> Option<DeviceRecord> {
        self.inner.lock().unwrap().records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.order.clear();
        inner.records.clear();
    }
}

fn fold<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}
