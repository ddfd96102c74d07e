//! Scene object table
//!
//! Object records keyed by stable ids and kept in insertion order, which is
//! the order they are drawn in.

pub mod object_record;

use slotmap::{new_key_type, SlotMap};

pub use object_record::ObjectRecord;

new_key_type! {
    /// Opaque handle returned by `load_mesh`
    pub struct ObjectId;
}

/// Object records in scene order
#[derive(Debug, Default)]
pub struct ObjectTable {
    records: SlotMap<ObjectId, ObjectRecord>,
    order: Vec<ObjectId>,
}

impl ObjectTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record at the end of the scene order
    pub fn insert(&mut self, record: ObjectRecord) -> ObjectId {
        let id = self.records.insert(record);
        self.order.push(id);
        id
    }

    /// Look up a record
    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.records.get(id)
    }

    /// Look up a record for mutation
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ObjectRecord> {
        self.records.get_mut(id)
    }

    /// Remove a record, keeping the order of the others
    pub fn remove(&mut self, id: ObjectId) -> Option<ObjectRecord> {
        let record = self.records.remove(id)?;
        self.order.retain(|other| *other != id);
        Some(record)
    }

    /// Records in scene order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &ObjectRecord)> {
        self.order
            .iter()
            .filter_map(move |id| self.records.get(*id).map(|record| (*id, record)))
    }

    /// Remove every record, in scene order
    pub fn drain(&mut self) -> Vec<ObjectRecord> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.records.remove(id))
            .collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
