//! Id slot embedded in every bound native object.

use std::cell::Cell;

use crate::ValueError;

/// Write-once slot holding the bridge id of a native object
///
/// The slot is empty until the bridge pairs the object with its script peer.
#[derive(Debug, Default)]
pub struct ObjectId(Cell<Option<u64>>);

impl ObjectId {
    pub fn new() -> Self {
        Self(Cell::new(None))
    }

    pub fn get(&self) -> Option<u64> {
        self.0.get()
    }

    pub fn is_assigned(&self) -> bool {
        self.0.get().is_some()
    }

    /// Assign the id. Fails if one is already present.
    pub fn assign(&self, id: u64) -> Result<(), ValueError> {
        match self.0.get() {
            Some(current) => Err(ValueError::IdAlreadyAssigned(current)),
            None => {
                self.0.set(Some(id));
                Ok(())
            }
        }
    }
}
