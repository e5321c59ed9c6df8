/// Holds a live backend (device + context) across a driver teardown/recreate cycle.
///
/// Owned by whatever orchestrates backend switching. Nothing is stored implicitly:
/// `Pipeline::shutdown` stores, `Pipeline::with_cache` takes.
#[derive(Debug)]
pub struct ContextCache<T> {
    slot: Option<T>,
}

impl<T> Default for ContextCache<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> ContextCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, handing back whatever was cached before.
    pub fn store(&mut self, value: T) -> Option<T> {
        self.slot.replace(value)
    }

    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
