//! Consumer reference counting.
//!
//! The count decides when a connection may exist: only while it is above
//! zero. The driver reacts to the two edge transitions reported here.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefCount(usize);

impl RefCount {
    pub fn new() -> Self {
        Self(0)
    }

    /// Add a consumer. Returns `true` on the 0 → 1 transition.
    pub fn acquire(&mut self) -> bool {
        self.0 = self.0.saturating_add(1);
        self.0 == 1
    }

    /// Remove a consumer, clamped at zero. Returns `true` only on the
    /// 1 → 0 transition; releasing at zero is a no-op.
    pub fn release(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        self.0 == 0
    }

    pub fn get(&self) -> usize {
        self.0
    }

    pub fn is_active(&self) -> bool {
        self.0 > 0
    }
}
