//! Non-queuing busy flag.

use std::sync::atomic::{AtomicBool, Ordering};

/// Try-lock that never waits: a second caller is told it is busy.
#[derive(Debug, Default)]
pub struct BusyGate {
    busy: AtomicBool,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate, or `None` if someone already holds it.
    ///
    /// The gate is released when the returned guard is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_session::gate::BusyGate;
    ///
    /// let gate = BusyGate::new();
    /// let guard = gate.try_acquire().expect("gate is free");
    /// assert!(gate.try_acquire().is_none());
    /// drop(guard);
    /// assert!(!gate.is_busy());
    /// ```
    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Holds a [`BusyGate`] until dropped.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct BusyGuard<'a> {
    gate: &'a BusyGate,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_on_early_return() {
        fn fails(gate: &BusyGate) -> Result<(), &'static str> {
            let _guard = gate.try_acquire().ok_or("busy")?;
            Err("hardware failed")
        }

        let gate = BusyGate::new();
        assert_eq!(fails(&gate), Err("hardware failed"));
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_released_on_panic() {
        let gate = BusyGate::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = gate.try_acquire();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!gate.is_busy());
    }
}
