//! Modify-lock table
//!
//! Maps a placement to the exchange currently holding edit rights. There
//! is at most one holder per placement, and a release only succeeds for the
//! exchange that actually holds the lock.

use std::collections::HashMap;

use blueprint_core::PlacementId;

use crate::exchange::ExchangeId;

#[derive(Debug, Default)]
pub struct ModifyLockTable {
    holders: HashMap<PlacementId, ExchangeId>,
}

impl ModifyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, placement: &PlacementId) -> Option<ExchangeId> {
        self.holders.get(placement).copied()
    }

    /// Record `exchange` as the holder, or return the existing holder
    pub fn try_acquire(
        &mut self,
        placement: PlacementId,
        exchange: ExchangeId,
    ) -> Result<(), ExchangeId> {
        match self.holders.get(&placement) {
            Some(current) if *current != exchange => Err(*current),
            _ => {
                self.holders.insert(placement, exchange);
                Ok(())
            }
        }
    }

    /// Remove the entry only if `exchange` is still the holder
    pub fn release_if_holder(&mut self, placement: &PlacementId, exchange: ExchangeId) -> bool {
        if self.holders.get(placement) == Some(&exchange) {
            self.holders.remove(placement);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_holder_wins() {
        let mut table = ModifyLockTable::new();
        let p = PlacementId::from_u128(1);
        assert!(table.try_acquire(p, ExchangeId(1)).is_ok());
        assert_eq!(table.try_acquire(p, ExchangeId(2)), Err(ExchangeId(1)));
        assert_eq!(table.holder(&p), Some(ExchangeId(1)));
        assert!(table.try_acquire(p, ExchangeId(1)).is_ok());
    }

    #[test]
    fn test_stale_release_keeps_newer_holder() {
        let mut table = ModifyLockTable::new();
        let p = PlacementId::from_u128(1);
        table.try_acquire(p, ExchangeId(1)).unwrap();
        assert!(table.release_if_holder(&p, ExchangeId(1)));
        table.try_acquire(p, ExchangeId(2)).unwrap();

        assert!(!table.release_if_holder(&p, ExchangeId(1)));
        assert_eq!(table.holder(&p), Some(ExchangeId(2)));
        assert_eq!(table.len(), 1);
    }
}
