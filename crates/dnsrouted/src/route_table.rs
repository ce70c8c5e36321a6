//! Route lifecycle bookkeeping
//!
//! Pure state for the routing manager: pending requests awaiting kernel
//! confirmation, active routes with their expiration, and an expiry index
//! ordered by expiration time. No I/O happens here; the manager decides what
//! to push to the kernel from the outcomes returned by each operation.
//!
//! Invariants:
//! - a destination is in at most one of pending / active
//! - every active entry has exactly one expiry mark with the same expiration

use dnsroute_types::IpAddress;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Expiry index key, ordered by expiration then destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpiryMark {
    pub expiration: u64,
    pub dest: IpAddress,
}

impl fmt::Display for ExpiryMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dest={},exp={}", self.dest, self.expiration)
    }
}

/// Request waiting for the kernel to confirm installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRoute {
    pub expiration: u64,
    pub retries: u32,
}

/// Result of [`RouteTable::request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Entry is pending; routes should be pushed
    Pending { expiration: u64 },
    /// Active route lifetime extended, kernel untouched
    Extended { from: u64, to: u64 },
    /// Active route already outlives the request
    Duplicate { existing: u64 },
}

/// Result of [`RouteTable::confirm_add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAddOutcome {
    Activated { expiration: u64 },
    /// No pending entry existed; activated with the fallback expiration
    Unexpected { expiration: u64 },
    AlreadyActive,
}

/// Result of [`RouteTable::confirm_del`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDelOutcome {
    /// Active route removed behind our back, pending again
    Rearmed { expiration: u64 },
    NotActive,
}

/// Work produced by one retry pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryPass {
    /// Pending destinations to push again
    pub retry: Vec<IpAddress>,
    /// Destinations moved to active after exhausting their retries
    pub finalized: Vec<ExpiryMark>,
}

/// Entry counts for diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteStats {
    pub pending: usize,
    pub active: usize,
    pub expiry_marks: usize,
}

impl fmt::Display for RouteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} active={} expiry={}",
            self.pending, self.active, self.expiry_marks
        )
    }
}

/// Maximum number of routes a sweep may remove: `ceil(active * percent / 100)`,
/// at least 1.
pub fn sweep_cap(active: usize, percent: u32) -> usize {
    let scaled = active.saturating_mul(percent as usize);
    scaled.div_ceil(100).max(1)
}

#[derive(Debug, Default)]
pub struct RouteTable {
    pending: BTreeMap<IpAddress, PendingRoute>,
    active: BTreeMap<IpAddress, u64>,
    expiry: BTreeSet<ExpiryMark>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request for `dest` that should live until `expiration`.
    ///
    /// A repeated request for a pending destination keeps the later of the
    /// two expirations and resets the retry counter.
    pub fn request(&mut self, dest: IpAddress, expiration: u64) -> RequestOutcome {
        if let Some(&current) = self.active.get(&dest) {
            if expiration > current {
                self.set_active(dest, expiration);
                return RequestOutcome::Extended {
                    from: current,
                    to: expiration,
                };
            }
            return RequestOutcome::Duplicate { existing: current };
        }

        let entry = self.pending.entry(dest).or_insert(PendingRoute {
            expiration,
            retries: 0,
        });
        entry.expiration = entry.expiration.max(expiration);
        entry.retries = 0;
        RequestOutcome::Pending {
            expiration: entry.expiration,
        }
    }

    /// Kernel confirmed installation of `dest`.
    pub fn confirm_add(&mut self, dest: IpAddress, fallback_expiration: u64) -> ConfirmAddOutcome {
        if self.active.contains_key(&dest) {
            return ConfirmAddOutcome::AlreadyActive;
        }
        match self.pending.remove(&dest) {
            Some(pending) => {
                self.set_active(dest, pending.expiration);
                ConfirmAddOutcome::Activated {
                    expiration: pending.expiration,
                }
            }
            None => {
                self.set_active(dest, fallback_expiration);
                ConfirmAddOutcome::Unexpected {
                    expiration: fallback_expiration,
                }
            }
        }
    }

    /// Kernel reported removal of `dest`.
    pub fn confirm_del(&mut self, dest: IpAddress) -> ConfirmDelOutcome {
        match self.active.remove(&dest) {
            Some(expiration) => {
                self.expiry.remove(&ExpiryMark { expiration, dest });
                self.pending.insert(
                    dest,
                    PendingRoute {
                        expiration,
                        retries: 0,
                    },
                );
                ConfirmDelOutcome::Rearmed { expiration }
            }
            None => ConfirmDelOutcome::NotActive,
        }
    }

    /// Bumps the retry counter of every pending entry, finalizing the ones
    /// that already reached `max_retries`.
    pub fn retry_pass(&mut self, max_retries: u32) -> RetryPass {
        let mut pass = RetryPass::default();
        for (dest, pending) in self.pending.iter_mut() {
            if pending.retries >= max_retries {
                pass.finalized.push(ExpiryMark {
                    expiration: pending.expiration,
                    dest: *dest,
                });
            } else {
                pending.retries += 1;
                pass.retry.push(*dest);
            }
        }
        for mark in &pass.finalized {
            self.pending.remove(&mark.dest);
            self.set_active(mark.dest, mark.expiration);
        }
        pass
    }

    /// Removes expired active routes in expiration order, at most
    /// [`sweep_cap`] of them.
    pub fn sweep(&mut self, now: u64, percent: u32) -> Vec<ExpiryMark> {
        let cap = sweep_cap(self.active.len(), percent);
        let mut removed = Vec::new();
        while removed.len() < cap {
            match self.expiry.first() {
                Some(mark) if mark.expiration <= now => {}
                _ => break,
            }
            let Some(mark) = self.expiry.pop_first() else {
                break;
            };
            self.active.remove(&mark.dest);
            removed.push(mark);
        }
        removed
    }

    pub fn pending_destinations(&self) -> Vec<IpAddress> {
        self.pending.keys().copied().collect()
    }

    pub fn pending(&self, dest: &IpAddress) -> Option<PendingRoute> {
        self.pending.get(dest).copied()
    }

    /// Expiration of an active route
    pub fn active(&self, dest: &IpAddress) -> Option<u64> {
        self.active.get(dest).copied()
    }

    pub fn stats(&self) -> RouteStats {
        RouteStats {
            pending: self.pending.len(),
            active: self.active.len(),
            expiry_marks: self.expiry.len(),
        }
    }

    /// Inserts or moves `dest` in the active set and expiry index.
    fn set_active(&mut self, dest: IpAddress, expiration: u64) {
        if let Some(previous) = self.active.insert(dest, expiration) {
            self.expiry.remove(&ExpiryMark {
                expiration: previous,
                dest,
            });
        }
        self.expiry.insert(ExpiryMark { expiration, dest });
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for dest in self.pending.keys() {
            assert!(!self.active.contains_key(dest), "{} pending and active", dest);
        }
        assert_eq!(self.active.len(), self.expiry.len());
        for mark in &self.expiry {
            assert_eq!(self.active.get(&mark.dest), Some(&mark.expiration));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ip(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_expiry_mark_order_and_display() {
        let a = ExpiryMark {
            expiration: 10,
            dest: ip("9.9.9.9"),
        };
        let b = ExpiryMark {
            expiration: 20,
            dest: ip("1.1.1.1"),
        };
        let c = ExpiryMark {
            expiration: 20,
            dest: ip("2.2.2.2"),
        };
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "dest=9.9.9.9,exp=10");
    }

    #[test]
    fn test_sweep_cap() {
        assert_eq!(sweep_cap(0, 5), 1);
        assert_eq!(sweep_cap(10, 5), 1);
        assert_eq!(sweep_cap(20, 5), 1);
        assert_eq!(sweep_cap(21, 5), 2);
        assert_eq!(sweep_cap(100, 50), 50);
        assert_eq!(sweep_cap(3, 100), 3);
    }

    #[test]
    fn test_repeated_request_keeps_latest_expiration() {
        let mut table = RouteTable::new();
        let dest = ip("1.2.3.4");
        assert_eq!(
            table.request(dest, 90),
            RequestOutcome::Pending { expiration: 90 }
        );
        assert_eq!(
            table.request(dest, 120),
            RequestOutcome::Pending { expiration: 120 }
        );
        assert_eq!(
            table.request(dest, 100),
            RequestOutcome::Pending { expiration: 120 }
        );
        assert_eq!(table.stats().pending, 1);
        table.assert_consistent();
    }

    #[test]
    fn test_request_resets_retries() {
        let mut table = RouteTable::new();
        let dest = ip("1.2.3.4");
        table.request(dest, 90);
        table.retry_pass(10);
        table.retry_pass(10);
        assert_eq!(table.pending(&dest).unwrap().retries, 2);
        table.request(dest, 90);
        assert_eq!(table.pending(&dest).unwrap().retries, 0);
    }

    #[test]
    fn test_confirm_moves_pending_to_active() {
        let mut table = RouteTable::new();
        let dest = ip("1.2.3.4");
        table.request(dest, 90);
        assert_eq!(
            table.confirm_add(dest, 1000),
            ConfirmAddOutcome::Activated { expiration: 90 }
        );
        assert_eq!(table.pending(&dest), None);
        assert_eq!(table.active(&dest), Some(90));
        assert_eq!(table.confirm_add(dest, 1000), ConfirmAddOutcome::AlreadyActive);
        table.assert_consistent();
    }

    #[test]
    fn test_unexpected_confirmation_uses_fallback() {
        let mut table = RouteTable::new();
        let dest = ip("2001:db8::1");
        assert_eq!(
            table.confirm_add(dest, 60),
            ConfirmAddOutcome::Unexpected { expiration: 60 }
        );
        assert_eq!(table.active(&dest), Some(60));
        table.assert_consistent();
    }

    #[test]
    fn test_active_expiration_never_shrinks() {
        let mut table = RouteTable::new();
        let dest = ip("1.2.3.4");
        table.request(dest, 90);
        table.confirm_add(dest, 0);

        assert_eq!(
            table.request(dest, 50),
            RequestOutcome::Duplicate { existing: 90 }
        );
        assert_eq!(table.request(dest, 90), RequestOutcome::Duplicate { existing: 90 });
        assert_eq!(table.active(&dest), Some(90));

        assert_eq!(
            table.request(dest, 200),
            RequestOutcome::Extended { from: 90, to: 200 }
        );
        assert_eq!(table.active(&dest), Some(200));
        assert_eq!(table.stats().pending, 0);
        table.assert_consistent();
    }

    #[test]
    fn test_external_removal_rearms() {
        let mut table = RouteTable::new();
        let dest = ip("1.2.3.4");
        table.request(dest, 90);
        table.confirm_add(dest, 0);
        assert_eq!(
            table.confirm_del(dest),
            ConfirmDelOutcome::Rearmed { expiration: 90 }
        );
        assert_eq!(
            table.pending(&dest),
            Some(PendingRoute {
                expiration: 90,
                retries: 0
            })
        );
        assert_eq!(table.confirm_del(dest), ConfirmDelOutcome::NotActive);
        table.assert_consistent();
    }

    #[test]
    fn test_retry_exhaustion_finalizes() {
        let mut table = RouteTable::new();
        let dest = ip("1.2.3.4");
        table.request(dest, 90);

        for attempt in 1..=3 {
            let pass = table.retry_pass(3);
            assert_eq!(pass.retry, vec![dest]);
            assert!(pass.finalized.is_empty());
            assert_eq!(table.pending(&dest).unwrap().retries, attempt);
        }

        let pass = table.retry_pass(3);
        assert!(pass.retry.is_empty());
        assert_eq!(
            pass.finalized,
            vec![ExpiryMark {
                expiration: 90,
                dest
            }]
        );
        assert_eq!(table.active(&dest), Some(90));
        table.assert_consistent();
    }

    #[test]
    fn test_zero_max_retries_finalizes_immediately() {
        let mut table = RouteTable::new();
        table.request(ip("1.2.3.4"), 90);
        let pass = table.retry_pass(0);
        assert_eq!(pass.finalized.len(), 1);
        assert_eq!(table.stats().active, 1);
    }

    #[test]
    fn test_sweep_respects_time_and_cap() {
        let mut table = RouteTable::new();
        for i in 0..30u8 {
            let dest = IpAddress::from_octets(&[10, 0, 0, i]);
            table.request(dest, 100 + u64::from(i));
            table.confirm_add(dest, 0);
        }
        table.assert_consistent();

        // nothing expired yet
        assert!(table.sweep(99, 5).is_empty());

        // 30 active at 5% -> cap 2, although 11 are due
        let removed = table.sweep(110, 5);
        assert_eq!(
            removed.iter().map(|m| m.expiration).collect::<Vec<_>>(),
            vec![100, 101]
        );
        assert_eq!(table.stats().active, 28);
        table.assert_consistent();

        // the boundary itself is expired
        let removed = table.sweep(102, 100);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].expiration, 102);
        table.assert_consistent();
    }

    #[test]
    fn test_sweep_ignores_pending() {
        let mut table = RouteTable::new();
        table.request(ip("1.2.3.4"), 10);
        assert!(table.sweep(1000, 100).is_empty());
        assert_eq!(table.stats().pending, 1);
    }

    #[test]
    fn test_invariants_under_mixed_operations() {
        let mut table = RouteTable::new();
        let dests: Vec<IpAddress> = (1..=8u8)
            .map(|i| IpAddress::from_octets(&[192, 0, 2, i]))
            .collect();

        for (step, dest) in dests.iter().cycle().take(64).enumerate() {
            let t = step as u64;
            match step % 5 {
                0 => {
                    table.request(*dest, t + 30);
                }
                1 => {
                    table.confirm_add(*dest, t + 60);
                }
                2 => {
                    table.confirm_del(*dest);
                }
                3 => {
                    table.retry_pass(2);
                }
                _ => {
                    table.sweep(t, 25);
                }
            }
            table.assert_consistent();
        }
    }
}
