//! Submit queues.
//!
//! One FIFO per request kind, each behind its own lock. The dispatcher
//! scans for the first request whose driver is not blocked; the
//! classification closure it passes runs under the queue lock and may
//! take a driver slot lock (queue → slot, never the reverse).

use std::collections::VecDeque;

use kcrypto_core::{CryptoOp, DriverId, KeyOp};
use parking_lot::Mutex;

/// What the queue needs to know about a request.
pub(crate) trait Routed {
    /// Driver the request is bound to, if one has been chosen.
    fn routed_to(&self) -> Option<DriverId>;
    fn batchable(&self) -> bool;
}

impl Routed for CryptoOp {
    #[inline]
    fn routed_to(&self) -> Option<DriverId> {
        Some(self.session().driver)
    }

    #[inline]
    fn batchable(&self) -> bool {
        self.is_batch()
    }
}

impl Routed for KeyOp {
    #[inline]
    fn routed_to(&self) -> Option<DriverId> {
        self.driver()
    }

    #[inline]
    fn batchable(&self) -> bool {
        self.is_batch()
    }
}

/// A request removed by `take_first`.
pub(crate) struct Taken<T, R> {
    pub item: T,
    pub route: R,
    /// The request right behind it is batchable and bound to the same driver.
    pub more: bool,
}

pub(crate) struct SubmitQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T: Routed> SubmitQueue<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }

    pub fn push_back(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    /// Return a request the driver refused, ahead of everything queued.
    pub fn push_front(&self, item: T) {
        self.inner.lock().push_front(item);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Any queued request bound to `driver`. Direct submission must not
    /// overtake these.
    pub fn has_pending_for(&self, driver: DriverId) -> bool {
        self.inner
            .lock()
            .iter()
            .any(|item| item.routed_to() == Some(driver))
    }

    /// Remove the first request `classify` accepts.
    pub fn take_first<R, F>(&self, mut classify: F) -> Option<Taken<T, R>>
    where
        F: FnMut(&T) -> Option<R>,
    {
        let mut queue = self.inner.lock();
        let (idx, route) = queue
            .iter()
            .enumerate()
            .find_map(|(i, item)| classify(item).map(|r| (i, r)))?;
        let item = queue.remove(idx)?;
        let more = item.batchable()
            && queue.get(idx).is_some_and(|next| {
                next.batchable() && next.routed_to() == item.routed_to()
            });
        Some(Taken { item, route, more })
    }

    /// Empty the queue.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Req {
        tag: u32,
        driver: u32,
        batch: bool,
    }

    impl Routed for Req {
        fn routed_to(&self) -> Option<DriverId> {
            Some(DriverId::new(self.driver))
        }
        fn batchable(&self) -> bool {
            self.batch
        }
    }

    fn req(tag: u32, driver: u32, batch: bool) -> Req {
        Req { tag, driver, batch }
    }

    #[test]
    fn test_take_first_skips_blocked() {
        let q = SubmitQueue::new();
        q.push_back(req(1, 0, false));
        q.push_back(req(2, 1, false));
        q.push_back(req(3, 0, false));

        // driver 0 blocked
        let taken = q.take_first(|r| (r.driver != 0).then_some(())).unwrap();
        assert_eq!(taken.item.tag, 2);
        assert_eq!(q.len(), 2);

        let taken = q.take_first(|_| Some(())).unwrap();
        assert_eq!(taken.item.tag, 1);
        assert!(q.take_first(|r| (r.driver == 5).then_some(())).is_none());
    }

    #[test]
    fn test_more_hint_for_consecutive_batch() {
        let q = SubmitQueue::new();
        q.push_back(req(1, 0, true));
        q.push_back(req(2, 0, true));
        q.push_back(req(3, 1, true));

        assert!(q.take_first(|_| Some(())).unwrap().more);
        // next is for another driver
        assert!(!q.take_first(|_| Some(())).unwrap().more);
        assert!(!q.take_first(|_| Some(())).unwrap().more);
    }

    #[test]
    fn test_push_front_and_pending() {
        let q = SubmitQueue::new();
        q.push_back(req(1, 0, false));
        q.push_front(req(0, 3, false));
        assert!(q.has_pending_for(DriverId::new(3)));
        assert!(!q.has_pending_for(DriverId::new(2)));
        let tags: Vec<u32> = q.drain().into_iter().map(|r| r.tag).collect();
        assert_eq!(tags, vec![0, 1]);
        assert_eq!(q.len(), 0);
    }
}
