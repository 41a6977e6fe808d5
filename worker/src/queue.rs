//! The deduplicating work queue driving the peer installer. See spec.md
//! §4.7 and §9 REDESIGN FLAGS: "a FIFO augmented with a presence set keyed
//! by `(domain, pubkey)`; `enqueue` is a no-op if the key is present".

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;
use wgkex_common::{Domain, PublicKey};

type Item = (Domain, PublicKey);

#[derive(Default)]
struct State {
    order: VecDeque<Item>,
    present: HashSet<Item>,
}

/// A FIFO queue that silently drops an `enqueue` for a `(domain, pubkey)`
/// pair already waiting to be processed.
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, domain: Domain, pubkey: PublicKey) {
        let item = (domain, pubkey);
        let mut state = self.state.lock();
        if state.present.insert(item.clone()) {
            state.order.push_back(item);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Non-blocking dequeue.
    pub fn try_take(&self) -> Option<Item> {
        let mut state = self.state.lock();
        let item = state.order.pop_front()?;
        state.present.remove(&item);
        Some(item)
    }

    /// Waits for an item to become available. Registers for notification
    /// before the final re-check to avoid a missed wakeup between
    /// `try_take` returning `None` and the call to `notified()`.
    pub async fn take(&self) -> Item {
        loop {
            if let Some(item) = self.try_take() {
                return item;
            }
            let notified = self.notify.notified();
            if let Some(item) = self.try_take() {
                return item;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("ffmuc_welt".to_owned(), "welt".to_owned())
    }

    fn key() -> PublicKey {
        "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=".parse().unwrap()
    }

    #[test]
    fn duplicate_enqueue_is_a_no_op() {
        let queue = WorkQueue::new();
        queue.enqueue(domain(), key());
        queue.enqueue(domain(), key());
        assert!(queue.try_take().is_some());
        assert!(queue.try_take().is_none());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = WorkQueue::new();
        let a: PublicKey = "HIgo9xNZhE6y8o9ao9UZVbasFOBGKlTvHbad2Z1Ozno=".parse().unwrap();
        let b = key();
        queue.enqueue(domain(), a.clone());
        queue.enqueue(domain(), b.clone());
        assert_eq!(queue.try_take(), Some((domain(), a)));
        assert_eq!(queue.try_take(), Some((domain(), b)));
    }

    #[tokio::test]
    async fn take_waits_for_an_item() {
        let queue = std::sync::Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(domain(), key());
        let item = waiter.await.unwrap();
        assert_eq!(item, (domain(), key()));
    }
}
