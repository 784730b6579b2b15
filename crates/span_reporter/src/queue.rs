//! Bounded multi-producer, single-consumer FIFO queue.
//!
//! Producers never block: [`BoundedQueue::offer`] either enqueues or hands the
//! item back. The single [`QueueReceiver`] blocks in [`QueueReceiver::take`],
//! spinning briefly with a [`Backoff`] before parking the thread. Every
//! successful offer unparks the consumer, and so does [`BoundedQueue::interrupt`].
//!
//! [`BoundedQueue::close`] returns only after every offer that raced it has
//! either landed in the queue or been rejected, so a consumer that drains after
//! `close` sees every accepted item.

use crate::error::{OfferError, TakeError};
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    items: ArrayQueue<T>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    interrupted: AtomicBool,
    unparker: Unparker,
}

/// Producer handle. Cheap to clone; all clones feed the same receiver.
pub struct BoundedQueue<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer handle. There is exactly one per queue.
pub struct QueueReceiver<T> {
    shared: Arc<Shared<T>>,
    parker: Parker,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> (Self, QueueReceiver<T>) {
        let parker = Parker::new();
        let shared = Arc::new(Shared {
            items: ArrayQueue::new(capacity),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
            unparker: parker.unparker().clone(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            QueueReceiver { shared, parker },
        )
    }

    /// Enqueues `item` without blocking.
    pub fn offer(&self, item: T) -> Result<(), OfferError<T>> {
        // Registered before the closed check; `close` waits for this to drop.
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = if self.shared.closed.load(Ordering::SeqCst) {
            Err(OfferError::Closed(item))
        } else {
            self.shared.items.push(item).map_err(OfferError::Full)
        };
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        if result.is_ok() {
            self.shared.unparker.unpark();
        }
        result
    }

    /// Items currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.items.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.items.is_empty()
    }

    /// Maximum number of queued items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.items.capacity()
    }

    /// Free slots left.
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Rejects all further offers. Items already queued stay available to the
    /// receiver.
    ///
    /// Waits for offers already past the closed check to finish pushing.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let backoff = Backoff::new();
        while self.shared.in_flight.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Wakes a receiver blocked in `take`, which then returns
    /// [`TakeError::Interrupted`] if the queue is still empty.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
        self.shared.unparker.unpark();
    }
}

impl<T> QueueReceiver<T> {
    /// Removes the oldest item, blocking until one arrives or the queue is
    /// interrupted.
    pub fn take(&self) -> Result<T, TakeError> {
        let backoff = Backoff::new();
        loop {
            if let Some(item) = self.shared.items.pop() {
                return Ok(item);
            }
            if self.shared.interrupted.swap(false, Ordering::AcqRel) {
                return Err(TakeError::Interrupted);
            }
            if backoff.is_completed() {
                self.parker.park();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Removes the oldest item if there is one.
    #[inline]
    pub fn try_take(&self) -> Option<T> {
        self.shared.items.pop()
    }

    /// Items currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.items.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn full_queue_hands_item_back() {
        let (queue, _rx) = BoundedQueue::with_capacity(2);
        queue.offer(1).unwrap();
        queue.offer(2).unwrap();
        assert_eq!(queue.offer(3), Err(OfferError::Full(3)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.remaining_capacity(), 0);
    }

    #[test]
    fn fifo_order() {
        let (queue, rx) = BoundedQueue::with_capacity(16);
        for i in 0..10 {
            queue.offer(i).unwrap();
        }
        let taken: Vec<i32> = (0..10).map(|_| rx.take().unwrap()).collect();
        assert_eq!(taken, (0..10).collect::<Vec<_>>());
        assert!(rx.try_take().is_none());
    }

    #[test]
    fn closed_queue_rejects_but_keeps_items() {
        let (queue, rx) = BoundedQueue::with_capacity(4);
        queue.offer("a").unwrap();
        queue.close();
        assert!(queue.is_closed());

        let err = queue.offer("b").unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(err.into_inner(), "b");
        assert_eq!(rx.try_take(), Some("a"));
    }

    #[test]
    fn interrupt_wakes_blocked_take() {
        let (queue, rx) = BoundedQueue::<u32>::with_capacity(4);
        let waiter = thread::spawn(move || rx.take());
        thread::sleep(Duration::from_millis(50));
        queue.interrupt();
        assert_eq!(waiter.join().unwrap(), Err(TakeError::Interrupted));
    }

    #[test]
    fn blocked_take_sees_later_offer() {
        let (queue, rx) = BoundedQueue::with_capacity(4);
        let waiter = thread::spawn(move || rx.take());
        thread::sleep(Duration::from_millis(20));
        queue.offer(42u64).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(42));
    }

    #[test]
    fn close_waits_for_racing_offers() {
        const PRODUCERS: usize = 4;

        for _ in 0..200 {
            let (queue, rx) = BoundedQueue::with_capacity(1_024);
            let accepted = Arc::new(AtomicUsize::new(0));
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    let queue = queue.clone();
                    let accepted = Arc::clone(&accepted);
                    thread::spawn(move || {
                        for i in 0..200u32 {
                            if queue.offer(i).is_ok() {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();

            queue.close();
            let mut drained = 0;
            while rx.try_take().is_some() {
                drained += 1;
            }
            for p in producers {
                p.join().unwrap();
            }

            assert!(rx.is_empty(), "offer landed after close returned");
            assert_eq!(drained, accepted.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn multiple_producers_deliver_everything() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 1_000;

        let (queue, rx) = BoundedQueue::with_capacity(64);
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut item = p * PER_PRODUCER + i;
                        // spin until the consumer makes room
                        loop {
                            match queue.offer(item) {
                                Ok(()) => break,
                                Err(e) => {
                                    item = e.into_inner();
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let mut sum = 0u64;
        for _ in 0..PRODUCERS * PER_PRODUCER {
            sum += rx.take().unwrap();
        }
        for p in producers {
            p.join().unwrap();
        }

        let n = PRODUCERS * PER_PRODUCER;
        assert_eq!(sum, n * (n - 1) / 2);
    }
}
