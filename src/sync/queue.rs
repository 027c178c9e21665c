//! FIFO permit queue shared by [`Mutex`](super::Mutex) and
//! [`Semaphore`](super::Semaphore).
//!
//! A [`Gate`] owns a fixed number of permits. Acquirers that find no permit
//! available are queued in arrival order. A release never makes the permit
//! visible to new arrivals while someone is waiting: it is handed directly
//! to the head waiter, which observes the grant on its next poll.
//!
//! Waiters that leave the queue (cancellation or a dropped future) are
//! withdrawn. A grant that raced with the withdrawal is either kept by the
//! caller or passed on to the next waiter, so permits are never leaked.

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::cancel::CancelToken;

use super::AcquireError;

#[derive(Debug)]
struct Waiter {
    id: u64,
    waker: Waker,
}

/// Permit bookkeeping. Only ever touched under the owning [`Gate`]'s lock.
#[derive(Debug)]
pub(crate) struct PermitQueue {
    /// Permits not issued to anyone.
    available: usize,
    /// Total permits, fixed at construction.
    capacity: usize,
    /// Pending waiters, head is granted first.
    waiters: VecDeque<Waiter>,
    /// Waiters handed a permit that have not polled since.
    granted: SmallVec<[u64; 4]>,
    next_waiter_id: u64,
}

/// Result of a waiter leaving the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Withdrawal {
    /// The waiter was still queued and has been removed.
    Removed,
    /// A release had already handed this waiter a permit; the caller owns it.
    AlreadyGranted,
}

impl PermitQueue {
    fn new(capacity: usize) -> Self {
        Self {
            available: capacity,
            capacity,
            waiters: VecDeque::with_capacity(4),
            granted: SmallVec::new(),
            next_waiter_id: 0,
        }
    }

    /// Takes a permit if one is free.
    ///
    /// A free permit implies an empty queue, so this never jumps ahead of a
    /// waiter.
    fn try_take(&mut self) -> bool {
        if self.available == 0 {
            return false;
        }
        debug_assert!(self.waiters.is_empty(), "free permit with queued waiters");
        self.available -= 1;
        true
    }

    fn enqueue(&mut self, waker: Waker) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id = self.next_waiter_id.wrapping_add(1);
        self.waiters.push_back(Waiter { id, waker });
        id
    }

    /// Returns true if `id` has been granted, consuming the grant.
    /// Otherwise refreshes the waiter's waker.
    fn claim(&mut self, id: u64, waker: &Waker) -> bool {
        if self.take_grant(id) {
            return true;
        }
        if let Some(existing) = self.waiters.iter_mut().find(|w| w.id == id) {
            if !existing.waker.will_wake(waker) {
                existing.waker.clone_from(waker);
            }
        }
        false
    }

    /// Returns a permit. With waiters queued the permit goes straight to the
    /// head waiter and its waker is returned for the caller to wake once the
    /// lock is dropped.
    fn release(&mut self) -> Option<(u64, Waker)> {
        if let Some(next) = self.waiters.pop_front() {
            self.granted.push(next.id);
            return Some((next.id, next.waker));
        }
        debug_assert!(self.available < self.capacity, "permit over-release");
        self.available = (self.available + 1).min(self.capacity);
        None
    }

    fn withdraw(&mut self, id: u64) -> Withdrawal {
        if self.take_grant(id) {
            return Withdrawal::AlreadyGranted;
        }
        if let Some(pos) = self.waiters.iter().position(|w| w.id == id) {
            self.waiters.remove(pos);
        }
        Withdrawal::Removed
    }

    fn take_grant(&mut self, id: u64) -> bool {
        if let Some(pos) = self.granted.iter().position(|&g| g == id) {
            self.granted.swap_remove(pos);
            true
        } else {
            false
        }
    }
}

/// A fixed pool of permits with FIFO granting and direct handoff.
#[derive(Debug)]
pub(crate) struct Gate {
    state: ParkingMutex<PermitQueue>,
    label: Option<Arc<str>>,
}

impl Gate {
    pub(crate) fn new(capacity: usize, label: Option<Arc<str>>) -> Self {
        Self {
            state: ParkingMutex::new(PermitQueue::new(capacity)),
            label,
        }
    }

    pub(crate) fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed")
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub(crate) fn available(&self) -> usize {
        self.state.lock().available
    }

    pub(crate) fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub(crate) fn try_acquire(&self) -> bool {
        self.state.lock().try_take()
    }

    /// Returns one permit, handing it to the head waiter if there is one.
    pub(crate) fn release(&self) {
        let handed = self.state.lock().release();
        // Wake outside the lock: the woken task may poll us re-entrantly.
        if let Some((waiter, waker)) = handed {
            tracing::trace!(label = self.label(), waiter, "permit handed off");
            waker.wake();
        }
    }

    fn withdraw(&self, id: u64) -> Withdrawal {
        self.state.lock().withdraw(id)
    }
}

/// Per-future acquisition state: whether the future has queued, and under
/// which waiter id and cancel registration.
#[derive(Debug, Default)]
pub(crate) struct AcquireSlot {
    waiter_id: Option<u64>,
    /// Key of this future's waker in its cancel token, while pending.
    cancel_key: Option<u64>,
}

impl AcquireSlot {
    /// Polls for a permit. Resolves once the permit belongs to the caller.
    pub(crate) fn poll_grant(&mut self, gate: &Gate, context: &mut Context<'_>) -> Poll<()> {
        let mut state = gate.state.lock();
        match self.waiter_id {
            Some(id) => {
                if state.claim(id, context.waker()) {
                    drop(state);
                    self.waiter_id = None;
                    tracing::trace!(label = gate.label(), waiter = id, "permit granted");
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
            None => {
                if state.try_take() {
                    return Poll::Ready(());
                }
                let id = state.enqueue(context.waker().clone());
                let queued = state.waiters.len();
                drop(state);
                self.waiter_id = Some(id);
                tracing::trace!(label = gate.label(), waiter = id, queued, "waiting for permit");
                Poll::Pending
            }
        }
    }

    /// Like [`poll_grant`](Self::poll_grant), but gives up with
    /// [`AcquireError::Cancelled`] once `token` is cancelled.
    ///
    /// A waiter that was granted before it noticed the cancellation keeps
    /// the permit.
    pub(crate) fn poll_grant_or_cancel(
        &mut self,
        gate: &Gate,
        token: &CancelToken,
        context: &mut Context<'_>,
    ) -> Poll<Result<(), AcquireError>> {
        if token.is_cancelled() {
            self.forget_cancel(token);
            let Some(id) = self.waiter_id.take() else {
                return Poll::Ready(Err(AcquireError::Cancelled));
            };
            return match gate.withdraw(id) {
                Withdrawal::AlreadyGranted => Poll::Ready(Ok(())),
                Withdrawal::Removed => {
                    tracing::debug!(label = gate.label(), waiter = id, "acquire cancelled");
                    Poll::Ready(Err(AcquireError::Cancelled))
                }
            };
        }
        match self.poll_grant(gate, context) {
            Poll::Ready(()) => {
                self.forget_cancel(token);
                Poll::Ready(Ok(()))
            }
            Poll::Pending => {
                self.cancel_key = token.register(self.cancel_key, context.waker());
                Poll::Pending
            }
        }
    }

    fn forget_cancel(&mut self, token: &CancelToken) {
        if let Some(key) = self.cancel_key.take() {
            token.deregister(key);
        }
    }

    /// Leaves the queue without taking the permit. Called from the drop of
    /// an unfinished acquire future.
    pub(crate) fn abandon(&mut self, gate: &Gate) {
        if let Some(id) = self.waiter_id.take() {
            if gate.withdraw(id) == Withdrawal::AlreadyGranted {
                tracing::trace!(label = gate.label(), waiter = id, "passing on abandoned grant");
                gate.release();
            }
        }
    }

    /// [`abandon`](Self::abandon) for a cancellable acquire: also removes
    /// the future's waker from `token`.
    pub(crate) fn abandon_cancellable(&mut self, gate: &Gate, token: &CancelToken) {
        self.forget_cancel(token);
        self.abandon(gate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_context() -> Context<'static> {
        Context::from_waker(Waker::noop())
    }

    #[test]
    fn release_without_waiters_restores_counter() {
        let mut queue = PermitQueue::new(2);
        assert!(queue.try_take());
        assert_eq!(queue.available, 1);
        assert!(queue.release().is_none());
        assert_eq!(queue.available, 2);
    }

    #[test]
    fn release_hands_off_to_head_without_touching_counter() {
        let mut queue = PermitQueue::new(1);
        assert!(queue.try_take());
        let first = queue.enqueue(Waker::noop().clone());
        let second = queue.enqueue(Waker::noop().clone());

        let (handed, _) = queue.release().expect("head waiter");
        assert_eq!(handed, first);
        assert_eq!(queue.available, 0);
        assert!(!queue.try_take(), "handed-off permit must not be visible");
        assert!(queue.claim(first, Waker::noop()));
        assert!(!queue.claim(second, Waker::noop()));
    }

    #[test]
    fn withdraw_reports_prior_grant() {
        let mut queue = PermitQueue::new(1);
        assert!(queue.try_take());
        let id = queue.enqueue(Waker::noop().clone());
        assert!(queue.release().is_some());
        assert_eq!(queue.withdraw(id), Withdrawal::AlreadyGranted);
        assert!(queue.granted.is_empty());
    }

    #[test]
    fn withdraw_removes_queued_waiter() {
        let mut queue = PermitQueue::new(1);
        assert!(queue.try_take());
        let id = queue.enqueue(Waker::noop().clone());
        assert_eq!(queue.withdraw(id), Withdrawal::Removed);
        assert!(queue.waiters.is_empty());
        assert!(queue.release().is_none());
        assert_eq!(queue.available, 1);
    }

    #[test]
    fn abandoned_grant_passes_to_next_waiter() {
        let gate = Gate::new(1, None);
        let mut cx = noop_context();
        let mut holder = AcquireSlot::default();
        assert!(holder.poll_grant(&gate, &mut cx).is_ready());

        let mut first = AcquireSlot::default();
        let mut second = AcquireSlot::default();
        assert!(first.poll_grant(&gate, &mut cx).is_pending());
        assert!(second.poll_grant(&gate, &mut cx).is_pending());

        gate.release();
        first.abandon(&gate);

        assert!(second.poll_grant(&gate, &mut cx).is_ready());
        assert_eq!(gate.available(), 0);
        assert_eq!(gate.waiters(), 0);
    }

    #[test]
    fn cancelled_after_grant_keeps_permit() {
        let gate = Gate::new(1, None);
        let token = CancelToken::new();
        let mut cx = noop_context();
        assert!(gate.try_acquire());

        let mut waiting = AcquireSlot::default();
        assert!(waiting.poll_grant_or_cancel(&gate, &token, &mut cx).is_pending());
        gate.release();
        token.cancel();

        let outcome = waiting.poll_grant_or_cancel(&gate, &token, &mut cx);
        assert_eq!(outcome, Poll::Ready(Ok(())));
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn finished_cancellable_acquires_leave_no_wakers() {
        let gate = Gate::new(1, None);
        let token = CancelToken::new();
        let mut cx = noop_context();

        for _ in 0..1000 {
            assert!(gate.try_acquire());
            let mut waiting = AcquireSlot::default();
            assert!(waiting.poll_grant_or_cancel(&gate, &token, &mut cx).is_pending());
            assert_eq!(token.registered(), 1);
            gate.release();
            let outcome = waiting.poll_grant_or_cancel(&gate, &token, &mut cx);
            assert_eq!(outcome, Poll::Ready(Ok(())));
            gate.release();
        }
        assert_eq!(token.registered(), 0);

        assert!(gate.try_acquire());
        let mut dropped = AcquireSlot::default();
        assert!(dropped.poll_grant_or_cancel(&gate, &token, &mut cx).is_pending());
        dropped.abandon_cancellable(&gate, &token);
        assert_eq!(token.registered(), 0);
        assert_eq!(gate.waiters(), 0);
    }
}
