//! Admission queue for outbound commands.
//!
//! The panel processes one command at a time. Every command first takes a
//! turn from the [`AdmissionQueue`]; only the holder of the turn may write to
//! the transport. Turns are granted by priority (`High` first), then in the
//! order they were requested.
//!
//! A turn is represented by an [`AdmissionGrant`]. Dropping the grant
//! releases the turn, so it is released exactly once on every exit path,
//! including errors and panics in the holder.
//!
//! ```text
//!  wait(High) ──┐
//!  wait(Low)  ──┼──> [ heap: (priority, sequence) ] ──> grant ──> transmit ──> settle ──> drop
//!  wait(High) ──┘                                          ^                               │
//!                                                          └───────── next waiter <────────┘
//! ```
//!
//! An in-flight command is never preempted; a `High` arrival waits for the
//! current holder like everyone else.

use hwi_core::Priority;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

/// The queue was dropped while a ticket was still waiting.
#[derive(Debug, Error)]
#[error("admission queue closed")]
pub struct AdmissionClosed;

/// Single-holder, priority-ordered turn scheduler.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```
/// use hwi_core::Priority;
/// use hwi_network::AdmissionQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = AdmissionQueue::new();
///
/// let grant = queue.wait(Priority::Standard).await?;
/// assert_eq!(queue.in_flight(), 1);
///
/// drop(grant);
/// assert_eq!(queue.in_flight(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AdmissionQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    grants: AtomicU64,
    releases: AtomicU64,
}

#[derive(Debug, Default)]
struct QueueState {
    /// A grant is outstanding
    busy: bool,

    /// Sequence number for the next ticket
    next_sequence: u64,

    /// Tickets waiting for a turn
    waiters: BinaryHeap<Waiter>,
}

#[derive(Debug)]
struct Waiter {
    priority: Priority,
    sequence: u64,
    tx: oneshot::Sender<AdmissionGrant>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // BinaryHeap pops the maximum: most urgent priority, then oldest sequence.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a place in line without waiting.
    ///
    /// The ticket's position is fixed at the moment this returns, so tickets
    /// taken back to back keep their order regardless of when they are
    /// awaited.
    pub fn ticket(&self, priority: Priority) -> AdmissionTicket {
        let mut state = self.inner.lock_state();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        if !state.busy && state.waiters.is_empty() {
            state.busy = true;
            drop(state);
            trace!(sequence, %priority, "Turn granted immediately");
            return AdmissionTicket {
                inner: TicketState::Granted(self.inner.grant(priority, sequence)),
            };
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push(Waiter {
            priority,
            sequence,
            tx,
        });
        trace!(sequence, %priority, waiting = state.waiters.len(), "Queued for turn");

        AdmissionTicket {
            inner: TicketState::Waiting(rx),
        }
    }

    /// Wait until the caller holds the turn.
    ///
    /// # Errors
    /// Returns [`AdmissionClosed`] only if the queue is torn down while
    /// waiting.
    pub async fn wait(&self, priority: Priority) -> Result<AdmissionGrant, AdmissionClosed> {
        self.ticket(priority).granted().await
    }

    /// Number of outstanding grants (0 or 1).
    pub fn in_flight(&self) -> usize {
        usize::from(self.inner.lock_state().busy)
    }

    /// Number of tickets waiting for a turn.
    pub fn waiting(&self) -> usize {
        self.inner.lock_state().waiters.len()
    }

    /// Total grants issued.
    pub fn grants(&self) -> u64 {
        self.inner.grants.load(Ordering::SeqCst)
    }

    /// Total grants released.
    pub fn releases(&self) -> u64 {
        self.inner.releases.load(Ordering::SeqCst)
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn grant(self: &Arc<Self>, priority: Priority, sequence: u64) -> AdmissionGrant {
        self.grants.fetch_add(1, Ordering::SeqCst);
        AdmissionGrant {
            queue: Arc::clone(self),
            priority,
            sequence,
            armed: true,
        }
    }

    /// Hand the turn to the next live waiter, or mark the queue idle.
    ///
    /// Waiters that gave up hand their grant straight back; those grants are
    /// disarmed and counted as released here, so a long run of abandoned
    /// tickets is walked in a loop.
    fn release(self: &Arc<Self>) {
        loop {
            self.releases.fetch_add(1, Ordering::SeqCst);

            let next = {
                let mut state = self.lock_state();
                let next = state.waiters.pop();
                if next.is_none() {
                    state.busy = false;
                }
                next
            };

            let Some(waiter) = next else {
                return;
            };

            trace!(sequence = waiter.sequence, priority = %waiter.priority, "Turn handed over");
            match waiter.tx.send(self.grant(waiter.priority, waiter.sequence)) {
                Ok(()) => return,
                Err(grant) => {
                    trace!(sequence = grant.sequence, "Waiter gone; passing turn on");
                    grant.disarm();
                }
            }
        }
    }
}

/// A place in line, obtained from [`AdmissionQueue::ticket`].
#[derive(Debug)]
pub struct AdmissionTicket {
    inner: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Granted(AdmissionGrant),
    Waiting(oneshot::Receiver<AdmissionGrant>),
}

impl AdmissionTicket {
    /// Wait for this ticket's turn.
    pub async fn granted(self) -> Result<AdmissionGrant, AdmissionClosed> {
        match self.inner {
            TicketState::Granted(grant) => Ok(grant),
            TicketState::Waiting(rx) => rx.await.map_err(|_| AdmissionClosed),
        }
    }
}

/// The exclusive turn. Released when dropped.
#[derive(Debug)]
pub struct AdmissionGrant {
    queue: Arc<QueueInner>,
    priority: Priority,
    sequence: u64,
    /// Cleared when the queue takes the turn back itself
    armed: bool,
}

impl AdmissionGrant {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Order in which the ticket was taken.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Release the turn explicitly.
    pub fn release(self) {
        drop(self);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AdmissionGrant {
    fn drop(&mut self) {
        if self.armed {
            self.queue.release();
        }
    }
}
