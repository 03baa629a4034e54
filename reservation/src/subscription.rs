use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{Instrument, Span, debug};

/// The independent update channels a listener can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    SeatAvailability,
    ReservationStatus,
    ReservationResult,
    Reservations,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::SeatAvailability => "seat_availability",
            Channel::ReservationStatus => "reservation_status",
            Channel::ReservationResult => "reservation_result",
            Channel::Reservations => "reservations",
        };
        f.write_str(s)
    }
}

/// Serialises callback delivery against detachment.
///
/// A callback only runs while the gate lock is held and the gate is open,
/// and `close` takes the same lock. Once `close` returns, no callback runs
/// again, including one for an update that was already in flight. The
/// lock is reentrant so a callback may detach its own listener.
pub(crate) struct ListenerGate {
    open: ReentrantMutex<Cell<bool>>,
}

impl ListenerGate {
    pub(crate) fn new() -> Self {
        Self {
            open: ReentrantMutex::new(Cell::new(true)),
        }
    }

    /// Runs `f` if the gate is still open. Returns false once closed.
    pub(crate) fn deliver<F: FnOnce()>(&self, f: F) -> bool {
        let guard = self.open.lock();
        if !guard.get() {
            return false;
        }
        f();
        guard.get()
    }

    /// Closes the gate; returns whether it was open.
    pub(crate) fn close(&self) -> bool {
        self.open.lock().replace(false)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.lock().get()
    }
}

/// Handle to one live listener. Clones refer to the same listener.
///
/// Dropping a handle does not detach; call [`SubscriptionHandle::cancel`]
/// or drop the owner that registered it.
#[derive(Clone)]
pub struct SubscriptionHandle {
    channel: Channel,
    gate: Arc<ListenerGate>,
    task: AbortHandle,
}

impl SubscriptionHandle {
    /// Drives `stream` on `runtime`, feeding each item to `on_item` through
    /// the gate until the stream ends or the handle is cancelled.
    pub(crate) fn spawn<T, F>(
        runtime: &Handle,
        channel: Channel,
        span: Span,
        mut stream: BoxStream<'static, T>,
        mut on_item: F,
    ) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let gate = Arc::new(ListenerGate::new());
        let task_gate = Arc::clone(&gate);

        let task = runtime.spawn(
            async move {
                while let Some(item) = stream.next().await {
                    if !task_gate.deliver(|| on_item(item)) {
                        break;
                    }
                }
                debug!(%channel, "listener stream finished");
            }
            .instrument(span),
        );

        Self {
            channel,
            gate,
            task: task.abort_handle(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open() && !self.task.is_finished()
    }

    /// Stops delivery and releases the underlying subscription. Safe to call
    /// repeatedly and from inside the listener's own callback.
    pub fn cancel(&self) {
        if self.gate.close() {
            debug!(channel = %self.channel, "listener detached");
        }
        self.task.abort();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("open", &self.gate.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn channel_stream(rx: mpsc::UnboundedReceiver<u32>) -> BoxStream<'static, u32> {
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) })
            .boxed()
    }

    #[test]
    fn closed_gate_refuses_delivery() {
        let gate = ListenerGate::new();
        let mut ran = 0;

        assert!(gate.deliver(|| ran += 1));
        assert!(gate.close());
        assert!(!gate.close());
        assert!(!gate.deliver(|| ran += 1));
        assert_eq!(ran, 1);
    }

    #[test]
    fn gate_can_be_closed_from_inside_delivery() {
        let gate = ListenerGate::new();
        assert!(!gate.deliver(|| {
            gate.close();
        }));
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn cancelled_handle_delivers_nothing_more() {
        let (tx, rx) = mpsc::unbounded_channel();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let handle = SubscriptionHandle::spawn(
            &Handle::current(),
            Channel::ReservationStatus,
            Span::none(),
            channel_stream(rx),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tx.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        handle.cancel();
        let _ = tx.send(2);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
        handle.cancel();
    }
}
