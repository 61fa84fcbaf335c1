//! The rendezvous service both parties post to. The protocol only needs a fixed message size and a blocking swap keyed by a tag.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, Span};

use crate::errors::PandaError;

/// MeetingPlace delivers `message` at `tag` and blocks until the peer's message for the same tag is available.
///
/// Implementations must return `PandaError::ShutdownRequested` promptly once `shutdown` is requested; the key exchange only checks it between steps.
pub trait MeetingPlace: Send + Sync {
    /// padding is the exact length of every message posted here
    fn padding(&self) -> usize;

    fn exchange(&self, log: &Span, tag: &[u8; 32], message: &[u8], shutdown: &Shutdown) -> Result<Vec<u8>, PandaError>;
}

impl<T: MeetingPlace + ?Sized> MeetingPlace for Arc<T> {
    fn padding(&self) -> usize {
        (**self).padding()
    }

    fn exchange(&self, log: &Span, tag: &[u8; 32], message: &[u8], shutdown: &Shutdown) -> Result<Vec<u8>, PandaError> {
        (**self).exchange(log, tag, message, shutdown)
    }
}

impl<T: MeetingPlace + ?Sized> MeetingPlace for &T {
    fn padding(&self) -> usize {
        (**self).padding()
    }

    fn exchange(&self, log: &Span, tag: &[u8; 32], message: &[u8], shutdown: &Shutdown) -> Result<Vec<u8>, PandaError> {
        (**self).exchange(log, tag, message, shutdown)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shutdown is a cooperative cancellation signal. Clones share the same flag.
#[derive(Clone, Default, Debug)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, cond) = &*self.inner;
        *lock(flag) = true;
        cond.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// wait_timeout sleeps for up to `timeout` and returns true if shutdown was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let guard = lock(flag);
        match cond.wait_timeout_while(guard, timeout, |requested| !*requested) {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

#[derive(Default)]
struct Slot {
    first: Vec<u8>,
    second: Option<Vec<u8>>,
}

/// InMemoryMeetingPlace pairs messages by tag inside one process.
///
/// The first message posted at a tag waits for a second, different one. Posting the same message again (a resumed exchange) gets the same answer. A third distinct message is refused.
pub struct InMemoryMeetingPlace {
    padding: usize,
    poll: Duration,
    slots: Mutex<HashMap<[u8; 32], Slot>>,
    wake: Condvar,
}

impl InMemoryMeetingPlace {
    pub fn new(padding: usize) -> Self {
        Self {
            padding,
            poll: Duration::from_millis(20),
            slots: Mutex::new(HashMap::new()),
            wake: Condvar::new(),
        }
    }
}

impl MeetingPlace for InMemoryMeetingPlace {
    fn padding(&self) -> usize {
        self.padding
    }

    fn exchange(&self, log: &Span, tag: &[u8; 32], message: &[u8], shutdown: &Shutdown) -> Result<Vec<u8>, PandaError> {
        let _entered = log.enter();
        let mut slots = lock(&self.slots);
        {
            let slot = slots.entry(*tag).or_insert_with(|| Slot { first: message.to_vec(), second: None });
            let repost = slot.first == message || slot.second.as_deref() == Some(message);
            if !repost {
                if slot.second.is_some() {
                    return Err(PandaError::TagInUse);
                }
                slot.second = Some(message.to_vec());
                self.wake.notify_all();
            }
        }
        debug!(tag = %hex::encode(&tag[..4]), "posted at meeting place");

        loop {
            if let Some(slot) = slots.get(tag) {
                if let Some(second) = &slot.second {
                    let reply = if slot.first == message { second.clone() } else { slot.first.clone() };
                    return Ok(reply);
                }
            }
            if shutdown.is_requested() {
                return Err(PandaError::ShutdownRequested);
            }
            slots = match self.wake.wait_timeout(slots, self.poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn two_parties_swap_messages() {
        let place = Arc::new(InMemoryMeetingPlace::new(8));
        let tag = [1u8; 32];
        let other = place.clone();
        let handle = thread::spawn(move || other.exchange(&Span::none(), &tag, b"bob", &Shutdown::new()).unwrap());
        let got = place.exchange(&Span::none(), &tag, b"alice", &Shutdown::new()).unwrap();
        assert_eq!(got, b"bob");
        assert_eq!(handle.join().unwrap(), b"alice");
    }

    #[test]
    fn reposting_is_idempotent_and_third_party_is_refused() {
        let place = Arc::new(InMemoryMeetingPlace::new(8));
        let tag = [2u8; 32];
        let other = place.clone();
        let handle = thread::spawn(move || other.exchange(&Span::none(), &tag, b"one", &Shutdown::new()).unwrap());
        assert_eq!(place.exchange(&Span::none(), &tag, b"two", &Shutdown::new()).unwrap(), b"one");
        handle.join().unwrap();
        assert_eq!(place.exchange(&Span::none(), &tag, b"one", &Shutdown::new()).unwrap(), b"two");
        assert_eq!(place.exchange(&Span::none(), &tag, b"two", &Shutdown::new()).unwrap(), b"one");
        assert!(matches!(
            place.exchange(&Span::none(), &tag, b"three", &Shutdown::new()),
            Err(PandaError::TagInUse)
        ));
    }

    #[test]
    fn shutdown_unblocks_a_waiting_exchange() {
        let place = Arc::new(InMemoryMeetingPlace::new(8));
        let shutdown = Shutdown::new();
        let signal = shutdown.clone();
        let waiter = {
            let place = place.clone();
            thread::spawn(move || place.exchange(&Span::none(), &[3u8; 32], b"lonely", &shutdown))
        };
        thread::sleep(Duration::from_millis(50));
        signal.request();
        assert!(matches!(waiter.join().unwrap(), Err(PandaError::ShutdownRequested)));
    }

    #[test]
    fn shutdown_wait_returns_early() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait_timeout(Duration::from_millis(1)));
        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(shutdown.wait_timeout(Duration::from_secs(60)));
    }
}
