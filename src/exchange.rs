//! The key exchange state machine.
//!
//! `Init -> Exchange1 -> Exchange2 -> done`. The stored status is always the next step to run, and the serialised snapshot is refreshed right after every step, before the next one starts. Resuming from any snapshot replays at most the step that was in flight, which only ever re-posts the same message at the meeting place.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, info, info_span, Span};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::block::WideBlockCipher;
use crate::derive::{derive_password, DerivedKeys, InProcessScrypt, ScryptCost, StretchBackend};
use crate::errors::PandaError;
use crate::meeting_place::{MeetingPlace, Shutdown};
use crate::messages;
use crate::record::{KeyExchangeRecord, ProgressRecord, Status};
use crate::secret::SharedSecret;

/// DEFAULT_BACKEND stretches on the calling thread. Re-executing a worker is the embedding binary's decision.
static DEFAULT_BACKEND: InProcessScrypt = InProcessScrypt { cost: ScryptCost::PROTOCOL };

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Serialised {
    version: u64,
    bytes: Vec<u8>,
}

/// Snapshot is the latest serialised state of a key exchange, readable from other threads while `run` is blocked at the meeting place.
///
/// It contains the DH private key once the exchange is past INIT; store it like any other secret.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<(Mutex<Serialised>, Condvar)>,
}

impl Snapshot {
    fn new(bytes: Vec<u8>) -> Self {
        Self { inner: Arc::new((Mutex::new(Serialised { version: 0, bytes }), Condvar::new())) }
    }

    fn replace(&self, bytes: Vec<u8>) {
        let (state, cond) = &*self.inner;
        let mut state = lock(state);
        state.version += 1;
        state.bytes = bytes;
        cond.notify_all();
    }

    pub fn get(&self) -> Vec<u8> {
        lock(&self.inner.0).bytes.clone()
    }

    /// version goes up every time the exchange persists its state
    pub fn version(&self) -> u64 {
        lock(&self.inner.0).version
    }

    /// wait_newer blocks until a version greater than `seen` exists or `timeout` passes, returning the latest version and bytes
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> (u64, Vec<u8>) {
        let (state, cond) = &*self.inner;
        let guard = lock(state);
        let guard = match cond.wait_timeout_while(guard, timeout, |s| s.version <= seen) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        (guard.version, guard.bytes.clone())
    }
}

/// KeyExchange is one side of one handshake. It owns all key material for its lifetime.
pub struct KeyExchange<M, R> {
    rng: R,
    meeting_place: M,
    shutdown: Shutdown,
    fast_derivation: bool,
    backend: Option<Box<dyn StretchBackend>>,
    span: Span,

    status: Status,
    shared_secret: SharedSecret,
    payload: Vec<u8>,
    snapshot: Snapshot,

    keys: DerivedKeys,
    dh_private: StaticSecret,
    dh_public: PublicKey,
    shared_key: Zeroizing<[u8; 32]>,
    message1: Vec<u8>,
    message2: Vec<u8>,
}

fn fresh_private<R: RngCore + CryptoRng>(rng: &mut R) -> Result<StaticSecret, PandaError> {
    let mut bytes = Zeroizing::new([0u8; 32]);
    rng.try_fill_bytes(&mut bytes[..])?;
    Ok(StaticSecret::from(*bytes))
}

impl<M: MeetingPlace, R: RngCore + CryptoRng> KeyExchange<M, R> {
    /// new starts a fresh exchange at INIT with a new DH key pair. Fails straight away if `payload` cannot fit the meeting place's messages.
    pub fn new(mut rng: R, meeting_place: M, shared_secret: SharedSecret, payload: Vec<u8>) -> Result<Self, PandaError> {
        messages::check_capacity(meeting_place.padding(), payload.len())?;
        let dh_private = fresh_private(&mut rng)?;
        let mut kx = Self::assemble(rng, meeting_place, Status::Init, shared_secret, payload, dh_private);
        kx.update_serialised()?;
        Ok(kx)
    }

    /// unmarshal reloads an exchange from `marshal` output. The DH public value is always recomputed from the stored private key.
    pub fn unmarshal(mut rng: R, meeting_place: M, serialised: &[u8]) -> Result<Self, PandaError> {
        let record = KeyExchangeRecord::decode(serialised)?;
        let shared_secret = SharedSecret::from_record(&record.shared_secret)?;
        messages::check_capacity(meeting_place.padding(), record.key_exchange_bytes.len())?;

        let mut kx = match &record.progress {
            // nothing was sent before derivation, so a new key pair is as good as the lost one
            None => {
                let dh_private = fresh_private(&mut rng)?;
                Self::assemble(rng, meeting_place, record.status, shared_secret, record.key_exchange_bytes, dh_private)
            }
            Some(progress) => {
                let dh_private = StaticSecret::from(progress.dh_private);
                let mut kx = Self::assemble(
                    rng,
                    meeting_place,
                    record.status,
                    shared_secret,
                    record.key_exchange_bytes.clone(),
                    dh_private,
                );
                kx.keys = DerivedKeys { key: progress.key, meeting1: progress.meeting1, meeting2: progress.meeting2 };
                kx.shared_key = Zeroizing::new(progress.shared_key);
                kx.message1 = progress.message1.clone();
                kx.message2 = progress.message2.clone();
                kx
            }
        };
        kx.update_serialised()?;
        Ok(kx)
    }

    fn assemble(
        rng: R,
        meeting_place: M,
        status: Status,
        shared_secret: SharedSecret,
        payload: Vec<u8>,
        dh_private: StaticSecret,
    ) -> Self {
        Self {
            rng,
            meeting_place,
            shutdown: Shutdown::new(),
            fast_derivation: false,
            backend: None,
            span: info_span!("panda_kx"),
            status,
            shared_secret,
            payload,
            snapshot: Snapshot::new(Vec::new()),
            keys: DerivedKeys::default(),
            dh_public: PublicKey::from(&dh_private),
            dh_private,
            shared_key: Zeroizing::new([0u8; 32]),
            message1: Vec::new(),
            message2: Vec::new(),
        }
    }

    /// with_shutdown replaces the exchange's cancellation signal
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// with_stretch_backend picks where scrypt runs. Without one, scrypt runs in-process at protocol cost.
    pub fn with_stretch_backend(mut self, backend: Box<dyn StretchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// insecure_fast_derivation skips stretching for every secret. Only for tests: a weak secret derived this way can be brute-forced offline.
    pub fn insecure_fast_derivation(mut self, fast: bool) -> Self {
        self.fast_derivation = fast;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// snapshot returns a handle other threads can use to read the serialised state
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// marshal returns the latest serialised state
    pub fn marshal(&self) -> Vec<u8> {
        self.snapshot.get()
    }

    fn to_record(&self) -> KeyExchangeRecord {
        let progress = match self.status {
            Status::Init => None,
            Status::Exchange1 | Status::Exchange2 => Some(ProgressRecord {
                dh_private: self.dh_private.to_bytes(),
                key: self.keys.key,
                meeting1: self.keys.meeting1,
                meeting2: self.keys.meeting2,
                shared_key: *self.shared_key,
                message1: self.message1.clone(),
                message2: self.message2.clone(),
            }),
        };
        KeyExchangeRecord {
            status: self.status,
            shared_secret: self.shared_secret.to_record(),
            key_exchange_bytes: self.payload.clone(),
            progress,
        }
    }

    fn update_serialised(&mut self) -> Result<(), PandaError> {
        let bytes = self.to_record().encode()?;
        self.snapshot.replace(bytes);
        Ok(())
    }

    fn advance(&mut self, next: Status) -> Result<(), PandaError> {
        self.status = next;
        self.update_serialised()
    }

    /// run drives the exchange from its stored status to completion and returns the peer's payload.
    ///
    /// Shutdown is checked before every step. On `ShutdownRequested` the snapshot holds the last completed step and a later `run` picks up from there.
    pub fn run(&mut self) -> Result<Vec<u8>, PandaError> {
        loop {
            if self.shutdown.is_requested() {
                info!(parent: &self.span, status = ?self.status, "shutdown requested");
                return Err(PandaError::ShutdownRequested);
            }
            if let Some(reply) = self.step()? {
                return Ok(reply);
            }
        }
    }

    /// step runs exactly the next pending step and persists the result, returning the peer's payload once the last step is done
    pub fn step(&mut self) -> Result<Option<Vec<u8>>, PandaError> {
        match self.status {
            Status::Init => {
                self.derive_password()?;
                self.advance(Status::Exchange1)?;
                info!(parent: &self.span, "password derivation complete");
                Ok(None)
            }
            Status::Exchange1 => {
                self.exchange1()?;
                self.advance(Status::Exchange2)?;
                info!(parent: &self.span, "first message exchange complete");
                Ok(None)
            }
            Status::Exchange2 => {
                let reply = self.exchange2()?;
                info!(parent: &self.span, len = reply.len(), "key exchange complete");
                Ok(Some(reply))
            }
        }
    }

    fn stretch_backend(&self) -> &dyn StretchBackend {
        match &self.backend {
            Some(backend) => backend.as_ref(),
            None => &DEFAULT_BACKEND,
        }
    }

    fn derive_password(&mut self) -> Result<(), PandaError> {
        let padding = self.meeting_place.padding();
        messages::check_capacity(padding, self.payload.len())?;

        self.keys = derive_password(&self.shared_secret, self.fast_derivation, self.stretch_backend())?;

        let cipher = WideBlockCipher::new(&self.keys.key);
        self.message1 = messages::seal_first(&mut self.rng, &cipher, self.dh_public.as_bytes(), padding)?;
        Ok(())
    }

    fn exchange1(&mut self) -> Result<(), PandaError> {
        let padding = self.meeting_place.padding();
        messages::check_capacity(padding, self.payload.len())?;

        let reply = self.meeting_place.exchange(&self.span, &self.keys.meeting1, &self.message1, &self.shutdown)?;
        let cipher = WideBlockCipher::new(&self.keys.key);
        let peer_public = PublicKey::from(messages::open_first(&cipher, &reply)?);

        let shared = self.dh_private.diffie_hellman(&peer_public);
        if !shared.was_contributory() {
            return Err(PandaError::NonContributory);
        }
        self.shared_key = Zeroizing::new(shared.to_bytes());
        debug!(parent: &self.span, "derived session key");

        self.message2 = messages::seal_second(&mut self.rng, &self.shared_key, &self.payload, padding)?;
        Ok(())
    }

    fn exchange2(&mut self) -> Result<Vec<u8>, PandaError> {
        let reply = self.meeting_place.exchange(&self.span, &self.keys.meeting2, &self.message2, &self.shutdown)?;
        messages::open_second(&self.shared_key, &reply)
    }
}
