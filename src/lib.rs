//! # PANDA Library
//!
//! A pure rust implementation of PANDA: two people who share only a weak secret (a passphrase, a shuffled deck of cards, a meeting time) use an untrusted rendezvous server to agree on a strong key and swap a small payload, typically their contact details.
//!
//! ### Warnings and Disclaimers
//!
//! - DO NOT USE IN PRODUCTION without review: this library has NOT been audited.
//! - The serialised state of an exchange contains private key material once it is past INIT. Store it as carefully as the payload it protects.
//! - The weak secret is protected against offline guessing only by the scrypt cost. `insecure_fast_derivation` removes that protection and exists for tests.
//!
//! ### Examples / API
//!
//! Alice and Bob agree on a secret in person. Either types it, or one of them generates a checksummed token and reads it out.
//!
//! ```rust
//! let token = panda::token::generate(&mut OsRng)?;
//! let secret = SharedSecret::text(token)?;
//! ```
//!
//! Each side then opens an exchange bound to the same meeting place and the payload they want to hand over.
//!
//! ```rust
//! let place = HttpMeetingPlace::new("https://panda.example", DEFAULT_PADDING, Duration::from_secs(10))?;
//! let mut kx = KeyExchange::new(OsRng, place, secret, my_contact_card)?;
//! let their_contact_card = kx.run()?;
//! ```
//!
//! `run` blocks until the peer shows up. Another thread can hold `kx.snapshot()` and save the serialised state whenever it changes; if the process dies, `KeyExchange::unmarshal` picks up after the last completed step.
//!
//! ### Under the Hood
//!
//! 1. INIT: the secret's canonical bytes are stretched into an encryption key and two rendezvous tags. Our X25519 public value is encrypted under the key with a 256-bit block cipher and padded to the meeting place's fixed size.
//! 2. EXCHANGE1: the padded value is swapped at the first tag. Decrypting the reply gives the peer's public value and so the DH shared key, which seals `len || payload || filler` with XChaCha20-Poly1305.
//! 3. EXCHANGE2: the sealed payloads are swapped at the second tag. If the secrets differed, the shared keys differ and authentication fails.

pub mod block;
pub mod config;
pub mod derive;
pub mod errors;
pub mod exchange;
pub mod http;
pub mod meeting_place;
pub mod messages;
pub mod record;
pub mod secret;
pub mod token;

pub use derive::{ScryptCost, StretchBackend, StretchPolicy};
pub use errors::{ErrorKind, PandaError};
pub use exchange::{KeyExchange, Snapshot};
pub use http::{HttpMeetingPlace, DEFAULT_PADDING};
pub use meeting_place::{InMemoryMeetingPlace, MeetingPlace, Shutdown};
pub use record::Status;
pub use secret::{Appointment, Card, CardDeckSummary, SharedSecret};
