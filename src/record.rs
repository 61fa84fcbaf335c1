//! Durable form of a key exchange.
//!
//! Records are encoded with bincode. The encoding of `SharedSecretRecord` is also what password derivation hashes, so the field order of these types must never change.

use serde::{Deserialize, Serialize};

use crate::errors::PandaError;

/// Status names the next step a key exchange will run, never the last completed one.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Init,
    Exchange1,
    Exchange2,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppointmentRecord {
    pub day: u32,
    pub month: u32,
    pub year: u32,
    pub hours: u32,
    pub minutes: u32,
}

/// SharedSecretRecord keeps the three secret forms as optional fields; exactly one of `secret`/`num_decks` is set in a valid record.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SharedSecretRecord {
    pub secret: Option<String>,
    pub num_decks: Option<u32>,
    pub card_count: Vec<u32>,
    pub time: Option<AppointmentRecord>,
}

/// ProgressRecord holds everything derived once the exchange has left INIT. Sensitive: it contains the DH private key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProgressRecord {
    pub dh_private: [u8; 32],
    pub key: [u8; 32],
    pub meeting1: [u8; 32],
    pub meeting2: [u8; 32],
    pub shared_key: [u8; 32],
    pub message1: Vec<u8>,
    pub message2: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KeyExchangeRecord {
    pub status: Status,
    pub shared_secret: SharedSecretRecord,
    pub key_exchange_bytes: Vec<u8>,
    /// absent while `status` is `Init`
    pub progress: Option<ProgressRecord>,
}

impl KeyExchangeRecord {
    pub fn encode(&self) -> Result<Vec<u8>, PandaError> {
        Ok(bincode::serialize(self)?)
    }

    /// decode parses a record and checks that its derived fields are present exactly when the status requires them
    pub fn decode(bytes: &[u8]) -> Result<KeyExchangeRecord, PandaError> {
        let record: KeyExchangeRecord = bincode::deserialize(bytes)?;
        match (record.status, &record.progress) {
            (Status::Init, Some(_)) => Err(PandaError::InvalidRecord("derived keys present before password derivation".into())),
            (Status::Exchange1 | Status::Exchange2, None) => Err(PandaError::InvalidRecord("derived keys missing".into())),
            _ => Ok(record),
        }
    }
}

impl SharedSecretRecord {
    /// canonical_bytes is the exact input to password derivation
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, PandaError> {
        Ok(bincode::serialize(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_record() -> KeyExchangeRecord {
        KeyExchangeRecord {
            status: Status::Init,
            shared_secret: SharedSecretRecord { secret: Some("swordfish".into()), ..Default::default() },
            key_exchange_bytes: b"hello".to_vec(),
            progress: None,
        }
    }

    #[test]
    fn decode_accepts_init_without_progress() {
        let record = init_record();
        let decoded = KeyExchangeRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn decode_rejects_missing_progress() {
        let mut record = init_record();
        record.status = Status::Exchange2;
        let err = KeyExchangeRecord::decode(&record.encode().unwrap()).unwrap_err();
        assert!(matches!(err, PandaError::InvalidRecord(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(KeyExchangeRecord::decode(&[0xff; 3]).is_err());
    }

    #[test]
    fn canonical_bytes_depend_on_every_field() {
        let base = SharedSecretRecord { secret: Some("swordfish".into()), ..Default::default() };
        let mut timed = base.clone();
        timed.time = Some(AppointmentRecord { day: 1, month: 2, year: 2030, hours: 3, minutes: 4 });
        assert_ne!(base.canonical_bytes().unwrap(), timed.canonical_bytes().unwrap());
        assert_eq!(base.canonical_bytes().unwrap(), base.clone().canonical_bytes().unwrap());
    }
}
