//! The shared secret both parties know before the exchange: a passphrase or a shuffled-deck summary, optionally bound to an appointment time.

use std::fmt;
use std::str::FromStr;

use crate::errors::PandaError;
use crate::record::{AppointmentRecord, SharedSecretRecord};
use crate::token;

/// NUM_CARDS is the number of distinct cards in one deck
pub const NUM_CARDS: usize = 52;
const RANKS: &str = "A23456789TJQK";
const SUITS: &str = "SHDC";

/// Card is one playing card, written as rank then suit: `AS`, `TD`, `7h`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Card {
    index: usize,
}

impl Card {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl FromStr for Card {
    type Err = PandaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let mut chars = upper.chars();
        let (rank, suit) = match (chars.next(), chars.next(), chars.next()) {
            (Some(rank), Some(suit), None) => (rank, suit),
            _ => return Err(PandaError::InvalidSecret(format!("card {:?} is not rank+suit", s))),
        };
        let rank = RANKS.find(rank).ok_or_else(|| PandaError::InvalidSecret(format!("unknown rank in {:?}", s)))?;
        let suit = SUITS.find(suit).ok_or_else(|| PandaError::InvalidSecret(format!("unknown suit in {:?}", s)))?;
        Ok(Card { index: suit * RANKS.len() + rank })
    }
}

/// CardDeckSummary is the canonical form of a card-deck secret: how often each card appears across the decks. The order the cards were seen in is deliberately dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardDeckSummary {
    num_decks: u32,
    counts: Vec<u32>,
}

impl CardDeckSummary {
    pub fn new(num_decks: u32, counts: Vec<u32>) -> Result<Self, PandaError> {
        if num_decks == 0 {
            return Err(PandaError::InvalidSecret("deck count must be positive".into()));
        }
        if counts.len() != NUM_CARDS {
            return Err(PandaError::InvalidSecret(format!("expected {} card counts, got {}", NUM_CARDS, counts.len())));
        }
        if counts.iter().any(|&c| c > num_decks) {
            return Err(PandaError::InvalidSecret("a card appears more often than there are decks".into()));
        }
        if counts.iter().all(|&c| c == 0) {
            return Err(PandaError::InvalidSecret("no cards given".into()));
        }
        Ok(Self { num_decks, counts })
    }

    /// from_cards canonicalises a sequence of cards drawn from `num_decks` shuffled decks
    pub fn from_cards(num_decks: u32, cards: &[Card]) -> Result<Self, PandaError> {
        let mut counts = vec![0u32; NUM_CARDS];
        for card in cards {
            counts[card.index()] += 1;
        }
        Self::new(num_decks, counts)
    }

    pub fn num_decks(&self) -> u32 {
        self.num_decks
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}

/// Appointment binds an exchange to an agreed meeting time, to the minute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Appointment {
    pub day: u32,
    pub month: u32,
    pub year: u32,
    pub hours: u32,
    pub minutes: u32,
}

impl Appointment {
    pub fn new(year: u32, month: u32, day: u32, hours: u32, minutes: u32) -> Result<Self, PandaError> {
        if year == 0 || !(1..=12).contains(&month) || !(1..=31).contains(&day) || hours > 23 || minutes > 59 {
            return Err(PandaError::InvalidSecret(format!(
                "invalid appointment {:04}-{:02}-{:02} {:02}:{:02}",
                year, month, day, hours, minutes
            )));
        }
        Ok(Self { day, month, year, hours, minutes })
    }
}

impl FromStr for Appointment {
    type Err = PandaError;

    /// Parses `YYYY-MM-DD HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PandaError::InvalidSecret(format!("appointment {:?} is not YYYY-MM-DD HH:MM", s));
        let (date, time) = s.trim().split_once(' ').ok_or_else(bad)?;
        let date: Vec<&str> = date.split('-').collect();
        let time: Vec<&str> = time.trim().split(':').collect();
        if date.len() != 3 || time.len() != 2 {
            return Err(bad());
        }
        let num = |part: &str| part.parse::<u32>().map_err(|_| bad());
        Appointment::new(num(date[0])?, num(date[1])?, num(date[2])?, num(time[0])?, num(time[1])?)
    }
}

impl fmt::Display for Appointment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02} {:02}:{:02}", self.year, self.month, self.day, self.hours, self.minutes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretKind {
    Text(String),
    Cards(CardDeckSummary),
}

/// SharedSecret is immutable once built; a key exchange serialises it whole on every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedSecret {
    kind: SecretKind,
    appointment: Option<Appointment>,
}

impl SharedSecret {
    /// text builds a passphrase secret. Strings that look like tokens must carry a valid checksum.
    pub fn text(secret: impl Into<String>) -> Result<Self, PandaError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(PandaError::InvalidSecret("empty secret".into()));
        }
        if !token::is_acceptable(&secret) {
            return Err(PandaError::InvalidSecret("secret token checksum mismatch".into()));
        }
        Ok(Self { kind: SecretKind::Text(secret), appointment: None })
    }

    pub fn cards(summary: CardDeckSummary) -> Self {
        Self { kind: SecretKind::Cards(summary), appointment: None }
    }

    pub fn with_appointment(mut self, appointment: Appointment) -> Self {
        self.appointment = Some(appointment);
        self
    }

    pub fn kind(&self) -> &SecretKind {
        &self.kind
    }

    pub fn appointment(&self) -> Option<&Appointment> {
        self.appointment.as_ref()
    }

    /// is_strong_random is true when the secret is a no-stretch token
    pub fn is_strong_random(&self) -> bool {
        matches!(&self.kind, SecretKind::Text(s) if token::is_strong(s))
    }

    pub fn to_record(&self) -> SharedSecretRecord {
        let mut record = SharedSecretRecord::default();
        match &self.kind {
            SecretKind::Text(s) => record.secret = Some(s.clone()),
            SecretKind::Cards(summary) => {
                record.num_decks = Some(summary.num_decks);
                record.card_count = summary.counts.clone();
            }
        }
        record.time = self.appointment.map(|a| AppointmentRecord {
            day: a.day,
            month: a.month,
            year: a.year,
            hours: a.hours,
            minutes: a.minutes,
        });
        record
    }

    /// from_record enforces that exactly one of a non-empty text secret or a positive deck count is present
    pub fn from_record(record: &SharedSecretRecord) -> Result<Self, PandaError> {
        let text = record.secret.as_deref().filter(|s| !s.is_empty());
        let decks = record.num_decks.filter(|&n| n > 0);
        let kind = match (text, decks) {
            (Some(s), None) => SecretKind::Text(s.to_string()),
            (None, Some(n)) => SecretKind::Cards(CardDeckSummary::new(n, record.card_count.clone())?),
            (Some(_), Some(_)) => return Err(PandaError::InvalidSecret("both a text secret and cards".into())),
            (None, None) => return Err(PandaError::InvalidSecret("neither a text secret nor cards".into())),
        };
        let appointment = match &record.time {
            Some(t) => Some(Appointment::new(t.year, t.month, t.day, t.hours, t.minutes)?),
            None => None,
        };
        Ok(Self { kind, appointment })
    }

    /// canonical_bytes is the serialised form that password derivation consumes
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, PandaError> {
        self.to_record().canonical_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards(s: &str) -> Vec<Card> {
        s.split_whitespace().map(|c| c.parse().unwrap()).collect()
    }

    #[test]
    fn parse_cards() {
        assert_eq!("AS".parse::<Card>().unwrap().index(), 0);
        assert_eq!("KC".parse::<Card>().unwrap().index(), NUM_CARDS - 1);
        assert_eq!("th".parse::<Card>().unwrap(), "TH".parse::<Card>().unwrap());
        assert!("1S".parse::<Card>().is_err());
        assert!("ASX".parse::<Card>().is_err());
        assert!("AX".parse::<Card>().is_err());
    }

    #[test]
    fn deck_summary_ignores_order() {
        let a = CardDeckSummary::from_cards(2, &cards("AS 2H AS KC")).unwrap();
        let b = CardDeckSummary::from_cards(2, &cards("KC AS 2H AS")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.counts()[0], 2);
    }

    #[test]
    fn deck_summary_validation() {
        assert!(CardDeckSummary::from_cards(1, &cards("AS AS")).is_err());
        assert!(CardDeckSummary::from_cards(0, &cards("AS")).is_err());
        assert!(CardDeckSummary::from_cards(1, &[]).is_err());
        assert!(CardDeckSummary::new(1, vec![1; 3]).is_err());
    }

    #[test]
    fn text_secret_validation() {
        assert!(SharedSecret::text("").is_err());
        assert!(SharedSecret::text("r!00").is_err());
        assert!(SharedSecret::text("meet me by the docks").is_ok());
    }

    #[test]
    fn appointment_parsing() {
        let a: Appointment = "2031-07-04 09:30".parse().unwrap();
        assert_eq!((a.year, a.month, a.day, a.hours, a.minutes), (2031, 7, 4, 9, 30));
        assert_eq!(a.to_string(), "2031-07-04 09:30");
        assert!("2031-13-04 09:30".parse::<Appointment>().is_err());
        assert!("2031-07-04".parse::<Appointment>().is_err());
        assert!("2031-07-04 24:00".parse::<Appointment>().is_err());
    }

    #[test]
    fn record_round_trip() {
        let secret = SharedSecret::cards(CardDeckSummary::from_cards(1, &cards("AS 2H 3D")).unwrap())
            .with_appointment(Appointment::new(2030, 1, 2, 3, 4).unwrap());
        let restored = SharedSecret::from_record(&secret.to_record()).unwrap();
        assert_eq!(restored, secret);
        assert_eq!(restored.canonical_bytes().unwrap(), secret.canonical_bytes().unwrap());
    }

    #[test]
    fn record_needs_exactly_one_form() {
        assert!(SharedSecret::from_record(&SharedSecretRecord::default()).is_err());
        let empty_text = SharedSecretRecord { secret: Some(String::new()), ..Default::default() };
        assert!(SharedSecret::from_record(&empty_text).is_err());
        let mut both = SharedSecret::cards(CardDeckSummary::from_cards(1, &cards("AS")).unwrap()).to_record();
        both.secret = Some("and text".into());
        assert!(SharedSecret::from_record(&both).is_err());
        let short_counts = SharedSecretRecord { num_decks: Some(1), card_count: vec![1], ..Default::default() };
        assert!(SharedSecret::from_record(&short_counts).is_err());
    }

    #[test]
    fn appointment_changes_canonical_bytes() {
        let plain = SharedSecret::text("swordfish").unwrap();
        let timed = plain.clone().with_appointment(Appointment::new(2030, 1, 2, 3, 4).unwrap());
        assert_ne!(plain.canonical_bytes().unwrap(), timed.canonical_bytes().unwrap());
    }

    #[test]
    fn only_strong_tokens_skip_stretching() {
        use rand_core::OsRng;
        assert!(!SharedSecret::text("swordfish").unwrap().is_strong_random());
        assert!(!SharedSecret::text(token::generate(&mut OsRng).unwrap()).unwrap().is_strong_random());
        assert!(SharedSecret::text(token::generate_strong(&mut OsRng).unwrap()).unwrap().is_strong_random());
    }
}
