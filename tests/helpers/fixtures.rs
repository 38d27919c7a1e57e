/// Common test fixtures and data structures
///
/// Defines reusable record types and fake collaborators shared by the
/// integration tests.
use super::{Deserialize, Serialize};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dynamo_model::{BoxError, Clock, IdGenerator, KeyManagement, Model, impl_record};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Street address nested two levels deep
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Address {
    #[serde(rename = "Street")]
    pub street: String,
    #[serde(rename = "City")]
    pub city: String,
}

/// Family a dog lives with
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Home {
    #[serde(rename = "FamilyName")]
    pub family_name: String,
    #[serde(rename = "Address")]
    pub address: Address,
}

/// Dog record used by the chain tests
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Dog {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Breed")]
    pub breed: String,
    #[serde(rename = "Age")]
    pub age: u32,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Environment")]
    pub environment: String,
    #[serde(rename = "Home")]
    pub home: Home,
    #[serde(flatten)]
    pub model: Model,
}

impl_record!(Dog, model);

impl Dog {
    pub fn new(name: &str, breed: &str, age: u32, status: &str, environment: &str, family: &str, city: &str) -> Self {
        Dog {
            name: name.into(),
            breed: breed.into(),
            age,
            status: status.into(),
            environment: environment.into(),
            home: Home {
                family_name: family.into(),
                address: Address {
                    street: format!("{name} St"),
                    city: city.into(),
                },
            },
            model: Model::default(),
        }
    }
}

/// Six dogs covering every breed, age and environment combination the chain tests use
pub fn six_dogs() -> Vec<Dog> {
    vec![
        Dog::new("Buddy", "Dalmatian", 3, "IN_PROGRESS", "dev", "Miller", "Dogtown"),
        Dog::new("Fido", "Labrador", 5, "QUEUED", "dev", "Smith", "Petsville"),
        Dog::new("Rex", "Labrador", 3, "IN_PROGRESS", "prod", "Miller", "Dogtown"),
        Dog::new("Spike", "Retriever", 7, "COMPLETED", "dev", "Johnson", "Petsville"),
        Dog::new("Luna", "Dalmatian", 2, "QUEUED", "staging", "Wilson", "Dogtown"),
        Dog::new("Max", "Beagle", 4, "IN_PROGRESS", "dev", "Brown", "Petsville"),
    ]
}

/// User with an optional flag and an optional nested owner
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct TestUser {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IsAdmin")]
    pub is_admin: Option<bool>,
    #[serde(rename = "Manager")]
    pub manager: Option<Home>,
    #[serde(flatten)]
    pub model: Model,
}

impl_record!(TestUser, model);

/// Record carrying an encrypted field
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Profile {
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Secret")]
    pub secret: String,
    #[serde(flatten)]
    pub model: Model,
}

impl_record!(Profile, model, ["Secret"]);

/// Record that forgot to flatten its metadata
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Cat {
    #[serde(rename = "Name")]
    pub name: String,
    pub model: Model,
}

impl_record!(Cat, model);

/// Identities `id-0001`, `id-0002`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicUsize,
}

impl IdGenerator for SequentialIds {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("id-{n:04}")
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new() -> Self {
        FixedClock {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Key service that "encrypts" by prefixing the key id and reversing the bytes
#[derive(Debug, Default)]
pub struct ReversingKeys {
    pub fail: AtomicBool,
    pub encrypt_calls: AtomicUsize,
    pub decrypt_calls: AtomicUsize,
}

#[async_trait]
impl KeyManagement for ReversingKeys {
    async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("key service unavailable".into());
        }
        let mut ciphertext = format!("{key_id}:").into_bytes();
        ciphertext.extend(plaintext.iter().rev());
        Ok(ciphertext)
    }

    async fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<Vec<u8>, BoxError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("key service unavailable".into());
        }
        let prefix = format!("{key_id}:");
        let body = ciphertext
            .strip_prefix(prefix.as_bytes())
            .ok_or("ciphertext was not produced with this key")?;
        Ok(body.iter().rev().copied().collect())
    }
}
