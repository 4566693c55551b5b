//! Temporary password generation and one-way hashing.

use rand::{CryptoRng, Rng, rngs::OsRng};
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_PASSWORD_LEN: usize = 12;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()-_=+?";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("password generation exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("password does not meet the complexity policy")]
    PolicyViolation,

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Complexity predicate: minimum length plus one of each character class.
pub fn meets_policy(password: &str) -> bool {
    let has = |class: &[u8]| password.bytes().any(|b| class.contains(&b));
    password.chars().count() >= MIN_PASSWORD_LEN && has(UPPER) && has(LOWER) && has(DIGITS) && has(SPECIAL)
}

/// Draws passwords uniformly from the mixed alphabet until one satisfies
/// [`meets_policy`], giving up after `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordGenerator {
    length: usize,
    max_attempts: u32,
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWORD_LEN, DEFAULT_MAX_ATTEMPTS)
    }
}

impl PasswordGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self { length, max_attempts }
    }

    /// Generate using the operating system CSPRNG.
    pub fn generate(&self) -> Result<String, CredentialError> {
        self.generate_with(&mut OsRng)
    }

    pub fn generate_with<R: Rng + CryptoRng>(&self, rng: &mut R) -> Result<String, CredentialError> {
        let alphabet: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();

        for _ in 0..self.max_attempts {
            let candidate: String = (0..self.length)
                .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
                .collect();
            if meets_policy(&candidate) {
                return Ok(candidate);
            }
        }

        Err(CredentialError::Exhausted { attempts: self.max_attempts })
    }
}

/// bcrypt with a fixed cost factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: bcrypt::DEFAULT_COST }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        bcrypt::hash(plaintext, self.cost).map_err(|e| CredentialError::Hash(e.to_string()))
    }

    /// Compare against a stored hash. A malformed hash never verifies.
    pub fn verify(&self, plaintext: &str, hash: &str) -> bool {
        bcrypt::verify(plaintext, hash).unwrap_or(false)
    }
}

/// Generator and hasher bundled for provisioning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub generator: PasswordGenerator,
    pub hasher: PasswordHasher,
}

impl CredentialPolicy {
    pub fn new(generator: PasswordGenerator, hasher: PasswordHasher) -> Self {
        Self { generator, hasher }
    }

    /// A fresh temporary password and its hash, as `(plaintext, hash)`.
    pub fn temporary(&self) -> Result<(String, String), CredentialError> {
        let plaintext = self.generator.generate()?;
        let hash = self.hasher.hash(&plaintext)?;
        Ok((plaintext, hash))
    }

    /// Hash a caller-chosen password after checking it against the policy.
    pub fn hash_chosen(&self, plaintext: &str) -> Result<String, CredentialError> {
        if !meets_policy(plaintext) {
            return Err(CredentialError::PolicyViolation);
        }
        self.hasher.hash(plaintext)
    }
}
