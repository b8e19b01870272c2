/// Short codes members type in to join a group
use crate::error::{MixtapeError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alphabet without the easily confused `0`, `1`, `I` and `O`
pub const DEFAULT_CODE_ALPHABET: &str = "23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

pub const DEFAULT_CODE_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(String);

impl JoinCode {
    /// Generate a random code of `len` characters drawn from `alphabet`
    pub fn generate(len: usize, alphabet: &str) -> Self {
        let chars: Vec<char> = alphabet.chars().collect();
        if chars.is_empty() {
            return Self::generate(len, DEFAULT_CODE_ALPHABET);
        }
        let mut rng = rand::thread_rng();
        let code = (0..len.max(1))
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect();
        Self(code)
    }

    /// Generate a code with the default length and alphabet
    pub fn random() -> Self {
        Self::generate(DEFAULT_CODE_LENGTH, DEFAULT_CODE_ALPHABET)
    }

    /// Parse user input, normalising case and surrounding whitespace
    pub fn parse(input: &str) -> Result<Self> {
        let code = input.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(MixtapeError::validation("Join code cannot be empty"));
        }
        if let Some(bad) = code.chars().find(|c| !DEFAULT_CODE_ALPHABET.contains(*c)) {
            return Err(MixtapeError::validation(format!(
                "Join code contains invalid character '{bad}'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
