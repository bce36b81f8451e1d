//! Pairing-code synthesis.
//!
//! Codes are read back to an administrator over chat, so the alphabet skips
//! visually ambiguous symbols (no `0/O/1/I`). `rand::rng()` is a CSPRNG and
//! `random_range` samples without modulo bias, which keeps codes
//! unpredictable to an unpaired sender.

use std::collections::HashSet;

use rand::Rng;

use crate::error::{Error, Result};

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 8;

/// Collision-retry budget before giving up. With a 32^8 code space this
/// only trips when the stored state is pathological.
const MAX_ATTEMPTS: usize = 500;

fn random_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Synthesize a code distinct from every code in `active` (uppercased).
pub(crate) fn unique_code(active: &HashSet<String>) -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let code = random_code();
        if !active.contains(&code) {
            return Ok(code);
        }
    }
    Err(Error::CodeSpaceExhausted {
        attempts: MAX_ATTEMPTS,
    })
}
