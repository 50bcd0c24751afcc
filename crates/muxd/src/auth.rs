//! Bearer token issuance and constant-time validation.

use rand::Rng;

const TOKEN_LEN: usize = 32;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[must_use]
pub fn generate_token() -> String {
  let mut rng = rand::rng();
  (0..TOKEN_LEN)
    .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
    .collect()
}

/// Constant-time equality, so an attacker probing the handshake can't learn
/// the token one byte at a time from response latency.
#[must_use]
pub fn tokens_match(expected: &str, supplied: &str) -> bool {
  let expected = expected.as_bytes();
  let supplied = supplied.as_bytes();
  if expected.len() != supplied.len() {
    return false;
  }
  let mut diff: u8 = 0;
  for (a, b) in expected.iter().zip(supplied.iter()) {
    diff |= a ^ b;
  }
  diff == 0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generated_tokens_have_expected_length_and_alphabet() {
    let token = generate_token();
    assert_eq!(token.len(), TOKEN_LEN);
    assert!(token.bytes().all(|b| ALPHABET.contains(&b)));
  }

  #[test]
  fn matching_tokens_compare_equal() {
    let token = generate_token();
    assert!(tokens_match(&token, &token));
  }

  #[test]
  fn mismatched_length_is_rejected() {
    assert!(!tokens_match("short", "shorter-token"));
  }

  #[test]
  fn single_byte_difference_is_rejected() {
    let a = "a".repeat(TOKEN_LEN);
    let mut b = a.clone();
    b.replace_range(0..1, "b");
    assert!(!tokens_match(&a, &b));
  }
}
