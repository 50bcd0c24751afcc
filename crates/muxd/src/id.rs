//! Session id generation.
//!
//! Ids are 12-character printable, URL-safe base62 strings. Unlike the
//! teacher's task ids (small sequential integers scoped to a git repo),
//! sessions here are not tied to a repo and must be globally unique and
//! guessable-resistant enough to double as the tmux session suffix.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 12;

/// Generate a new random session id.
#[must_use]
pub fn generate() -> String {
  let mut rng = rand::rng();
  (0..ID_LEN)
    .map(|_| {
      let idx = rng.random_range(0..ALPHABET.len());
      ALPHABET[idx] as char
    })
    .collect()
}

/// Parse a multiplexer session name of the form `<prefix>-<id>` back into its
/// id, returning `None` if the name doesn't match the prefix or the
/// remainder isn't a well-formed id.
#[must_use]
pub fn parse_mux_name<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
  let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
  if rest.len() == ID_LEN && rest.bytes().all(|b| ALPHABET.contains(&b)) {
    Some(rest)
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generates_ids_of_expected_length_and_alphabet() {
    for _ in 0..100 {
      let id = generate();
      assert_eq!(id.len(), ID_LEN);
      assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }
  }

  #[test]
  fn generates_distinct_ids() {
    let a = generate();
    let b = generate();
    assert_ne!(a, b);
  }

  #[test]
  fn parses_matching_mux_name() {
    let id = generate();
    let name = format!("muxd-{id}");
    assert_eq!(parse_mux_name(&name, "muxd"), Some(id.as_str()));
  }

  #[test]
  fn rejects_non_matching_prefix() {
    assert_eq!(parse_mux_name("other-abcdefghijkl", "muxd"), None);
  }

  #[test]
  fn rejects_wrong_length() {
    assert_eq!(parse_mux_name("muxd-short", "muxd"), None);
  }
}
