use std::collections::HashSet;

use base64::engine::general_purpose;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

/// Length of each half of a generated credential pair
const GENERATED_LEN: usize = 16;

/// Immutable set of accepted Basic credentials.
///
/// Each configured "user:pass" string is encoded once with standard base64
/// and membership is tested byte-for-byte against the token clients present
/// in `Proxy-Authorization: Basic <token>`.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    tokens: HashSet<String>,
}

impl CredentialSet {
    /// Build the set from plain "user:pass" strings, optionally appending
    /// one freshly generated random pair (logged once so the operator can
    /// hand it out).
    pub fn new<I>(pairs: I, generate: bool) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut tokens: HashSet<String> = pairs
            .into_iter()
            .map(|pair| general_purpose::STANDARD.encode(pair))
            .collect();

        if generate {
            let user = random_token(GENERATED_LEN);
            let pass = random_token(GENERATED_LEN);
            info!("generated credential {}:{}", user, pass);
            tokens.insert(general_purpose::STANDARD.encode(format!("{}:{}", user, pass)));
        }

        Self { tokens }
    }

    /// An empty set means authentication is disabled
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of accepted credentials
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Validate a presented `Proxy-Authorization` value of the form
    /// "Basic <token>". The scheme is matched case-insensitively; the token
    /// must be a member of the set.
    pub fn validate(&self, presented: &str) -> bool {
        let mut parts = presented.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) => {
                scheme.eq_ignore_ascii_case("Basic") && self.tokens.contains(token)
            }
            _ => false,
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(pair: &str) -> String {
        general_purpose::STANDARD.encode(pair)
    }

    #[test]
    fn test_validate_member_token() {
        let set = CredentialSet::new(vec!["alice:secret".to_string()], false);

        assert!(set.validate(&format!("Basic {}", encode("alice:secret"))));
        assert!(!set.validate(&format!("Basic {}", encode("alice:wrong"))));
    }

    #[test]
    fn test_membership_is_insertion_order_independent() {
        let forward = CredentialSet::new(
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()],
            false,
        );
        let reverse = CredentialSet::new(
            vec!["c:3".to_string(), "b:2".to_string(), "a:1".to_string()],
            false,
        );

        for pair in ["a:1", "b:2", "c:3"] {
            let header = format!("Basic {}", encode(pair));
            assert!(forward.validate(&header));
            assert!(reverse.validate(&header));
        }
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let set = CredentialSet::new(vec!["u:p".to_string()], false);
        let token = encode("u:p");

        assert!(set.validate(&format!("basic {}", token)));
        assert!(set.validate(&format!("BASIC {}", token)));
        assert!(!set.validate(&format!("Bearer {}", token)));
    }

    #[test]
    fn test_rejects_malformed_header_values() {
        let set = CredentialSet::new(vec!["u:p".to_string()], false);
        let token = encode("u:p");

        assert!(!set.validate(""));
        assert!(!set.validate("Basic"));
        assert!(!set.validate(&token)); // bare token, no scheme
        assert!(!set.validate(&format!("Basic {} extra", token)));
    }

    #[test]
    fn test_empty_set_disables_auth() {
        let set = CredentialSet::new(Vec::new(), false);
        assert!(set.is_empty());
        assert!(!set.validate(&format!("Basic {}", encode("any:thing"))));
    }

    #[test]
    fn test_generated_pair_is_a_member() {
        let set = CredentialSet::new(Vec::new(), true);
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_generated_token_shape() {
        let token = random_token(GENERATED_LEN);
        assert_eq!(token.len(), GENERATED_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
