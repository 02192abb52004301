use uuid::Uuid;

use crate::error::{Error, Result};

/// Source of fresh session identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 32 lowercase hex characters from a random v4 UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Reject ids that cannot safely become a file name or cache key suffix.
pub fn validate_session_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.chars().any(char::is_control);
    if bad {
        return Err(Error::InvalidSessionId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_hex_and_unique() {
        let generator = RandomIdGenerator;
        let a = generator.generate();
        let b = generator.generate();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        validate_session_id(&a).unwrap();
    }

    #[test]
    fn rejects_path_like_ids() {
        for id in ["", ".", "../etc", "a/b", "a\\b", "x\0y", "tab\there"] {
            assert!(
                matches!(validate_session_id(id), Err(Error::InvalidSessionId(_))),
                "{id:?} should be rejected"
            );
        }
        validate_session_id("abc-123_DEF").unwrap();
    }
}
