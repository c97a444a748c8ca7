//! Identifier validation
//!
//! Ids double as file names in the blob store, so they are limited to ASCII
//! letters, digits and `_ - .`, at most [`MAX_LENGTH`] characters, and may
//! not end in a period.

/// Maximum identifier length. Leaves room for a short extension within
/// the 144-byte name limit of some Linux filesystems.
pub const MAX_LENGTH: usize = 139;

/// Why an identifier was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Zero-length id
    #[error("identifier is empty")]
    Empty,

    /// Longer than [`MAX_LENGTH`]
    #[error("identifier is {length} characters long, maximum is {MAX_LENGTH}")]
    TooLong { length: usize },

    /// Character outside `[A-Za-z0-9_.-]`
    #[error("invalid character {character:?} at position {position} in identifier {id:?}")]
    InvalidCharacter {
        id: String,
        character: char,
        position: usize,
    },

    /// Ends in `.`
    #[error("identifier {0:?} ends in a period")]
    TrailingPeriod(String),
}

#[inline]
const fn valid_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

/// Whether `id` is a valid identifier
#[must_use]
pub fn is_valid(id: &str) -> bool {
    require_valid(id).is_ok()
}

/// Check `id`, returning it unchanged when valid
///
/// # Errors
/// Returns the first rule `id` violates.
pub fn require_valid(id: &str) -> Result<&str, IdentifierError> {
    if id.is_empty() {
        return Err(IdentifierError::Empty);
    }
    let invalid = |c: char| u8::try_from(c).map_or(true, |b| !valid_byte(b));
    if let Some((position, character)) = id.chars().enumerate().find(|&(_, c)| invalid(c)) {
        return Err(IdentifierError::InvalidCharacter {
            id: id.to_string(),
            character,
            position,
        });
    }
    if id.len() > MAX_LENGTH {
        return Err(IdentifierError::TooLong { length: id.len() });
    }
    if id.ends_with('.') {
        return Err(IdentifierError::TrailingPeriod(id.to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        for id in [
            "yes",
            "yes-sir",
            "Mixed_Case.01",
            "some_rather_long_filename_with_the_extension.xml.gz",
            "0b8e4c4c-7c1e-4b53-9d55-5f1ac5a04e0c",
        ] {
            assert!(is_valid(id), "{id}");
        }
    }

    #[test]
    fn rejects_invalid_ids() {
        for id in [
            "",
            ".",
            "..",
            " hello",
            "foo!",
            "../file.xml",
            "dirname/basename",
            "caf\u{e9}",
            "trailing.",
        ] {
            assert!(!is_valid(id), "{id:?}");
        }
    }

    #[test]
    fn length_limit() {
        let longest = "x".repeat(MAX_LENGTH);
        assert!(is_valid(&longest));
        let too_long = "x".repeat(MAX_LENGTH + 1);
        assert_eq!(
            require_valid(&too_long),
            Err(IdentifierError::TooLong {
                length: MAX_LENGTH + 1
            })
        );
    }

    #[test]
    fn reports_offending_character() {
        let err = require_valid("a/b").unwrap_err();
        assert_eq!(
            err,
            IdentifierError::InvalidCharacter {
                id: "a/b".to_string(),
                character: '/',
                position: 1
            }
        );
    }
}
