use proptest::prelude::*;
use standoff_blob::{is_valid, BlobStore, Bucket, IdentifierError, MAX_LENGTH};
use std::time::Duration;

proptest! {
    #[test]
    fn prop_allowed_characters_are_valid(id in "[A-Za-z0-9_.-]{0,138}[A-Za-z0-9_-]") {
        prop_assert!(is_valid(&id));
    }

    #[test]
    fn prop_any_other_character_is_rejected(
        prefix in "[a-z]{0,10}",
        bad in "[^A-Za-z0-9_.-]",
        suffix in "[a-z]{1,10}",
    ) {
        let id = format!("{prefix}{bad}{suffix}");
        let rejected = matches!(
            standoff_blob::require_valid(&id),
            Err(IdentifierError::InvalidCharacter { .. })
        );
        prop_assert!(rejected, "{:?}", id);
    }

    #[test]
    fn prop_blob_path_is_bucket_dir_plus_id(id in "[a-z0-9]{1,40}") {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path(), Duration::from_millis(100)).unwrap();
        let path = store.path_for(&id).unwrap();
        prop_assert_eq!(
            path,
            dir.path().join(Bucket::of(&id).relative_dir()).join(&id)
        );
    }
}

#[test]
fn test_length_boundary() {
    assert!(is_valid(&"a".repeat(MAX_LENGTH)));
    assert!(!is_valid(&"a".repeat(MAX_LENGTH + 1)));
}
