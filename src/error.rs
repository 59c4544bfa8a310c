use thiserror::Error;

/// Failure of a user lookup in a directory.
///
/// Only `UserNotFound` is a definite answer about the directory's content;
/// everything else is a failure to get an answer at all.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("user not found")]
    UserNotFound,
    #[error("{0:#}")]
    Provider(anyhow::Error),
}

impl DirectoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::UserNotFound)
    }
}

impl From<anyhow::Error> for DirectoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Provider(err)
    }
}

#[test]
fn test_provider_errors_are_not_not_found() {
    let e = DirectoryError::from(anyhow::anyhow!("not found"));
    assert!(!e.is_not_found());
    assert_eq!(e.to_string(), "not found");
    assert!(DirectoryError::UserNotFound.is_not_found());
}
