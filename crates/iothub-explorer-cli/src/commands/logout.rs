//! Logout command implementation.

use iothub_explorer_core::storage::SessionStore;

use crate::error::CliError;
use crate::output::console;

/// Run the logout command
pub async fn run_logout() -> Result<(), CliError> {
    let store = SessionStore::open_default()?;

    if logout(&store).await? {
        console::print_success("Session successfully terminated.");
    } else {
        println!("No session information found.");
    }

    Ok(())
}

/// Delete the cached session. Returns `false` when there was none.
pub async fn logout(store: &SessionStore) -> Result<bool, CliError> {
    let removed = store.remove().await?;
    tracing::debug!(path = %store.path().display(), removed, "logout");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logout_removes_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("config"));
        store.save("SharedAccessSignature sr=h&sig=s&se=1").await.unwrap();

        assert!(logout(&store).await.unwrap());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_logout_without_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("config"));

        assert!(!logout(&store).await.unwrap());
        // Second call is still fine
        assert!(!logout(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where the session file should be cannot be removed as a file
        let path = tmp.path().join("config");
        std::fs::create_dir(&path).unwrap();
        let store = SessionStore::new(path);

        let err = logout(&store).await.unwrap_err();
        assert!(!err.is_input_error());
    }
}
