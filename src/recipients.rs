use std::{collections::BTreeMap, path::{Path, PathBuf}};
use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub type UserId = String;
pub type Token = String;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub user_id: UserId,
    pub token: Token,
}

impl Recipient {
    pub fn new<U: Into<UserId>, T: Into<Token>>(user_id: U, token: T) -> Self {
        Self { user_id: user_id.into(), token: token.into() }
    }
}

/// Push tokens are opaque but never empty and never contain whitespace.
pub fn is_valid_address(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(char::is_whitespace)
}

#[derive(Debug, Error)]
pub enum DataFileLoadError {
    #[error("IO error: {0}")]
    IOError(std::io::Error),
    #[error("deserialization error: {0}")]
    DeserializationError(serde_json::Error)
}

#[derive(Debug, Error)]
pub enum DataFileSaveError {
    #[error("IO error: {0}")]
    IOError(std::io::Error),
    #[error("serialization error: {0}")]
    SerializationError(serde_json::Error)
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to load recipient tokens: {0}")]
    Load(#[from] DataFileLoadError),
    #[error("failed to save recipient tokens: {0}")]
    Save(#[from] DataFileSaveError),
    #[error("recipient directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Stores `recipient`, replacing any token previously registered for the same user.
    async fn register(&self, recipient: Recipient) -> Result<(), DirectoryError>;

    async fn recipients(&self) -> Result<Vec<Recipient>, DirectoryError>;
}

type TokensInner = BTreeMap<UserId, Token>;

#[derive(Serialize, Deserialize, Clone, Default, Deref, DerefMut)]
pub struct Tokens(TokensInner);

impl Tokens {

    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub async fn save_to_file<S: AsRef<Path>>(&self, file_path: S) -> Result<(), DataFileSaveError> {
        let tokens_json = serde_json::to_string_pretty(self).map_err(DataFileSaveError::SerializationError)?;
        tokio::fs::write(file_path, tokens_json).await.map_err(DataFileSaveError::IOError)
    }

    pub fn load_from_file<S: AsRef<Path>>(file_path: S) -> Result<Self, DataFileLoadError> {
        let file = std::fs::File::open(file_path).map_err(DataFileLoadError::IOError)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(DataFileLoadError::DeserializationError)
    }

}

/// In-memory directory, optionally mirrored to a JSON file after every registration.
#[derive(Default)]
pub struct MemoryDirectory {
    tokens: RwLock<Tokens>,
    file_path: Option<PathBuf>,
}

impl MemoryDirectory {

    pub fn new() -> Self {
        Self::default()
    }

    /// Loads previously registered tokens from `file_path`, a missing file is an empty directory.
    pub fn with_file<P: Into<PathBuf>>(file_path: P) -> Result<Self, DataFileLoadError> {
        let file_path = file_path.into();
        let tokens = if file_path.exists() {
            Tokens::load_from_file(&file_path)?
        } else {
            Tokens::new()
        };
        log::info!("Loaded {} recipient token(s) from {}", tokens.len(), file_path.display());
        Ok(Self { tokens: RwLock::new(tokens), file_path: Some(file_path) })
    }

}

#[async_trait]
impl RecipientDirectory for MemoryDirectory {

    async fn register(&self, recipient: Recipient) -> Result<(), DirectoryError> {
        let mut tokens = self.tokens.write().await;

        let mut updated = tokens.clone();
        updated.insert(recipient.user_id.clone(), recipient.token);

        if let Some(file_path) = &self.file_path {
            updated.save_to_file(file_path).await?;
        }

        *tokens = updated;
        log::info!("Registered push token for user {}", recipient.user_id);
        Ok(())
    }

    async fn recipients(&self) -> Result<Vec<Recipient>, DirectoryError> {
        let tokens = self.tokens.read().await;
        Ok(tokens.iter().map(|(user_id, token)| Recipient::new(user_id.as_str(), token.as_str())).collect())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_validation() {
        assert!(is_valid_address("ExponentPushToken[abc]"));
        assert!(is_valid_address("fcm:token-123"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("two words"));
        assert!(!is_valid_address(" "));
    }

    #[tokio::test]
    async fn registering_again_replaces_the_token() {
        let directory = MemoryDirectory::new();
        directory.register(Recipient::new("alice", "token-1")).await.unwrap();
        directory.register(Recipient::new("bob", "token-2")).await.unwrap();
        directory.register(Recipient::new("alice", "token-3")).await.unwrap();

        assert_eq!(directory.recipients().await.unwrap(), vec![
            Recipient::new("alice", "token-3"),
            Recipient::new("bob", "token-2"),
        ]);
    }

    #[tokio::test]
    async fn tokens_survive_a_restart_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("tokens.json");

        let directory = MemoryDirectory::with_file(&file_path).unwrap();
        assert!(directory.recipients().await.unwrap().is_empty());
        directory.register(Recipient::new("alice", "token-1")).await.unwrap();

        let reloaded = MemoryDirectory::with_file(&file_path).unwrap();
        assert_eq!(reloaded.recipients().await.unwrap(), vec![Recipient::new("alice", "token-1")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_registrations_all_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("tokens.json");
        let directory = std::sync::Arc::new(MemoryDirectory::with_file(&file_path).unwrap());

        let registrations = (0..8).map(|index| {
            let directory = directory.clone();
            tokio::spawn(async move {
                directory.register(Recipient::new(format!("user-{}", index), format!("token-{}", index))).await
            })
        });
        for registration in futures::future::join_all(registrations).await {
            registration.unwrap().unwrap();
        }

        let reloaded = MemoryDirectory::with_file(&file_path).unwrap();
        assert_eq!(reloaded.recipients().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn failed_save_leaves_directory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("missing").join("tokens.json");

        let directory = MemoryDirectory::with_file(&file_path).unwrap();
        let result = directory.register(Recipient::new("alice", "token-1")).await;

        assert!(matches!(result, Err(DirectoryError::Save(DataFileSaveError::IOError(_)))));
        assert!(directory.recipients().await.unwrap().is_empty());
    }

    #[test]
    fn corrupted_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("tokens.json");
        std::fs::write(&file_path, "{ not json").unwrap();

        assert!(matches!(MemoryDirectory::with_file(&file_path), Err(DataFileLoadError::DeserializationError(_))));
    }
}
