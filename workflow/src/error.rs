//! Errors surfaced by the workflow.
//!
//! Every error that crosses the crypto provider boundary ends up in
//! one of these variants.  They are `Clone` so that a failed
//! operation can be published by value in a [`Snapshot`].
//!
//! [`Snapshot`]: crate::Snapshot

/// Results for sequoia-workflow.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Why a decryption failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecryptFailure {
    /// The ciphertext was modified; the integrity protection failed.
    Integrity,
    /// The input is not a well-formed OpenPGP message.
    Malformed,
    /// None of the loaded secret keys is a recipient of the message.
    NoMatchingKey,
}

/// The kind of an error, as carried by a failed operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported key material.
    KeyParse,
    /// Wrong passphrase or corrupt locked key.
    Unlock,
    /// Encryption failed.
    Encrypt,
    /// Decryption failed.
    Decrypt(DecryptFailure),
    /// Signing failed.
    Sign,
    /// Verification could not be carried out.
    Verify,
    /// A command was issued in a state that does not allow it.
    State,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors returned from the workflow and its crypto provider.
pub enum Error {
    /// The key text could not be parsed.
    #[error("Malformed key: {0}")]
    KeyParse(String),
    /// The secret key material could not be unlocked.
    #[error("Unable to unlock key: {0}")]
    Unlock(String),
    /// The message could not be encrypted.
    #[error("Failed to encrypt: {0}")]
    Encrypt(String),
    /// The message could not be decrypted.
    #[error("{}: {message}", describe(.failure))]
    Decrypt {
        /// What went wrong.
        failure: DecryptFailure,
        /// Details from the provider.
        message: String,
    },
    /// The message could not be signed.
    #[error("Failed to sign: {0}")]
    Sign(String),
    /// The signed message could not be processed.
    #[error("Failed to verify: {0}")]
    Verify(String),
    /// An unlock was requested, but the key is not a locked private key.
    #[error("Key is not locked")]
    NotLocked,
    /// The workflow's driver is gone.
    #[error("Workflow has stopped")]
    Stopped,
}

fn describe(failure: &DecryptFailure) -> &'static str {
    match failure {
        DecryptFailure::Integrity =>
            "Message has been manipulated",
        DecryptFailure::Malformed =>
            "Malformed message",
        DecryptFailure::NoMatchingKey =>
            "No key to decrypt message",
    }
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyParse(_) => ErrorKind::KeyParse,
            Error::Unlock(_) => ErrorKind::Unlock,
            Error::Encrypt(_) => ErrorKind::Encrypt,
            Error::Decrypt { failure, .. } => ErrorKind::Decrypt(*failure),
            Error::Sign(_) => ErrorKind::Sign,
            Error::Verify(_) => ErrorKind::Verify,
            Error::NotLocked | Error::Stopped => ErrorKind::State,
        }
    }
}
