//! The crypto capability provider.
//!
//! The workflow does not implement any OpenPGP itself.  It drives a
//! [`CryptoProvider`], which parses and unlocks keys and carries out
//! the four operations.  Every call returns a future that owns
//! everything it needs, so that the workflow can start it and return
//! to processing input right away.  There is no way to cancel a
//! call: if its result is no longer wanted, the workflow simply
//! ignores it.
//!
//! [`SequoiaProvider`](crate::sequoia::SequoiaProvider) is the
//! implementation using `sequoia-openpgp`.

use futures::future::BoxFuture;

use crate::Result;

/// A parsed key.
#[derive(Clone, Debug)]
pub struct ParsedKey<K, U> {
    /// The key as understood by the provider.
    pub key: K,
    /// Usable secret key material, if the key has secrets that are
    /// not protected by a passphrase.
    pub unlocked: Option<U>,
    /// Whether the key carries secret key material.
    pub secret: bool,
    /// The key's user IDs, in the order they appear.
    pub user_ids: Vec<String>,
}

/// The outcome of a signature verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    /// Whether the message carries a good signature by the key.
    pub verified: bool,
    /// Who made the good signature.
    pub signer_identity: Option<String>,
    /// The signed text.
    pub content: String,
}

/// Provides the cryptographic operations.
pub trait CryptoProvider: Send + Sync + 'static {
    /// A parsed key.
    type Key: Clone + Send + Sync + 'static;
    /// A key whose secret key material is ready for use.
    type UnlockedKey: Clone + Send + Sync + 'static;

    /// Parses armored key material.
    fn parse_key(&self, armored: String)
        -> BoxFuture<'static, Result<ParsedKey<Self::Key, Self::UnlockedKey>>>;

    /// Unlocks the secret key material using `passphrase`.
    fn unlock_key(&self, key: Self::Key, passphrase: String)
        -> BoxFuture<'static, Result<Self::UnlockedKey>>;

    /// Encrypts `plaintext` for `key`, returning an armored message.
    fn encrypt(&self, plaintext: String, key: Self::Key)
        -> BoxFuture<'static, Result<String>>;

    /// Decrypts the armored `ciphertext`.
    fn decrypt(&self, ciphertext: String, key: Self::UnlockedKey)
        -> BoxFuture<'static, Result<String>>;

    /// Creates a cleartext signed message.
    fn sign(&self, plaintext: String, key: Self::UnlockedKey)
        -> BoxFuture<'static, Result<String>>;

    /// Verifies a cleartext signed message.
    ///
    /// A signature that does not check out is reported as
    /// `Verification::verified == false`, not as an error.
    fn verify(&self, signed: String, key: Self::Key)
        -> BoxFuture<'static, Result<Verification>>;
}
