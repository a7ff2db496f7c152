//! A crypto provider using `sequoia-openpgp`.
//!
//! All OpenPGP work is CPU bound, so every call is carried out on
//! tokio's blocking thread pool.

use std::io::{self, Write};

use anyhow::Context as _;
use futures::future::{BoxFuture, FutureExt};

use sequoia_openpgp as openpgp;
use openpgp::{Cert, Fingerprint, KeyHandle};
use openpgp::crypto::{self, Password, SessionKey};
use openpgp::packet::{key, Key, PKESK, SKESK};
use openpgp::parse::Parse;
use openpgp::parse::stream::{
    DecryptionHelper,
    DecryptorBuilder,
    MessageLayer,
    MessageStructure,
    VerificationHelper,
    VerifierBuilder,
};
use openpgp::policy::{Policy, StandardPolicy};
use openpgp::serialize::SerializeInto;
use openpgp::serialize::stream::{
    Armorer,
    Encryptor,
    LiteralWriter,
    Message,
    Recipient,
    Signer,
};
use openpgp::types::{SignatureType, SymmetricAlgorithm};
use openpgp::packet::signature::SignatureBuilder;

use crate::{DecryptFailure, Error, Result};
use crate::provider::{CryptoProvider, ParsedKey, Verification};

type SecretKey = Key<key::SecretParts, key::UnspecifiedRole>;

/// A key with its decrypted secret key material.
#[derive(Clone, Debug)]
pub struct UnlockedCert {
    cert: Cert,
    secrets: Vec<SecretKey>,
}

impl UnlockedCert {
    /// Returns the certificate.
    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    /// Returns the key with the given fingerprint, if its secret is
    /// available.
    fn secret(&self, fp: &Fingerprint) -> Option<&SecretKey> {
        self.secrets.iter().find(|k| &k.fingerprint() == fp)
    }
}

/// Implements [`CryptoProvider`] using `sequoia-openpgp`.
#[derive(Clone, Debug, Default)]
pub struct SequoiaProvider {
    policy: StandardPolicy<'static>,
}

impl SequoiaProvider {
    /// Returns a provider using the standard policy.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Runs `f` on the blocking thread pool.
///
/// Errors, including a panic in `f`, are turned into an [`Error`]
/// using `wrap`.
fn blocking<T, F>(wrap: fn(anyhow::Error) -> Error, f: F)
                  -> BoxFuture<'static, Result<T>>
    where T: Send + 'static,
          F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .map(move |r| match r {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(wrap(e)),
            Err(e) => Err(wrap(anyhow::Error::from(e))),
        })
        .boxed()
}

impl CryptoProvider for SequoiaProvider {
    type Key = Cert;
    type UnlockedKey = UnlockedCert;

    fn parse_key(&self, armored: String)
        -> BoxFuture<'static, Result<ParsedKey<Cert, UnlockedCert>>>
    {
        blocking(|e| Error::KeyParse(e.to_string()),
                 move || parse_key(&armored))
    }

    fn unlock_key(&self, key: Cert, passphrase: String)
        -> BoxFuture<'static, Result<UnlockedCert>>
    {
        blocking(|e| Error::Unlock(e.to_string()),
                 move || unlock_key(key, &Password::from(passphrase.as_str())))
    }

    fn encrypt(&self, plaintext: String, key: Cert)
        -> BoxFuture<'static, Result<String>>
    {
        let policy = self.policy.clone();
        blocking(|e| Error::Encrypt(e.to_string()),
                 move || encrypt(&policy, &key, &plaintext))
    }

    fn decrypt(&self, ciphertext: String, key: UnlockedCert)
        -> BoxFuture<'static, Result<String>>
    {
        let policy = self.policy.clone();
        blocking(decrypt_error, move || decrypt(&policy, key, &ciphertext))
    }

    fn sign(&self, plaintext: String, key: UnlockedCert)
        -> BoxFuture<'static, Result<String>>
    {
        let policy = self.policy.clone();
        blocking(|e| Error::Sign(e.to_string()),
                 move || sign(&policy, &key, &plaintext))
    }

    fn verify(&self, signed: String, key: Cert)
        -> BoxFuture<'static, Result<Verification>>
    {
        let policy = self.policy.clone();
        blocking(|e| Error::Verify(e.to_string()),
                 move || verify(&policy, key, &signed))
    }
}

fn parse_key(armored: &str) -> anyhow::Result<ParsedKey<Cert, UnlockedCert>> {
    let cert = Cert::from_bytes(armored.as_bytes())?;
    let user_ids = cert.userids()
        .map(|ua| String::from_utf8_lossy(ua.userid().value()).into_owned())
        .collect();

    let secret = cert.is_tsk();
    let (encrypted, secrets): (Vec<SecretKey>, Vec<SecretKey>) =
        cert.keys().secret()
        .map(|ka| ka.key().clone())
        .partition(|k| k.secret().is_encrypted());

    let unlocked = if secret && encrypted.is_empty() {
        Some(UnlockedCert { cert: cert.clone(), secrets })
    } else {
        None
    };

    Ok(ParsedKey { key: cert, unlocked, secret, user_ids })
}

fn unlock_key(cert: Cert, password: &Password) -> anyhow::Result<UnlockedCert> {
    let mut secrets = Vec::new();
    let mut encrypted = 0;
    let mut decrypted = 0;
    for ka in cert.keys().secret() {
        let key = ka.key().clone();
        if ! key.secret().is_encrypted() {
            secrets.push(key);
            continue;
        }

        encrypted += 1;
        if let Ok(key) = key.decrypt_secret(password) {
            decrypted += 1;
            secrets.push(key);
        }
    }

    if encrypted > 0 && decrypted == 0 {
        return Err(anyhow::anyhow!("Invalid password"));
    }

    log::debug!("Decrypted {} of {} secret keys of {}",
                decrypted, encrypted, cert.fingerprint());
    Ok(UnlockedCert { cert, secrets })
}

fn encrypt(policy: &dyn Policy, cert: &Cert, plaintext: &str)
           -> anyhow::Result<String>
{
    let mut recipients: Vec<Recipient> = Vec::new();
    for key in cert.keys().with_policy(policy, None).supported().alive()
        .revoked(false).for_transport_encryption().for_storage_encryption()
        .map(|ka| ka.key())
    {
        recipients.push(key.into());
    }
    if recipients.is_empty() {
        return Err(anyhow::anyhow!(
            "Cert {} has no suitable encryption key", cert.fingerprint()));
    }

    let mut sink = Vec::new();
    let message = Message::new(&mut sink);
    let message = Armorer::new(message).build()?;
    let message = Encryptor::for_recipients(message, recipients).build()
        .context("Failed to create encryptor")?;
    let mut message = LiteralWriter::new(message).build()
        .context("Failed to create literal writer")?;
    message.write_all(plaintext.as_bytes())?;
    message.finalize()?;

    Ok(String::from_utf8(sink)?)
}

fn sign(policy: &dyn Policy, key: &UnlockedCert, plaintext: &str)
        -> anyhow::Result<String>
{
    let keypair = key.cert.keys().with_policy(policy, None).supported()
        .alive().revoked(false).for_signing()
        .filter_map(|ka| key.secret(&ka.key().fingerprint()))
        .find_map(|k| k.clone().into_keypair().ok())
        .ok_or_else(|| anyhow::anyhow!(
            "Found no suitable signing key on {}", key.cert.fingerprint()))?;

    let mut sink = Vec::new();
    let message = Message::new(&mut sink);
    let mut message = Signer::with_template(
        message, keypair, SignatureBuilder::new(SignatureType::Text))
        .cleartext()
        .build()
        .context("Failed to create signer")?;
    message.write_all(plaintext.as_bytes())?;
    message.finalize()?;

    Ok(String::from_utf8(sink)?)
}

/// Classifies a decryption error.
fn decrypt_error(err: anyhow::Error) -> Error {
    if let Some(e) = err.downcast_ref::<Error>() {
        return e.clone();
    }

    // The streaming decryptor reports a bad MDC through an io::Error.
    let manipulated = err.chain().any(|cause| {
        let cause = cause.downcast_ref::<io::Error>()
            .and_then(|e| e.get_ref())
            .map(|inner| inner as &(dyn std::error::Error + 'static))
            .unwrap_or(cause);
        std::iter::successors(Some(cause), |e| e.source()).any(|e| {
            matches!(e.downcast_ref::<openpgp::Error>(),
                     Some(openpgp::Error::ManipulatedMessage))
        })
    });
    let missing_key = err.chain().any(|cause| {
        matches!(cause.downcast_ref::<openpgp::Error>(),
                 Some(openpgp::Error::MissingSessionKey(_)))
    });

    let failure = if manipulated {
        DecryptFailure::Integrity
    } else if missing_key {
        DecryptFailure::NoMatchingKey
    } else {
        DecryptFailure::Malformed
    };
    Error::Decrypt { failure, message: format!("{}", err) }
}

struct Helper<'a> {
    policy: &'a dyn Policy,
    key: UnlockedCert,
}

impl<'a> VerificationHelper for Helper<'a> {
    fn get_certs(&mut self, _: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(vec![self.key.cert.clone()])
    }

    fn check(&mut self, _: MessageStructure) -> openpgp::Result<()> {
        // Signatures inside the ciphertext are not reported.
        Ok(())
    }
}

impl<'a> DecryptionHelper for Helper<'a> {
    fn decrypt<D>(&mut self, pkesks: &[PKESK], _: &[SKESK],
                  sym_algo: Option<SymmetricAlgorithm>,
                  mut decrypt: D) -> openpgp::Result<Option<Fingerprint>>
        where D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool
    {
        let keys: Vec<&SecretKey> = self.key.cert
            .keys().with_policy(self.policy, None)
            .for_transport_encryption().for_storage_encryption()
            .filter_map(|ka| self.key.secret(&ka.key().fingerprint()))
            .collect();

        for pkesk in pkesks {
            let recipient = pkesk.recipient();
            for key in keys.iter()
                .filter(|k| recipient.is_wildcard() || &k.keyid() == recipient)
            {
                let mut keypair = match (*key).clone().into_keypair() {
                    Ok(k) => k,
                    Err(_) => continue,
                };
                if try_decrypt(pkesk, sym_algo, &mut keypair, &mut decrypt) {
                    return Ok(Some(self.key.cert.fingerprint()));
                }
            }
        }

        Err(Error::Decrypt {
            failure: DecryptFailure::NoMatchingKey,
            message: format!("None of the recipients is a key of {}",
                             self.key.cert.fingerprint()),
        }.into())
    }
}

fn try_decrypt<D>(pkesk: &PKESK, sym_algo: Option<SymmetricAlgorithm>,
                  keypair: &mut dyn crypto::Decryptor, decrypt: &mut D)
                  -> bool
    where D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool
{
    pkesk.decrypt(keypair, sym_algo)
        .map(|(algo, sk)| decrypt(algo, &sk))
        .unwrap_or(false)
}

fn decrypt(policy: &dyn Policy, key: UnlockedCert, ciphertext: &str)
           -> anyhow::Result<String>
{
    let helper = Helper { policy, key };
    let mut decryptor = DecryptorBuilder::from_bytes(ciphertext.as_bytes())?
        .with_policy(policy, None, helper)?;

    let mut plaintext = Vec::new();
    io::copy(&mut decryptor, &mut plaintext)?;
    Ok(String::from_utf8(plaintext)
       .context("Decrypted message is not UTF-8")?)
}

struct VHelper {
    cert: Cert,
    good: Vec<Fingerprint>,
    bad: usize,
}

impl VerificationHelper for VHelper {
    fn get_certs(&mut self, _: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(vec![self.cert.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    match result {
                        Ok(good) => self.good.push(good.ka.key().fingerprint()),
                        Err(e) => {
                            log::debug!("Bad signature: {}", e);
                            self.bad += 1;
                        },
                    }
                }
            }
        }

        // A bad signature is a result, not an error.
        Ok(())
    }
}

fn verify(policy: &dyn Policy, cert: Cert, signed: &str)
          -> anyhow::Result<Verification>
{
    let helper = VHelper { cert, good: Vec::new(), bad: 0 };
    let mut verifier = VerifierBuilder::from_bytes(signed.as_bytes())?
        .with_policy(policy, None, helper)?;

    let mut content = Vec::new();
    io::copy(&mut verifier, &mut content)?;
    let content = String::from_utf8(content)
        .context("Signed message is not UTF-8")?;

    let helper = verifier.into_helper();
    let verified = ! helper.good.is_empty() && helper.bad == 0;
    let signer_identity = if verified {
        Some(identity(policy, &helper.cert))
    } else {
        None
    };

    Ok(Verification { verified, signer_identity, content })
}

/// Returns the primary user ID, or the fingerprint if there is none.
fn identity(policy: &dyn Policy, cert: &Cert) -> String {
    cert.with_policy(policy, None)
        .and_then(|vc| vc.primary_userid()
                  .map(|u| String::from_utf8_lossy(u.userid().value())
                       .into_owned()))
        .unwrap_or_else(|_| cert.fingerprint().to_hex())
}

/// Returns `cert`'s certificate, armored.
///
/// This strips any secret key material.
pub fn armored_cert(cert: &Cert) -> Result<String> {
    cert.armored().to_vec()
        .map_err(|e| Error::KeyParse(e.to_string()))
        .and_then(|v| String::from_utf8(v)
                  .map_err(|e| Error::KeyParse(e.to_string())))
}
