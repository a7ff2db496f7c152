//! End-to-end scenarios using sequoia-openpgp.

use std::time::Duration;

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::cert::CertBuilder;
use openpgp::serialize::SerializeInto;

use sequoia_workflow::{
    ArmorClass,
    Config,
    CryptoProvider,
    ErrorKind,
    KeyState,
    Mode,
    Output,
    Snapshot,
    Status,
    UnlockState,
    Workflow,
};
use sequoia_workflow::sequoia::SequoiaProvider;

const USER_ID: &str = "Test User <test@example.com>";
const PASSWORD: &str = "password123";

fn generate(password: Option<&str>) -> Cert {
    let (cert, _) = CertBuilder::general_purpose(None, Some(USER_ID))
        .set_password(password.map(Into::into))
        .generate()
        .unwrap();
    cert
}

fn public(cert: &Cert) -> String {
    String::from_utf8(cert.armored().to_vec().unwrap()).unwrap()
}

fn private(cert: &Cert) -> String {
    String::from_utf8(cert.as_tsk().armored().to_vec().unwrap()).unwrap()
}

fn spawn() -> Workflow {
    Workflow::spawn(SequoiaProvider::new(), Config {
        debounce: Duration::from_millis(10),
    })
}

fn status(s: &Snapshot) -> Option<&Status> {
    s.operation.as_ref().map(|o| &o.status)
}

fn output(s: &Snapshot) -> Option<&Output> {
    s.operation.as_ref().and_then(|o| o.output())
}

#[tokio::test]
async fn public_key_without_message() {
    let w = spawn();
    w.set_key_text(public(&generate(None)));
    let s = w.settled().await.unwrap();
    assert_eq!(s.key.state, KeyState::Public);
    assert_eq!(s.key.display_identity, vec![USER_ID]);
    assert_eq!(s.mode, Mode::Encrypt);
    assert!(s.operation.is_none());
}

#[tokio::test]
async fn encrypt_for_public_key() {
    let w = spawn();
    w.set_key_text(public(&generate(None)));
    w.set_message_text("Hello World".into());
    let s = w.settled().await.unwrap();
    match output(&s) {
        Some(Output::Encrypted(ciphertext)) => {
            assert!(ciphertext.starts_with("-----BEGIN PGP MESSAGE-----"));
            assert!(ciphertext.trim_end()
                    .ends_with("-----END PGP MESSAGE-----"));
        },
        other => panic!("unexpected output: {:?}", other),
    }
}

#[tokio::test]
async fn unlock_then_decrypt() {
    let cert = generate(Some(PASSWORD));
    let ciphertext = SequoiaProvider::new()
        .encrypt("Hello World".into(), cert.clone()).await.unwrap();

    let w = spawn();
    w.set_key_text(private(&cert));
    let s = w.settled().await.unwrap();
    assert_eq!(s.key.state, KeyState::PrivateLocked);
    assert_eq!(s.mode, Mode::Sign);
    assert!(s.is_locked());

    w.submit_passphrase(PASSWORD.into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.key.state, KeyState::PrivateUnlocked);

    w.set_message_text(ciphertext);
    let s = w.settled().await.unwrap();
    assert_eq!(s.message_class, ArmorClass::EncryptedMessage);
    assert_eq!(s.mode, Mode::Decrypt);
    assert_eq!(output(&s), Some(&Output::Decrypted("Hello World".into())));
}

#[tokio::test]
async fn decrypt_resumes_after_unlock() {
    let cert = generate(Some(PASSWORD));
    let ciphertext = SequoiaProvider::new()
        .encrypt("Hello World".into(), cert.clone()).await.unwrap();

    let w = spawn();
    w.set_key_text(private(&cert));
    w.set_message_text(ciphertext);
    let s = w.settled().await.unwrap();
    assert_eq!(s.mode, Mode::Decrypt);
    assert_eq!(status(&s), Some(&Status::AwaitingUnlock));
    assert!(s.needs_passphrase());

    w.submit_passphrase(PASSWORD.into());
    let s = w.settled().await.unwrap();
    assert_eq!(output(&s), Some(&Output::Decrypted("Hello World".into())));
}

#[tokio::test]
async fn wrong_passphrase() {
    let w = spawn();
    w.set_key_text(private(&generate(Some(PASSWORD))));
    w.settled().await.unwrap();

    w.submit_passphrase("not the password".into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.key.state, KeyState::PrivateLocked);
    assert_eq!(s.key.unlock,
               UnlockState::Failed("Unable to unlock key: Invalid password"
                                   .into()));

    // Still usable.
    w.submit_passphrase(PASSWORD.into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.key.state, KeyState::PrivateUnlocked);
}

#[tokio::test]
async fn corrupt_messages() {
    let cert = generate(None);
    let w = spawn();
    w.set_key_text(private(&cert));

    // Missing footer.
    w.set_message_text("-----BEGIN PGP MESSAGE-----\n\nhF4DAAAAAAAAAAAS".into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.message_class, ArmorClass::None);
    assert_eq!(s.mode, Mode::Sign);

    w.set_message_text("-----BEGIN PGP MESSAGE-----\n\nhF4DAAAAAAAAAAAS\n\
                        -----END PGP MESSAGE-----\n".into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.message_class, ArmorClass::EncryptedMessage);
    assert_eq!(s.mode, Mode::Decrypt);
    assert!(matches!(status(&s),
                     Some(Status::Failed { kind: ErrorKind::Decrypt(_), .. })));

    // With the certificate only, a broken signed message does not
    // verify.
    w.set_key_text(public(&cert));
    w.set_message_text("-----BEGIN PGP SIGNED MESSAGE-----\n\
                        Hash: SHA256\n\n\
                        Hello\n\
                        -----BEGIN PGP SIGNATURE-----\n\n\
                        AAAA\n\
                        -----END PGP SIGNATURE-----\n".into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.mode, Mode::Verify);
    match status(&s) {
        Some(Status::Failed { kind, .. }) => assert_eq!(*kind, ErrorKind::Verify),
        Some(Status::Succeeded(Output::Verified(v))) => assert!(! v.verified),
        other => panic!("unexpected status: {:?}", other),
    }
}

#[tokio::test]
async fn sign_and_verify() {
    let cert = generate(Some(PASSWORD));

    let w = spawn();
    w.set_key_text(private(&cert));
    w.settled().await.unwrap();
    w.submit_passphrase(PASSWORD.into());
    w.set_message_text("Hello World".into());
    let s = w.settled().await.unwrap();
    assert_eq!(s.mode, Mode::Sign);
    let signed = match output(&s) {
        Some(Output::Signed(signed)) => signed.clone(),
        other => panic!("unexpected output: {:?}", other),
    };
    assert!(signed.contains("-----BEGIN PGP SIGNED MESSAGE-----"));

    w.set_key_text(public(&cert));
    w.set_message_text(signed);
    let s = w.settled().await.unwrap();
    assert_eq!(s.message_class, ArmorClass::SignedMessage);
    assert_eq!(s.mode, Mode::Verify);
    match output(&s) {
        Some(Output::Verified(v)) => {
            assert!(v.verified);
            assert_eq!(v.signer_identity.as_deref(), Some(USER_ID));
            assert_eq!(v.content.trim_end(), "Hello World");
        },
        other => panic!("unexpected output: {:?}", other),
    }

    // Someone else's certificate.
    w.set_key_text(public(&generate(None)));
    let s = w.settled().await.unwrap();
    match output(&s) {
        Some(Output::Verified(v)) => assert!(! v.verified),
        other => panic!("unexpected output: {:?}", other),
    }
}

#[tokio::test]
async fn clear_forgets_unlocked_key() {
    let w = spawn();
    w.set_key_text(private(&generate(Some(PASSWORD))));
    w.settled().await.unwrap();
    w.submit_passphrase(PASSWORD.into());
    w.set_message_text("Hello World".into());
    w.clear();
    let s = w.settled().await.unwrap();
    assert_eq!(s.key.state, KeyState::Unset);
    assert_eq!(s.mode, Mode::Idle);
    assert!(s.operation.is_none());
}
