//! Mode resolution.
//!
//! The operating mode is never set directly.  It is recomputed from
//! the state of the key session and the class of the message every
//! time either of them changes.

use std::fmt;

use crate::armor::ArmorClass;

/// What the workflow does with the message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// There is no usable key.
    Idle,
    /// Encrypt the message for the key.
    Encrypt,
    /// Decrypt the message using the key.
    Decrypt,
    /// Sign the message using the key.
    Sign,
    /// Verify the signed message using the key.
    Verify,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Mode::Idle => "idle",
            Mode::Encrypt => "encrypt",
            Mode::Decrypt => "decrypt",
            Mode::Sign => "sign",
            Mode::Verify => "verify",
        })
    }
}

impl Mode {
    /// Returns whether this mode needs unlocked secret key material.
    pub fn needs_secret(&self) -> bool {
        matches!(self, Mode::Decrypt | Mode::Sign)
    }
}

/// The state of the key session, as far as mode resolution cares.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyState {
    /// No key has been loaded, or a load is in flight.
    Unset,
    /// A certificate without secret key material.
    Public,
    /// A key whose secret material is protected by a passphrase.
    PrivateLocked,
    /// A key whose secret material is ready for use.
    PrivateUnlocked,
    /// The key text could not be parsed.
    Invalid,
}

impl KeyState {
    /// All states, in no particular order.
    pub const ALL: [KeyState; 5] = [
        KeyState::Unset,
        KeyState::Public,
        KeyState::PrivateLocked,
        KeyState::PrivateUnlocked,
        KeyState::Invalid,
    ];

    /// Returns whether the key carries secret key material.
    pub fn is_private(&self) -> bool {
        matches!(self, KeyState::PrivateLocked | KeyState::PrivateUnlocked)
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            KeyState::Unset => "no key",
            KeyState::Public => "public key",
            KeyState::PrivateLocked => "locked private key",
            KeyState::PrivateUnlocked => "unlocked private key",
            KeyState::Invalid => "invalid key",
        })
    }
}

/// How the user wants a private key to be used.
///
/// This is the manual override offered next to the resolved mode
/// ("Switch to Public Key").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyPreference {
    /// Use the key for what it is.
    Natural,
    /// Use a private key as if only its certificate had been given.
    Public,
}

impl Default for KeyPreference {
    fn default() -> Self {
        KeyPreference::Natural
    }
}

impl KeyPreference {
    /// Returns the key state the resolver should see.
    pub fn apply(&self, state: KeyState) -> KeyState {
        match (self, state) {
            (KeyPreference::Public, s) if s.is_private() => KeyState::Public,
            (_, s) => s,
        }
    }

    /// Returns whether pasting a message of the given class cancels
    /// this preference.
    ///
    /// A ciphertext can only be decrypted using the private key, so
    /// pasting one switches back to it.
    pub fn yields_to(&self, state: KeyState, message: ArmorClass) -> bool {
        *self == KeyPreference::Public
            && state.is_private()
            && message == ArmorClass::EncryptedMessage
    }
}

/// Maps the key state and the message class to a mode.
///
/// With only a certificate, a pasted ciphertext cannot be decrypted.
/// It is encrypted again, i.e. treated like any other text.
pub fn resolve(key: KeyState, message: ArmorClass) -> Mode {
    use ArmorClass as A;
    use KeyState as K;

    match (key, message) {
        (K::Unset, _) | (K::Invalid, _) => Mode::Idle,

        (K::Public, A::SignedMessage) => Mode::Verify,
        (K::Public, A::None)
            | (K::Public, A::EncryptedMessage)
            | (K::Public, A::PublicKey)
            | (K::Public, A::PrivateKey) => Mode::Encrypt,

        (K::PrivateLocked, A::EncryptedMessage)
            | (K::PrivateUnlocked, A::EncryptedMessage) => Mode::Decrypt,
        (K::PrivateLocked, A::SignedMessage)
            | (K::PrivateUnlocked, A::SignedMessage) => Mode::Verify,
        (K::PrivateLocked, _) | (K::PrivateUnlocked, _) => Mode::Sign,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The resolution table, spelled out.
    fn expected(key: KeyState, message: ArmorClass) -> Mode {
        use ArmorClass as A;
        match key {
            KeyState::Unset | KeyState::Invalid => Mode::Idle,
            KeyState::Public => match message {
                A::SignedMessage => Mode::Verify,
                A::None | A::EncryptedMessage | A::PublicKey
                    | A::PrivateKey => Mode::Encrypt,
            },
            KeyState::PrivateLocked | KeyState::PrivateUnlocked =>
                match message {
                    A::EncryptedMessage => Mode::Decrypt,
                    A::SignedMessage => Mode::Verify,
                    A::None | A::PublicKey | A::PrivateKey => Mode::Sign,
                },
        }
    }

    #[test]
    fn table() {
        let mut n = 0;
        for key in KeyState::ALL.iter() {
            for message in ArmorClass::ALL.iter() {
                assert_eq!(resolve(*key, *message), expected(*key, *message),
                           "{:?} x {:?}", key, message);
                n += 1;
            }
        }
        assert_eq!(n, 25);
    }

    #[test]
    fn spot_checks() {
        assert_eq!(resolve(KeyState::Public, ArmorClass::None), Mode::Encrypt);
        assert_eq!(resolve(KeyState::Public, ArmorClass::EncryptedMessage),
                   Mode::Encrypt);
        assert_eq!(resolve(KeyState::PrivateLocked, ArmorClass::None),
                   Mode::Sign);
        assert_eq!(resolve(KeyState::PrivateUnlocked,
                           ArmorClass::EncryptedMessage),
                   Mode::Decrypt);
        assert_eq!(resolve(KeyState::Invalid, ArmorClass::SignedMessage),
                   Mode::Idle);
    }

    #[test]
    fn preference() {
        let p = KeyPreference::Public;
        assert_eq!(p.apply(KeyState::PrivateUnlocked), KeyState::Public);
        assert_eq!(p.apply(KeyState::PrivateLocked), KeyState::Public);
        assert_eq!(p.apply(KeyState::Invalid), KeyState::Invalid);
        assert_eq!(KeyPreference::Natural.apply(KeyState::PrivateLocked),
                   KeyState::PrivateLocked);

        assert_eq!(resolve(p.apply(KeyState::PrivateUnlocked),
                           ArmorClass::None),
                   Mode::Encrypt);

        assert!(p.yields_to(KeyState::PrivateUnlocked,
                            ArmorClass::EncryptedMessage));
        assert!(! p.yields_to(KeyState::Public, ArmorClass::EncryptedMessage));
        assert!(! p.yields_to(KeyState::PrivateUnlocked,
                              ArmorClass::SignedMessage));
        assert!(! KeyPreference::Natural.yields_to(
            KeyState::PrivateUnlocked, ArmorClass::EncryptedMessage));
    }
}
