//! Paste-driven OpenPGP.
//!
//! The user pastes a key and a message.  From the kind of key (a
//! certificate, or a private key that may be locked) and the kind of
//! message (plain text, a ciphertext, or a cleartext signed message),
//! this crate works out whether to encrypt, decrypt, sign or verify,
//! and runs that operation.
//!
//! Both inputs can change at any time, also while an operation is in
//! flight.  Only the result belonging to the most recent inputs is
//! ever shown; results of superseded runs are dropped when they
//! arrive.
//!
//! The pieces, leaf first:
//!
//!   - [`armor`] classifies pasted text by its armor lines,
//!   - [`session`] tracks the pasted key through parsing and
//!     unlocking,
//!   - [`mode`] maps key state and message class to a [`Mode`],
//!   - [`orchestrator`] tags runs with generations and decides which
//!     result gets published,
//!   - [`workflow`] ties everything together in a task that can be
//!     driven through a [`Workflow`] handle.
//!
//! The cryptography is delegated to a [`CryptoProvider`].
//! [`SequoiaProvider`] implements it using `sequoia-openpgp`.
//!
//! [`SequoiaProvider`]: sequoia::SequoiaProvider
//!
//! # Example
//!
//! ```no_run
//! use sequoia_workflow::{Config, Mode, Workflow};
//! use sequoia_workflow::sequoia::SequoiaProvider;
//!
//! # async fn f(tsk: String, ciphertext: String)
//! #     -> sequoia_workflow::Result<()> {
//! let workflow = Workflow::spawn(SequoiaProvider::new(), Config::default());
//! workflow.set_key_text(tsk);
//! workflow.set_message_text(ciphertext);
//!
//! let snapshot = workflow.settled().await?;
//! assert_eq!(snapshot.mode, Mode::Decrypt);
//! if snapshot.needs_passphrase() {
//!     workflow.submit_passphrase("streng geheim".into());
//! }
//!
//! let snapshot = workflow.settled().await?;
//! if let Some(output) = snapshot.operation.as_ref().and_then(|o| o.output()) {
//!     println!("{}", output.text());
//! }
//! # Ok(()) }
//! ```

#![warn(missing_docs)]

pub mod armor;
mod error;
pub mod mode;
pub mod orchestrator;
pub mod provider;
pub mod sequoia;
pub mod session;
pub mod workflow;

pub use crate::armor::{classify, ArmorClass};
pub use crate::error::{DecryptFailure, Error, ErrorKind, Result};
pub use crate::mode::{resolve, KeyPreference, KeyState, Mode};
pub use crate::orchestrator::{Operation, Output, Status};
pub use crate::provider::{CryptoProvider, ParsedKey, Verification};
pub use crate::session::{KeySummary, UnlockState};
pub use crate::workflow::{Config, Snapshot, Workflow, DEFAULT_DEBOUNCE};
