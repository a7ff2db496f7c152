//! The workflow driver.
//!
//! A [`Workflow`] is a handle to a task that owns the key session,
//! the message and the current operation.  Commands sent through the
//! handle are processed in order, together with the results of the
//! provider calls the task started.  After every command and every
//! result, the task publishes a [`Snapshot`].
//!
//! # Example
//!
//! ```no_run
//! use sequoia_workflow::{Config, Mode, Workflow, sequoia::SequoiaProvider};
//!
//! # async fn f(cert: String) -> sequoia_workflow::Result<()> {
//! let workflow = Workflow::spawn(SequoiaProvider::new(), Config::default());
//! workflow.set_key_text(cert);
//! workflow.set_message_text("Hello World".into());
//!
//! let snapshot = workflow.settled().await?;
//! assert_eq!(snapshot.mode, Mode::Encrypt);
//! # Ok(()) }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

use crate::{Error, Result};
use crate::armor::{self, ArmorClass};
use crate::mode::{self, KeyPreference, KeyState, Mode};
use crate::orchestrator::{Operation, Orchestrator, Output, Status};
use crate::provider::{CryptoProvider, ParsedKey};
use crate::session::{
    KeySession,
    KeySummary,
    LoadToken,
    UnlockOutcome,
    UnlockState,
    UnlockToken,
};

/// How long the message must be left alone before it is processed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Configures a [`Workflow`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// How long the message must be left alone before the operation
    /// is started.  Zero disables debouncing.
    pub debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// The observable state of a workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// The resolved mode.
    pub mode: Mode,
    /// The class of the message.
    pub message_class: ArmorClass,
    /// How a private key is used.
    pub preference: KeyPreference,
    /// The key session.
    pub key: KeySummary,
    /// The current operation, if any.
    pub operation: Option<Operation>,
    /// Number of commands the driver has processed.
    pub commands_applied: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            mode: Mode::Idle,
            message_class: ArmorClass::None,
            preference: KeyPreference::Natural,
            key: KeySummary::default(),
            operation: None,
            commands_applied: 0,
        }
    }
}

impl Snapshot {
    /// Returns whether a parse, an unlock or an operation is in
    /// flight.
    pub fn is_busy(&self) -> bool {
        self.key.loading
            || self.key.unlock == UnlockState::Pending
            || self.operation.as_ref().map(Operation::is_pending)
                .unwrap_or(false)
    }

    /// Returns whether the key is locked and no unlock is in flight.
    ///
    /// This holds as soon as a locked private key is loaded, whether
    /// or not there is a message.
    pub fn is_locked(&self) -> bool {
        self.key.state == KeyState::PrivateLocked
            && self.key.unlock != UnlockState::Pending
    }

    /// Returns whether the current operation waits for a passphrase.
    ///
    /// Unlike [`Snapshot::is_locked`], this is false if there is no
    /// message, or if the operation only needs the certificate.
    pub fn needs_passphrase(&self) -> bool {
        self.is_locked()
            && self.operation.as_ref()
                .map(|op| op.status == Status::AwaitingUnlock)
                .unwrap_or(false)
    }
}

enum Command {
    SetKeyText(String),
    SetMessageText(String),
    SubmitPassphrase(String),
    SwitchMode(KeyPreference),
    Clear,
}

enum Event<P: CryptoProvider> {
    Loaded(LoadToken, Result<ParsedKey<P::Key, P::UnlockedKey>>),
    Unlocked(UnlockToken, Result<P::UnlockedKey>),
    Completed(u64, Result<Output>),
}

/// A handle to a running workflow.
///
/// Dropping the handle stops the driver.  Results of provider calls
/// still in flight at that point are discarded.
pub struct Workflow {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    sent: AtomicU64,
}

impl Workflow {
    /// Starts a workflow using `provider`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn<P: CryptoProvider>(provider: P, config: Config) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, outcomes) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(Snapshot::default());

        let driver = Driver {
            provider,
            config,
            session: KeySession::new(),
            message: String::new(),
            message_class: ArmorClass::None,
            preference: KeyPreference::Natural,
            switch_back: false,
            mode: Mode::Idle,
            orchestrator: Orchestrator::new(),
            pending: None,
            events,
            publisher,
            applied: 0,
        };
        tokio::spawn(driver.run(inbox, outcomes));

        Workflow {
            commands,
            snapshots,
            sent: AtomicU64::new(0),
        }
    }

    fn send(&self, command: Command) {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(command).is_err() {
            warn!("Workflow has stopped, dropping command");
        }
    }

    /// Replaces the key text.
    pub fn set_key_text(&self, text: String) {
        self.send(Command::SetKeyText(text));
    }

    /// Replaces the message text.
    pub fn set_message_text(&self, text: String) {
        self.send(Command::SetMessageText(text));
    }

    /// Tries to unlock the key using `passphrase`.
    ///
    /// Ignored unless the key is a locked private key.
    pub fn submit_passphrase(&self, passphrase: String) {
        self.send(Command::SubmitPassphrase(passphrase));
    }

    /// Selects how a private key is used.
    pub fn switch_mode_manually(&self, preference: KeyPreference) {
        self.send(Command::SwitchMode(preference));
    }

    /// Forgets the key, including any unlocked secrets.
    ///
    /// The message is kept.
    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    /// Returns the most recently published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Returns a receiver for the published states.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Waits until a published state satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<Snapshot>
        where F: FnMut(&Snapshot) -> bool
    {
        let mut snapshots = self.snapshots.clone();
        loop {
            {
                let snapshot = snapshots.borrow();
                if predicate(&snapshot) {
                    return Ok(snapshot.clone());
                }
            }
            snapshots.changed().await.map_err(|_| Error::Stopped)?;
        }
    }

    /// Waits until every command sent so far has been processed and
    /// nothing is in flight anymore.
    pub async fn settled(&self) -> Result<Snapshot> {
        let sent = self.sent.load(Ordering::SeqCst);
        self.wait_for(|s| s.commands_applied >= sent && ! s.is_busy()).await
    }
}

/// A launch waiting for the message to settle.
struct Launch {
    deadline: Instant,
    generation: u64,
    mode: Mode,
}

struct Driver<P: CryptoProvider> {
    provider: P,
    config: Config,
    session: KeySession<P::Key, P::UnlockedKey>,
    message: String,
    message_class: ArmorClass,
    preference: KeyPreference,
    /// A ciphertext was pasted while the key was used as a
    /// certificate.  Honored once the key turns out to be private.
    switch_back: bool,
    mode: Mode,
    orchestrator: Orchestrator,
    pending: Option<Launch>,
    events: mpsc::UnboundedSender<Event<P>>,
    publisher: watch::Sender<Snapshot>,
    applied: u64,
}

impl<P: CryptoProvider> Driver<P> {
    async fn run(mut self,
                 mut inbox: mpsc::UnboundedReceiver<Command>,
                 mut outcomes: mpsc::UnboundedReceiver<Event<P>>)
    {
        loop {
            let deadline = self.pending.as_ref().map(|l| l.deadline);
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => {
                        self.apply(command);
                        self.applied += 1;
                    },
                    None => break,
                },
                Some(event) = outcomes.recv() => self.handle(event),
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => self.launch_pending(),
            }
            self.publish();
        }
        debug!("Workflow driver stopped");
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            mode: self.mode,
            message_class: self.message_class,
            preference: self.preference,
            key: self.session.summary(),
            operation: self.orchestrator.current().cloned(),
            commands_applied: self.applied,
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot());
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetKeyText(text) => {
                self.preference = KeyPreference::Natural;
                self.switch_back = false;
                if let Some(token) = self.session.begin_load(text) {
                    let call = self.provider
                        .parse_key(self.session.raw_text().to_string());
                    self.forward(call, move |r| Event::Loaded(token, r));
                }
                self.reevaluate(false);
            },
            Command::SetMessageText(text) => {
                self.message_class = armor::classify(&text);
                self.message = text;
                self.switch_back = self.preference == KeyPreference::Public
                    && self.message_class == ArmorClass::EncryptedMessage;
                self.reevaluate(true);
            },
            Command::SubmitPassphrase(passphrase) => {
                match self.session.begin_unlock() {
                    Ok((token, key)) => {
                        let call = self.provider.unlock_key(key, passphrase);
                        self.forward(call, move |r| Event::Unlocked(token, r));
                    },
                    Err(err) => warn!("Ignoring passphrase: {}", err),
                }
            },
            Command::SwitchMode(preference) => {
                if preference != self.preference {
                    info!("Switching key preference to {:?}", preference);
                    self.preference = preference;
                    self.switch_back = false;
                    self.reevaluate(false);
                }
            },
            Command::Clear => {
                info!("Clearing key");
                self.session.clear();
                self.preference = KeyPreference::Natural;
                self.switch_back = false;
                self.reevaluate(false);
            },
        }
    }

    fn handle(&mut self, event: Event<P>) {
        match event {
            Event::Loaded(token, result) => {
                if self.session.finish_load(token, result) {
                    self.reevaluate(false);
                }
            },
            Event::Unlocked(token, result) => {
                match self.session.finish_unlock(token, result) {
                    UnlockOutcome::Unlocked => self.reevaluate(false),
                    UnlockOutcome::Failed | UnlockOutcome::Stale => (),
                }
            },
            Event::Completed(generation, result) => {
                self.orchestrator.complete(generation, result);
            },
        }
    }

    /// Recomputes the mode and restarts the operation.
    fn reevaluate(&mut self, debounced: bool) {
        let state = self.session.state();
        if self.switch_back
            && self.preference.yields_to(state, self.message_class)
        {
            info!("Got {}, using the private key again", self.message_class);
            self.preference = KeyPreference::Natural;
            self.switch_back = false;
        }
        let mode = mode::resolve(self.preference.apply(state),
                                 self.message_class);
        if mode != self.mode {
            info!("Mode {} -> {} ({}, {})",
                  self.mode, mode, state, self.message_class);
            self.mode = mode;
        }

        self.pending = None;
        if mode == Mode::Idle || self.message.trim().is_empty() {
            self.orchestrator.reset();
            return;
        }

        if mode.needs_secret() && state == KeyState::PrivateLocked {
            let generation = self.orchestrator.await_unlock(mode);
            debug!("Generation {} waits for the passphrase", generation);
            return;
        }

        let generation = self.orchestrator.begin(mode);
        if debounced && self.config.debounce > Duration::from_secs(0) {
            self.pending = Some(Launch {
                deadline: Instant::now() + self.config.debounce,
                generation,
                mode,
            });
        } else {
            self.launch(generation, mode);
        }
    }

    fn launch_pending(&mut self) {
        if let Some(l) = self.pending.take() {
            self.launch(l.generation, l.mode);
        }
    }

    fn launch(&mut self, generation: u64, mode: Mode) {
        let message = self.message.clone();
        let kind = self.session.kind();
        let provider = &self.provider;

        let call: Option<BoxFuture<'static, Result<Output>>> = match mode {
            Mode::Encrypt => kind.key().cloned().map(|key| {
                provider.encrypt(message, key).map_ok(Output::Encrypted).boxed()
            }),
            Mode::Verify => kind.key().cloned().map(|key| {
                provider.verify(message, key).map_ok(Output::Verified).boxed()
            }),
            Mode::Decrypt => kind.unlocked().cloned().map(|key| {
                provider.decrypt(message, key).map_ok(Output::Decrypted).boxed()
            }),
            Mode::Sign => kind.unlocked().cloned().map(|key| {
                provider.sign(message, key).map_ok(Output::Signed).boxed()
            }),
            Mode::Idle => None,
        };

        match call {
            Some(call) => {
                debug!("Launching {}, generation {}", mode, generation);
                self.forward(call, move |r| Event::Completed(generation, r));
            },
            None => {
                warn!("Cannot {} using {}", mode, self.session.state());
                self.orchestrator.reset();
            },
        }
    }

    /// Runs `call` and feeds its result back into the driver.
    fn forward<T, F>(&self, call: BoxFuture<'static, T>, wrap: F)
        where T: Send + 'static,
              F: FnOnce(T) -> Event<P> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = call.await;
            // The driver is gone if this fails.
            let _ = events.send(wrap(result));
        });
    }
}
