/// A paste-driven command-line frontend for Sequoia.

use anyhow::Context as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use log::info;

use sequoia_workflow::{
    KeyPreference,
    Mode,
    Output,
    Snapshot,
    Status,
    UnlockState,
    Workflow,
    DEFAULT_DEBOUNCE,
};
use sequoia_workflow::sequoia::SequoiaProvider;

type Result<T> = anyhow::Result<T>;

mod sq_paste_cli;

fn read_or_stdin(f: Option<&str>) -> Result<String> {
    match f {
        Some(f) => fs::read_to_string(f)
            .with_context(|| format!("Failed to read {}", f)),
        None => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s)
                .context("Failed to read stdin")?;
            Ok(s)
        },
    }
}

fn create_or_stdout(f: Option<&str>, force: bool)
    -> Result<Box<dyn io::Write + Sync + Send>> {
    match f {
        None => Ok(Box::new(io::stdout())),
        Some(p) if p == "-" => Ok(Box::new(io::stdout())),
        Some(f) => {
            let p = Path::new(f);
            if !p.exists() || force {
                Ok(Box::new(OpenOptions::new()
                            .write(true)
                            .truncate(true)
                            .create(true)
                            .open(f)
                            .context("Failed to create output file")?))
            } else {
                Err(anyhow::anyhow!(
                    format!("File {:?} exists, use --force to overwrite", p)))
            }
        }
    }
}

/// Returns a name for the key, for use in prompts.
fn key_name(snapshot: &Snapshot) -> String {
    snapshot.key.display_identity.first().cloned()
        .unwrap_or_else(|| "the key".into())
}

/// Gets a password from the user.
///
/// Returns `None` if the user gives up.
fn prompt_password(snapshot: &Snapshot) -> Result<Option<String>> {
    let retry = matches!(snapshot.key.unlock, UnlockState::Failed(_));
    let p = rpassword::read_password_from_tty(
        Some(&format!(
            "{}Enter password to unlock {} (blank to skip): ",
            if retry { "Invalid password. " } else { "" },
            key_name(snapshot))))
        .context("While reading password")?;

    if p.is_empty() {
        // Give up.
        Ok(None)
    } else {
        Ok(Some(p))
    }
}

/// Waits for the workflow to settle, unlocking the key as needed.
fn settle(rt: &tokio::runtime::Runtime, workflow: &Workflow,
          mut password: Option<String>)
          -> Result<Snapshot>
{
    let from_file = password.is_some();
    loop {
        let snapshot = rt.block_on(workflow.settled())?;
        if ! snapshot.needs_passphrase() {
            return Ok(snapshot);
        }

        let p = if from_file {
            match password.take() {
                Some(p) => p,
                None => return Err(anyhow::anyhow!(
                    "Unable to unlock {}: Invalid password",
                    key_name(&snapshot))),
            }
        } else {
            match prompt_password(&snapshot)? {
                Some(p) => p,
                None => return Err(anyhow::anyhow!(
                    "Key {}: Unable to decrypt secret key material",
                    key_name(&snapshot))),
            }
        };
        workflow.submit_passphrase(p);
    }
}

pub struct Config {
    force: bool,
    workflow: sequoia_workflow::Config,
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = sq_paste_cli::build().get_matches();

    let debounce = match matches.value_of("debounce") {
        Some(ms) => Duration::from_millis(
            ms.parse::<u64>()
                .with_context(|| format!("Invalid debounce {:?}", ms))?),
        None => DEFAULT_DEBOUNCE,
    };
    let config = Config {
        force: matches.is_present("force"),
        workflow: sequoia_workflow::Config { debounce },
    };

    let key = read_or_stdin(matches.value_of("key"))
        .context("Failed to read the key")?;
    let message = read_or_stdin(matches.value_of("message"))
        .context("Failed to read the message")?;
    let password = match matches.value_of("passphrase-file") {
        Some(f) => Some(fs::read_to_string(f)
                        .context("Failed to read the password")?
                        .trim_end_matches(|c| c == '\n' || c == '\r')
                        .to_string()),
        None => None,
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    let workflow_config = config.workflow.clone();
    let workflow = rt.block_on(async move {
        Workflow::spawn(SequoiaProvider::new(), workflow_config)
    });
    workflow.set_key_text(key);
    if matches.is_present("public") {
        workflow.switch_mode_manually(KeyPreference::Public);
    }
    workflow.set_message_text(message);

    let snapshot = settle(&rt, &workflow, password)?;
    info!("Mode: {}, key: {}, message: {}",
          snapshot.mode, snapshot.key.state, snapshot.message_class);

    let status = match snapshot.operation {
        Some(op) => op.status,
        None if snapshot.mode == Mode::Idle => {
            return Err(anyhow::anyhow!(
                "No usable key: {}",
                snapshot.key.reason.as_deref().unwrap_or("the key is empty")));
        },
        None => return Err(anyhow::anyhow!("The message is empty")),
    };

    let output = match status {
        Status::Succeeded(output) => output,
        Status::Failed { message, .. } => return Err(anyhow::anyhow!(message)),
        Status::Pending | Status::AwaitingUnlock =>
            return Err(anyhow::anyhow!("Operation did not complete")),
    };

    if let Output::Verified(v) = &output {
        if ! v.verified {
            return Err(anyhow::anyhow!("Verification failed"));
        }
        eprintln!("Good signature from {}",
                  v.signer_identity.as_deref().unwrap_or("unknown signer"));
    }

    let mut sink = create_or_stdout(matches.value_of("output"), config.force)?;
    sink.write_all(output.text().as_bytes())?;
    sink.flush()?;
    Ok(())
}
