//! Host harness for the session guard.
//!
//! Drives the library from line commands on stdin the way the mobile shell
//! would from OS callbacks and keypad taps.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use session_guard_lib::config::KEY_LOG_LEVEL;
use session_guard_lib::{
    init_guard_config_from_env, keys, spawn_lifecycle_pump, AppGuard, AppLifecycle,
    BiometricAuthenticator, BiometricCapability, BiometricFactor, BiometricVerdict, FileStore,
    GuardError, GuardPaths, KeyValueStore, MemoryStore, NoBiometrics, PinEntry,
    ScriptedBiometrics, SystemClock, UnlockOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

const BIOMETRIC_REASON: &str = "Unlock your wallet";

#[derive(Parser)]
#[command(name = "session-guard")]
#[command(about = "Inactivity lock harness for the bill-payment wallet", long_about = None)]
struct Cli {
    /// Directory holding the persistent session store
    #[arg(short, long, default_value = ".session-guard")]
    data_dir: PathBuf,

    /// Keep all state in memory
    #[arg(long)]
    ephemeral: bool,

    /// Simulated biometric hardware
    #[arg(short, long, value_enum, default_value_t = Hardware::None)]
    biometrics: Hardware,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Hardware {
    None,
    Unenrolled,
    Fingerprint,
    Face,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = init_guard_config_from_env().context("loading guard configuration")?;
    let default_level = config.get_or_default(KEY_LOG_LEVEL, "info").to_ascii_lowercase();

    // Initialize tracing; `log` records from the library are forwarded too.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let cli = Cli::parse();

    let store: Arc<dyn KeyValueStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let paths = GuardPaths::new(&cli.data_dir)?;
        paths.ensure_directories()?;
        let store = FileStore::open_or_recover(&paths).await?;
        info!("Using session store at {}", store.path().display());
        Arc::new(store)
    };

    let scripted = match cli.biometrics {
        Hardware::None => None,
        Hardware::Unenrolled => Some(Arc::new(ScriptedBiometrics::new(BiometricCapability {
            hardware_available: true,
            enrolled: false,
            factors: Default::default(),
        }))),
        Hardware::Fingerprint => Some(Arc::new(ScriptedBiometrics::new(
            BiometricCapability::enrolled(&[BiometricFactor::Fingerprint]),
        ))),
        Hardware::Face => Some(Arc::new(ScriptedBiometrics::new(
            BiometricCapability::enrolled(&[BiometricFactor::Face]),
        ))),
    };
    let authenticator: Arc<dyn BiometricAuthenticator> = match &scripted {
        Some(device) => device.clone() as Arc<dyn BiometricAuthenticator>,
        None => Arc::new(NoBiometrics),
    };

    let guard = AppGuard::from_config(store.clone(), Arc::new(SystemClock), config, authenticator)
        .await?;
    println!("cold start: {:?}", guard.force_close_outcome());

    let mut states = guard.subscribe();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            println!(
                "[state] phase={:?} locked={} gate={}",
                state.phase,
                state.lock_flag,
                state.requires_unlock()
            );
        }
    });

    let (events, rx) = mpsc::channel(16);
    let pump = spawn_lifecycle_pump(guard.observer(), rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };

        let result = match command {
            "active" | "foreground" | "inactive" | "background" => {
                let event: AppLifecycle = command.parse()?;
                events.send(event).await.context("lifecycle pump stopped")?;
                Ok(())
            }
            "digit" => press_digits(&guard, args).await,
            "backspace" => {
                guard.gate().backspace();
                println!("pin: {}", guard.gate().masked_entry());
                Ok(())
            }
            "pin" => match args.first() {
                Some(pin) => guard
                    .gate()
                    .submit_pin(pin)
                    .await
                    .map(|outcome| report(&outcome)),
                None => Err(GuardError::ValidationError("usage: pin NNNN".to_string())),
            },
            "biometric" => biometric(&guard, scripted.as_deref(), args.first().copied()).await,
            "set-pin" => match args {
                [pin, current @ ..] => {
                    let secret = SecretString::from(pin.to_string());
                    let current = current.first().map(|c| SecretString::from(c.to_string()));
                    guard
                        .credentials()
                        .set_pin(current.as_ref(), &secret)
                        .await
                }
                [] => Err(GuardError::ValidationError(
                    "usage: set-pin NEW [CURRENT]".to_string(),
                )),
            },
            "enable-biometrics" => guard.biometrics().enable().await,
            "disable-biometrics" => guard.biometrics().disable().await,
            "sign-in" => sign_in(&guard, store.as_ref(), args).await,
            "sign-out" => guard.on_signed_out().await,
            "status" => {
                status(&guard, store.as_ref()).await;
                Ok(())
            }
            "quit" | "exit" => break,
            other => {
                println!("unknown command '{}'", other);
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!("{}", err);
            println!("error: {}", err);
        }
    }

    drop(events);
    drop(pump);
    watcher.abort();
    Ok(())
}

async fn press_digits(guard: &AppGuard, args: &[&str]) -> Result<(), GuardError> {
    for digit in args.iter().flat_map(|arg| arg.chars()) {
        match guard.gate().press_digit(digit).await? {
            PinEntry::Pending { .. } => println!("pin: {}", guard.gate().masked_entry()),
            PinEntry::Submitted(outcome) => report(&outcome),
        }
    }
    Ok(())
}

async fn biometric(
    guard: &AppGuard,
    scripted: Option<&ScriptedBiometrics>,
    verdict: Option<&str>,
) -> Result<(), GuardError> {
    if let (Some(device), Some(verdict)) = (scripted, verdict) {
        device.push_verdict(match verdict {
            "ok" | "success" => BiometricVerdict::Success,
            "fail" | "failed" => BiometricVerdict::Failed,
            _ => BiometricVerdict::Cancelled,
        });
    }
    let outcome = guard.gate().authenticate_biometric(BIOMETRIC_REASON).await?;
    report(&outcome);
    Ok(())
}

async fn sign_in(
    guard: &AppGuard,
    store: &dyn KeyValueStore,
    args: &[&str],
) -> Result<(), GuardError> {
    let [email, password] = args else {
        return Err(GuardError::ValidationError(
            "usage: sign-in EMAIL PASSWORD".to_string(),
        ));
    };
    session_guard_lib::InputValidator::default().validate_email(email)?;
    store.set(keys::LAST_USER_EMAIL, email).await?;
    store.set(keys::USER_PASSWORD, password).await?;
    let authenticated = guard.on_signed_in().await;
    println!("signed in: {}", authenticated);
    Ok(())
}

async fn status(guard: &AppGuard, store: &dyn KeyValueStore) {
    let state = guard.session().snapshot();
    let lock_flag = store.get(keys::SECURITY_LOCK).await.ok().flatten();
    let heartbeat = guard.heartbeat().last_heartbeat().await;
    println!(
        "phase={:?} authenticated={} gate={} stored_lock={:?} heartbeat={:?} methods={:?} pin={}",
        state.phase,
        state.authenticated,
        state.requires_unlock(),
        lock_flag,
        heartbeat,
        guard.gate().available_methods(),
        guard.gate().masked_entry()
    );
    if let Some(message) = guard.gate().last_error() {
        println!("last error: {}", message);
    }
}

fn report(outcome: &UnlockOutcome) {
    match outcome {
        UnlockOutcome::Unlocked { method } => println!("unlocked via {:?}", method),
        UnlockOutcome::Rejected {
            message,
            remaining_attempts,
        } => println!(
            "rejected: {} ({} attempts before cooldown)",
            message, remaining_attempts
        ),
        UnlockOutcome::NotRequired => println!("no unlock required"),
    }
}
