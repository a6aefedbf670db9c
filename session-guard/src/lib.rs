// lib.rs - Inactivity lock guard for the bill-payment wallet

pub mod biometric;
pub mod clock;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod force_close;
pub mod guard;
pub mod heartbeat;
pub mod lifecycle;
pub mod session;
pub mod storage;
pub mod unlock;
pub mod validation;

// Re-export common types
pub use biometric::{
    BiometricAuthenticator, BiometricCapability, BiometricFactor, BiometricSettings,
    BiometricVerdict, NoBiometrics, ScriptedBiometrics,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    get_guard_config, init_guard_config_from_env, Environment, GuardConfig, GuardSettings,
};
pub use errors::{GuardError, GuardResult};
pub use evaluator::{should_lock, LockPolicy};
pub use force_close::{ForceCloseDetector, ForceCloseOutcome};
pub use guard::AppGuard;
pub use heartbeat::HeartbeatTracker;
pub use lifecycle::{spawn_lifecycle_pump, AppLifecycle, LifecycleObserver, LifecyclePump};
pub use session::{GuardPhase, SessionManager, SessionState};
pub use storage::{keys, FileStore, GuardPaths, KeyValueStore, MemoryStore, StoredFlags};
pub use unlock::{PinCredentialStore, PinEntry, PinHasher, UnlockGate, UnlockMethod, UnlockOutcome};
pub use validation::InputValidator;
