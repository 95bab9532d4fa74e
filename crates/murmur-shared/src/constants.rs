/// Application name
pub const APP_NAME: &str = "murmur";

/// Default node address offered when no server is configured
pub const DEFAULT_SERVER_ADDR: &str = "localhost:8080";

/// Two messages with the same sender and content closer than this are
/// treated as one redelivered event (milliseconds)
pub const DUPLICATE_WINDOW_MS: i64 = 2_000;

/// Join/leave announcements for the same peer closer than this collapse
/// into a single system message (milliseconds)
pub const SYSTEM_EVENT_WINDOW_MS: i64 = 3_000;

/// Upper bound on the admitted-message key set
pub const MAX_TRACKED_MESSAGE_KEYS: usize = 1_000;

/// Number of hex characters in a displayed key fingerprint
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// Random bytes in a generated room identifier
pub const ROOM_ID_BYTES: usize = 16;

/// Persistent key-value layout
pub const FINGERPRINT_KEY_PREFIX: &str = "fingerprint:";
pub const LANGUAGE_KEY: &str = "language";

/// Key derivation context for fingerprints (BLAKE3)
pub const KDF_CONTEXT_FINGERPRINT: &str = "murmur-key-fingerprint-v1";
