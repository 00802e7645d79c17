//! Idempotency key format: `{prefix}_{operation}_{hash8}_{uuid}`.

use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "idem";

const HASH_LEN: usize = 8;

/// Source of unique key suffixes.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Short, deterministic hash of the operation context.
pub fn context_hash(operation: &str, user_id: Option<&str>, context: &Value) -> String {
    let canonical = json!({
        "operation": operation,
        "userId": user_id,
        "context": context,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    hash
}

/// Build a key. The suffix makes every call unique, so callers must keep
/// the returned string to retry the same action.
pub fn generate_key(
    prefix: &str,
    operation: &str,
    user_id: Option<&str>,
    context: &Value,
    ids: &dyn IdGenerator,
) -> String {
    format!(
        "{prefix}_{operation}_{}_{}",
        context_hash(operation, user_id, context),
        ids.next_id()
    )
}

/// Recover the operation name from a key built with `prefix`.
pub fn parse_operation<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('_')?;
    let mut parts = rest.rsplitn(3, '_');
    let _id = parts.next()?;
    let hash = parts.next()?;
    let operation = parts.next()?;
    (hash.len() == HASH_LEN && !operation.is_empty()).then_some(operation)
}
