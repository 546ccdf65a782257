// src/cache/context_hash.rs
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::models::CompanyContext;

/// Stable digest of the context hints. Keys are sorted, absent fields hash as empty
/// strings and values are trimmed and lowercased, so `None` and an all-blank context
/// share one hash.
pub fn context_hash(context: Option<&CompanyContext>) -> String {
    let field = |value: Option<&Option<String>>| -> String {
        value
            .and_then(|v| v.as_deref())
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_default()
    };
    let mut components = BTreeMap::new();
    components.insert("industry", field(context.map(|c| &c.industry)));
    components.insert("region", field(context.map(|c| &c.region)));
    components.insert("size", field(context.map(|c| &c.size)));

    let text = components
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
