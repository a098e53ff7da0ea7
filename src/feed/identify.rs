use sha2::{Digest, Sha256};

use super::parser::ParsedItem;

/// Derives the stable external identifier for an item.
///
/// Uses the item's own id (Atom `id`, RSS `guid`, RDF `rdf:about`), then its
/// link, then a SHA-256 over title, summary and content. The result depends
/// only on the item, so re-downloading the same item yields the same id.
pub fn identify(item: &ParsedItem) -> String {
    let explicit = [item.id.as_deref(), item.link.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty());

    if let Some(id) = explicit {
        return id.to_string();
    }

    let mut hasher = Sha256::new();
    for part in [&item.title, &item.summary, &item.content] {
        hasher.update(part.as_deref().unwrap_or("").as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}
