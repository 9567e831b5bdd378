//! Body resolution: find the forwarded ticket text inside a MIME tree.
//!
//! The forwarded notice is the text after the original sender's address.
//! Parts are searched depth-first; the first part whose decoded text holds
//! the marker wins.

use tracing::trace;

use crate::mail::Part;

/// Forwarded text found in one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBody {
    /// Text after the first marker occurrence, trimmed.
    pub body: String,
    /// Content type of the part that matched.
    pub content_type: String,
}

/// Resolve the forwarded body under `root`, or `None` if no part qualifies.
///
/// Only a part whose text contains `sentinel` can match, so a resolved body
/// always came from a message carrying the marker.
pub fn resolve(root: &Part, sentinel: &str) -> Option<ResolvedBody> {
    if sentinel.is_empty() {
        return None;
    }
    resolve_part(root, sentinel)
}

fn resolve_part(part: &Part, sentinel: &str) -> Option<ResolvedBody> {
    if let Some(found) = direct_body(part, sentinel) {
        return Some(found);
    }

    part.children
        .iter()
        .filter(|child| {
            let skip = child.is_attachment || child.is_image();
            if skip {
                trace!(content_type = %child.content_type, "Skipping attachment/image part");
            }
            !skip
        })
        .find_map(|child| resolve_part(child, sentinel))
}

/// The part's own content, if it decodes and carries the marker.
fn direct_body(part: &Part, sentinel: &str) -> Option<ResolvedBody> {
    let data = part.inline_data.as_deref()?;
    let source = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            trace!(content_type = %part.content_type, error = %e, "Part is not valid UTF-8");
            return None;
        }
    };

    let (_, after) = source.split_once(sentinel)?;
    Some(ResolvedBody {
        body: after.trim().to_string(),
        content_type: part.content_type.clone(),
    })
}
