//! Pkt-line decoding for the Git upload-pack ref advertisement.
//!
//! A smart-HTTP remote answers `GET <repo>/info/refs?service=git-upload-pack`
//! with a sequence of pkt-lines: a four-hex-digit length prefix (covering the
//! prefix itself) followed by the payload, with `0000` acting as a flush
//! packet. The first ref line carries a NUL-separated capability list which
//! is ignored here.

use crate::error::VcsError;

/// A single `<commit-id> <ref-name>` pair advertised by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRef {
    /// Object id the ref points at.
    pub commit_id: String,
    /// Fully qualified ref name, e.g. `refs/heads/main`.
    pub ref_name: String,
}

/// Resolves a branch name to the fully qualified ref name used in the
/// advertisement. Names already under `refs/` are passed through.
#[must_use]
pub fn normalize_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

/// Parses an upload-pack ref advertisement into its advertised refs.
///
/// Comment lines (`# service=...`), the symbolic `HEAD` entry, and peeled
/// tag entries (`...^{}`) are dropped; only concrete refs are returned.
///
/// # Errors
///
/// Returns [`VcsError::Protocol`] if the pkt-line framing is broken.
pub fn parse_ref_advertisement(body: &str) -> Result<Vec<AdvertisedRef>, VcsError> {
    let mut refs = Vec::new();
    let mut pos = 0;

    while pos < body.len() {
        let prefix = body.get(pos..pos + 4).ok_or_else(|| VcsError::Protocol {
            reason: format!("truncated pkt-line length at offset {pos}"),
        })?;
        let len = usize::from_str_radix(prefix, 16).map_err(|_| VcsError::Protocol {
            reason: format!("invalid pkt-line length {prefix:?} at offset {pos}"),
        })?;

        // Flush packet
        if len == 0 {
            pos += 4;
            continue;
        }
        if len < 4 {
            return Err(VcsError::Protocol {
                reason: format!("pkt-line length {len} below header size at offset {pos}"),
            });
        }

        let payload = body.get(pos + 4..pos + len).ok_or_else(|| VcsError::Protocol {
            reason: format!("pkt-line payload extends past end of body at offset {pos}"),
        })?;
        pos += len;

        if let Some(advertised) = parse_ref_line(payload) {
            refs.push(advertised);
        }
    }

    Ok(refs)
}

/// Extracts a ref from one pkt-line payload, or `None` for lines that do
/// not name a concrete ref.
fn parse_ref_line(payload: &str) -> Option<AdvertisedRef> {
    let line = payload.trim_end_matches('\n');
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    // The first ref line carries capabilities after a NUL.
    let line = line.split('\0').next().unwrap_or(line);

    let (commit_id, ref_name) = line.split_once(' ')?;
    if commit_id.is_empty() || ref_name.is_empty() {
        return None;
    }
    if ref_name == "HEAD" || ref_name.ends_with("^{}") {
        return None;
    }

    Some(AdvertisedRef {
        commit_id: commit_id.to_string(),
        ref_name: ref_name.to_string(),
    })
}
