//! Filename sanitization for client-supplied upload names.
//!
//! The original filename is interpolated into storage keys and chunk names,
//! so only its final path component is kept and characters that are unsafe
//! on common filesystems or object stores are replaced with `_`.

use crate::error::{Error, Result};

/// Maximum length of a sanitized filename in bytes.
///
/// The name is embedded in a single path component on local storage, either
/// as `{uuid}_{name}` or as `chunk_{n}_of_{total}_{name}`, and both must stay
/// within the 255-byte `NAME_MAX` of common filesystems.
pub const MAX_FILENAME_LEN: usize = 200;

/// Longest extension preserved when a name has to be truncated.
const MAX_PRESERVED_EXTENSION: usize = 16;

/// Reduce a client-supplied filename to a safe single path component.
///
/// Rejects names that are empty, `.` or `..` after sanitization.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(Error::InvalidFilename(format!(
            "{raw:?} does not contain a usable file name"
        )));
    }

    Ok(truncate(cleaned))
}

fn truncate(name: &str) -> String {
    if name.len() <= MAX_FILENAME_LEN {
        return name.to_string();
    }

    let extension = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_PRESERVED_EXTENSION => &name[dot..],
        _ => "",
    };
    let mut stem_len = MAX_FILENAME_LEN - extension.len();
    while !name.is_char_boundary(stem_len) {
        stem_len -= 1;
    }
    format!("{}{}", &name[..stem_len], extension)
}
