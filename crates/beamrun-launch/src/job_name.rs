use uuid::Uuid;

use crate::error::{LaunchError, Result};

pub const MAX_JOB_NAME_LEN: usize = 1024;

/// Random characters appended after the `-` separator.
const SUFFIX_LEN: usize = 8;

/// `^[a-z]([-a-z0-9]*[a-z0-9])?$`
fn matches_engine_pattern(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_lowercase()
        && (last.is_ascii_lowercase() || last.is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

pub fn is_valid_job_name(name: &str) -> bool {
    name.len() <= MAX_JOB_NAME_LEN && matches_engine_pattern(name)
}

/// Produces the name submitted to the remote engine. Invalid base names are
/// rejected rather than rewritten.
pub fn build_job_name(base: &str, append_suffix: bool) -> Result<String> {
    let reserved = if append_suffix { SUFFIX_LEN + 1 } else { 0 };
    if base.len() + reserved > MAX_JOB_NAME_LEN || !matches_engine_pattern(base) {
        return Err(LaunchError::InvalidJobName(base.to_string()));
    }
    if !append_suffix {
        return Ok(base.to_string());
    }
    let uuid = Uuid::new_v4().simple().to_string();
    Ok(format!("{base}-{}", &uuid[..SUFFIX_LEN]))
}
