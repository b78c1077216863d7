//! Communication profile files.
//!
//! A profile is a small text resource whose first non-comment, non-blank
//! line configures a listener option (request URI and user-agent string).

use std::path::Path;

use crate::{AppError, Result};

/// Load the effective profile line from a file.
///
/// Comment lines start with `#`. Surrounding double quotes are stripped.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be read, or
/// `AppError::Validation` if it contains no usable line.
pub fn load_profile_line(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Io(format!("cannot read profile {}: {err}", path.display())))?;

    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_matches('"').to_owned())
        .ok_or_else(|| {
            AppError::Validation(format!(
                "profile {} contains no non-comment, non-blank line",
                path.display()
            ))
        })
}
