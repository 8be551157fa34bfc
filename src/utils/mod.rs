//! Utility functions and helpers
//!
//! Atomic mirror writes and file naming helpers.

pub mod atomic;

pub use atomic::{atomic_write, atomic_write_json, cleanup_temp_files};

/// Map an arbitrary identifier onto a safe file name component
///
/// Keeps ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
pub fn file_safe_name(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe_name() {
        assert_eq!(file_safe_name("session-42_a"), "session-42_a");
        assert_eq!(file_safe_name("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_safe_name("a.b c"), "a_b_c");
        assert_eq!(file_safe_name(""), "_");
    }
}
