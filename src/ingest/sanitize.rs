//! Filename sanitization.
//!
//! The result is only ever used as a display name; object-store keys are
//! generated tokens. Sanitization is idempotent: applying it to its own
//! output is a no-op.

/// Windows device names that shadow real files.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_LEN: usize = 255;

/// Sanitize a client-provided filename.
///
/// Path separators and `..` sequences are removed outright; every other
/// character outside `[A-Za-z0-9._-]` becomes `_`. Reserved device
/// names are prefixed with `file_`, the result is capped at 255 bytes
/// preserving the extension, and an empty result becomes `file`.
pub fn sanitize_filename(name: &str) -> String {
    let mut result: String = name.chars().filter(|c| *c != '/' && *c != '\\').collect();
    while result.contains("..") {
        result = result.replace("..", "");
    }

    let mut result: String = result
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let stem = result.split('.').next().unwrap_or("");
    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(stem))
    {
        result = format!("file_{result}");
    }

    if result.len() > MAX_LEN {
        result = truncate_preserving_extension(&result);
    }

    if result.is_empty() {
        result = "file".to_string();
    }
    result
}

fn truncate_preserving_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_LEN => {
            let ext = &name[dot..];
            let keep = MAX_LEN - ext.len();
            format!("{}{}", &name[..keep], ext)
        }
        _ => name[..MAX_LEN].to_string(),
    }
}

/// The extension of a filename, lowercased and including the dot.
/// Empty when there is none.
pub fn extension(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[dot..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("..\\..\\windows\\cmd.exe"), "windowscmd.exe");
        assert_eq!(sanitize_filename("a/b/c.jpg"), "abc.jpg");
    }

    #[test]
    fn replaces_disallowed_characters() {
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_filename("füße.png"), "f__e.png");
    }

    #[test]
    fn prefixes_reserved_device_names() {
        assert_eq!(sanitize_filename("CON.jpg"), "file_CON.jpg");
        assert_eq!(sanitize_filename("con.jpg"), "file_con.jpg");
        assert_eq!(sanitize_filename("LPT9"), "file_LPT9");
        assert_eq!(sanitize_filename("console.jpg"), "console.jpg");
    }

    #[test]
    fn empty_input_becomes_file() {
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("../.."), "file");
    }

    #[test]
    fn truncates_preserving_extension() {
        let long = format!("{}.jpeg", "a".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.len(), 255);
        assert!(sanitized.ends_with(".jpeg"));

        let no_ext = "b".repeat(300);
        assert_eq!(sanitize_filename(&no_ext).len(), 255);
    }

    #[test]
    fn sanitizing_twice_is_a_noop() {
        for name in [
            "../../etc/passwd",
            "CON.jpg",
            "my photo (1).jpg",
            "beach.png",
            &format!("{}.jpeg", "a".repeat(300)),
            "",
        ] {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once, "input {name:?}");
        }
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension("beach.PNG"), ".png");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension(".hidden"), "");
    }
}
