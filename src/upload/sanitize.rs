//! Filename sanitization
//!
//! Client-supplied names are reduced to a single path segment before they
//! touch the upload directory.

use super::types::UploadError;

const QUOTES: &[char] = &['"', '\''];

/// Reduce a client-supplied name to a safe, single-segment filename.
///
/// Surrounding whitespace and quotes are stripped, every `/` or `\`
/// directory component and any drive prefix (`C:`) is discarded.
pub fn sanitize_filename(raw: &str) -> Result<String, UploadError> {
    let unquoted = raw.trim().trim_matches(QUOTES);

    let last_segment = unquoted
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    // Drive-relative names such as `C:file.txt`
    let without_drive = match last_segment.rfind(':') {
        Some(idx) => &last_segment[idx + 1..],
        None => last_segment,
    };

    let name = without_drive.trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(UploadError::InvalidFilename(raw.to_string()));
    }

    if name.chars().any(char::is_control) {
        return Err(UploadError::InvalidFilename(raw.to_string()));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_quoted_names() {
        assert_eq!(sanitize_filename("test.txt").unwrap(), "test.txt");
        assert_eq!(sanitize_filename("\"test.txt\"").unwrap(), "test.txt");
        assert_eq!(sanitize_filename("'test.txt'").unwrap(), "test.txt");
        assert_eq!(sanitize_filename("  test file.txt  ").unwrap(), "test file.txt");
    }

    #[test]
    fn test_traversal_is_reduced_to_last_segment() {
        assert_eq!(sanitize_filename("../../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("/etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_filename("C:\\Windows\\system32\\file.txt").unwrap(),
            "file.txt"
        );
        assert_eq!(sanitize_filename("C:file.txt").unwrap(), "file.txt");
        assert_eq!(sanitize_filename("..\\..\\boot.ini").unwrap(), "boot.ini");
    }

    #[test]
    fn test_traversal_never_leaves_separators() {
        let inputs = [
            "../../a.bin",
            "..\\..\\a.bin",
            "/../x/../y.txt",
            "dir/..\\../z",
            "'../quoted.txt'",
            "a/b/c/d/e/f.tar.gz",
        ];

        for input in inputs {
            let name = sanitize_filename(input).unwrap();
            assert!(!name.contains('/'), "{input} -> {name}");
            assert!(!name.contains('\\'), "{input} -> {name}");
            assert_ne!(name, "..");
            assert!(!name.split(['/', '\\']).any(|seg| seg == ".."));
        }
    }

    #[test]
    fn test_rejects_empty_and_dot_names() {
        for input in ["", "   ", "/", "\\\\", "''", "..", "../..", "a/.", "C:"] {
            assert!(
                matches!(sanitize_filename(input), Err(UploadError::InvalidFilename(_))),
                "expected rejection for {input:?}"
            );
        }
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(sanitize_filename("bad\0name").is_err());
        assert!(sanitize_filename("line\nbreak.txt").is_err());
    }
}
