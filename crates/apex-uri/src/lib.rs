//! URI <-> filesystem path conversion and normalization utilities.
//!
//! The core identifies every file by its LSP document URI rather than a
//! filesystem path, so this crate is the single place that understands the
//! two schemes in play:
//!
//! - `file://...` — ordinary workspace source files.
//! - `apexlib://<namespace>/<typeName>` — synthetic URIs minted by the
//!   resource loader (`apex-resource-loader`) for standard-library symbol
//!   tables that never existed as files on disk.
//!
//! # Platform Support
//!
//! Filesystem-touching functions are not available on `wasm32` targets.

use url::Url;

/// The scheme used for synthetic standard-library symbol tables.
pub const APEXLIB_SCHEME: &str = "apexlib";

/// Convert a `file://` URI to a filesystem path.
///
/// Returns `None` if the URI is not a valid `file://` URI.
#[cfg(not(target_arch = "wasm32"))]
pub fn uri_to_fs_path(uri: &str) -> Option<std::path::PathBuf> {
    let url = Url::parse(uri).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    url.to_file_path().ok()
}

/// Convert a filesystem path to a `file://` URI.
///
/// # Errors
///
/// Returns an error if the path cannot be converted to an absolute path or
/// the conversion to a URI fails.
#[cfg(not(target_arch = "wasm32"))]
pub fn fs_path_to_uri<P: AsRef<std::path::Path>>(path: P) -> Result<String, String> {
    let path = path.as_ref();

    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| format!("failed to get current directory: {e}"))?
            .join(path)
    };

    Url::from_file_path(&abs_path)
        .map(|url| url.to_string())
        .map_err(|()| format!("failed to convert path to URI: {}", abs_path.display()))
}

/// Normalize a URI to a consistent form.
///
/// Valid URIs are parsed and re-serialized; bare filesystem paths are
/// converted to `file://` URIs; special schemes (`untitled:`, `apexlib:`,
/// ...) pass through unchanged.
#[cfg(not(target_arch = "wasm32"))]
pub fn normalize_uri(uri: &str) -> String {
    if let Ok(url) = Url::parse(uri) {
        return url.to_string();
    }

    let path = std::path::Path::new(uri);
    if let Ok(uri_string) = fs_path_to_uri(path) {
        return uri_string;
    }

    if uri.starts_with("file://")
        && let Some(fs_path) = uri_to_fs_path(uri)
        && let Ok(normalized) = fs_path_to_uri(&fs_path)
    {
        return normalized;
    }

    uri.to_string()
}

/// Normalize a URI to a consistent form (wasm32 version - no filesystem).
#[cfg(target_arch = "wasm32")]
pub fn normalize_uri(uri: &str) -> String {
    if let Ok(url) = Url::parse(uri) { url.to_string() } else { uri.to_string() }
}

/// Normalize a URI to a consistent key for lookups.
///
/// Windows drive letters are lowercased so that `file:///C:/foo` and
/// `file:///c:/foo` hash to the same key; everything else is returned
/// exactly as parsed.
pub fn uri_key(uri: &str) -> String {
    if let Ok(u) = Url::parse(uri) {
        let s = u.as_str().to_string();
        if let Some(rest) = s.strip_prefix("file:///")
            && rest.len() > 1
            && rest.as_bytes()[1] == b':'
            && rest.as_bytes()[0].is_ascii_alphabetic()
        {
            return format!("file:///{}{}", rest[0..1].to_ascii_lowercase(), &rest[1..]);
        }
        s
    } else {
        uri.to_string()
    }
}

/// Check if a URI uses the `file://` scheme.
pub fn is_file_uri(uri: &str) -> bool {
    uri.starts_with("file://")
}

/// Check if a URI uses the synthetic `apexlib://` scheme (§4.7 resource
/// loader).
pub fn is_apexlib_uri(uri: &str) -> bool {
    uri.starts_with("apexlib://")
}

/// Check if a URI uses a special scheme (neither `file://` nor
/// `apexlib://`).
pub fn is_special_scheme(uri: &str) -> bool {
    if is_apexlib_uri(uri) {
        return false;
    }
    if let Ok(url) = Url::parse(uri) {
        url.scheme() != "file"
    } else {
        uri.starts_with("untitled:")
            || uri.starts_with("git:")
            || uri.starts_with("vscode-notebook:")
            || uri.starts_with("vscode-vfs:")
    }
}

/// Extract the file extension from a URI.
pub fn uri_extension(uri: &str) -> Option<&str> {
    let path_part = uri.rsplit('/').next()?;
    let path_part = path_part.split('?').next()?;
    let path_part = path_part.split('#').next()?;
    let dot_pos = path_part.rfind('.')?;
    let ext = &path_part[dot_pos + 1..];
    if ext.is_empty() { None } else { Some(ext) }
}

/// Extract a stable, platform-independent path string from a URI (§4.1
/// `extractFilePathFromUri`).
///
/// For `file://` URIs this is the decoded filesystem path with no
/// back-slashes and a single leading slash on POSIX. For `apexlib://`
/// URIs it is `<namespace>/<typeName>`, matching how the resource loader
/// keys entries. Any other scheme falls back to the URI's path component
/// verbatim.
pub fn extract_file_path_from_uri(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("apexlib://") {
        return rest.trim_start_matches('/').to_string();
    }

    if let Ok(url) = Url::parse(uri) {
        if url.scheme() == "file" {
            let path = url.path();
            let decoded = percent_decode(path);
            return decoded.replace('\\', "/");
        }
        return url.path().trim_start_matches('/').to_string();
    }

    uri.replace('\\', "/")
}

fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_key_basic() {
        assert_eq!(uri_key("file:///tmp/test.cls"), "file:///tmp/test.cls");
    }

    #[test]
    fn test_uri_key_windows_drive() {
        assert_eq!(uri_key("file:///C:/Users/test.cls"), "file:///c:/Users/test.cls");
        assert_eq!(uri_key("file:///D:/foo/bar.cls"), "file:///d:/foo/bar.cls");
    }

    #[test]
    fn test_uri_key_invalid() {
        assert_eq!(uri_key("not-a-uri"), "not-a-uri");
    }

    #[test]
    fn test_is_file_uri() {
        assert!(is_file_uri("file:///tmp/test.cls"));
        assert!(!is_file_uri("https://example.com"));
        assert!(!is_file_uri("untitled:Untitled-1"));
    }

    #[test]
    fn test_is_apexlib_uri() {
        assert!(is_apexlib_uri("apexlib://System/String"));
        assert!(!is_apexlib_uri("file:///tmp/test.cls"));
    }

    #[test]
    fn test_is_special_scheme() {
        assert!(is_special_scheme("untitled:Untitled-1"));
        assert!(!is_special_scheme("file:///tmp/test.cls"));
        assert!(!is_special_scheme("apexlib://System/String"));
    }

    #[test]
    fn test_uri_extension() {
        assert_eq!(uri_extension("file:///tmp/test.cls"), Some("cls"));
        assert_eq!(uri_extension("file:///tmp/Trigger.trigger"), Some("trigger"));
        assert_eq!(uri_extension("file:///tmp/no-extension"), None);
        assert_eq!(uri_extension("file:///tmp/file.cls?query=1"), Some("cls"));
    }

    #[test]
    fn test_extract_file_path_from_apexlib_uri() {
        assert_eq!(extract_file_path_from_uri("apexlib://System/String"), "System/String");
    }

    #[test]
    fn test_extract_file_path_from_file_uri() {
        assert_eq!(extract_file_path_from_uri("file:///tmp/Foo.cls"), "/tmp/Foo.cls");
    }

    #[test]
    fn test_extract_file_path_no_backslashes() {
        let extracted = extract_file_path_from_uri("file:///tmp/Foo.cls");
        assert!(!extracted.contains('\\'));
        assert!(extracted.starts_with('/'));
    }

    #[cfg(not(target_arch = "wasm32"))]
    mod filesystem_tests {
        use super::*;

        #[test]
        fn test_uri_to_fs_path_basic() {
            let path = uri_to_fs_path("file:///tmp/test.cls");
            assert!(path.is_some());
            assert!(path.unwrap().ends_with("test.cls"));
        }

        #[test]
        fn test_uri_to_fs_path_non_file() {
            assert!(uri_to_fs_path("https://example.com").is_none());
            assert!(uri_to_fs_path("untitled:Untitled-1").is_none());
        }

        #[test]
        fn test_fs_path_to_uri_basic() {
            let uri = fs_path_to_uri("/tmp/test.cls").unwrap();
            assert!(uri.starts_with("file:///"));
            assert!(uri.contains("test.cls"));
        }

        #[test]
        fn test_normalize_uri_valid() {
            assert_eq!(normalize_uri("file:///tmp/test.cls"), "file:///tmp/test.cls");
        }

        #[test]
        fn test_normalize_uri_special() {
            assert_eq!(normalize_uri("untitled:Untitled-1"), "untitled:Untitled-1");
        }

        #[test]
        fn test_roundtrip() {
            let original = "/tmp/roundtrip-test.cls";
            let uri = fs_path_to_uri(original).unwrap();
            let path = uri_to_fs_path(&uri).unwrap();
            assert!(path.ends_with("roundtrip-test.cls"));
        }
    }
}
