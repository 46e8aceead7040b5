//! Storage keys for uploaded files

/// Key under which an upload named `original_name` is stored first.
///
/// Directory components are dropped and characters outside
/// `[A-Za-z0-9._-]` become `_`.
pub fn target_key(prefix: &str, original_name: &str) -> String {
    let name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name)
        .trim();
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    let sanitized = if sanitized.is_empty() { "upload" } else { sanitized };

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        sanitized.to_string()
    } else {
        format!("{}/{}", prefix, sanitized)
    }
}

/// File name component of a key
pub fn key_file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Keys to try in order when `target` may be occupied by other bytes.
///
/// Alternatives insert a growing prefix of the digest before the
/// extension: `uploads/STA10690_1a2b3c4d.25o`.
pub fn candidate_keys(target: &str, digest: &str) -> Vec<String> {
    let (dir, file) = match target.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, target),
    };
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file, None),
    };

    let mut keys = vec![target.to_string()];
    for len in [8, 16, digest.len()] {
        let suffix = &digest[..len.min(digest.len())];
        let name = match ext {
            Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
            None => format!("{}_{}", stem, suffix),
        };
        let key = match dir {
            Some(dir) => format!("{}/{}", dir, name),
            None => name,
        };
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_key_sanitizes() {
        assert_eq!(target_key("uploads", "STA10690.25o"), "uploads/STA10690.25o");
        assert_eq!(target_key("uploads/", "/tmp/in/STA1 0690.25o"), "uploads/STA1_0690.25o");
        assert_eq!(target_key("", "..\\x.25o"), "x.25o");
        assert_eq!(target_key("uploads", "..."), "uploads/upload");
    }

    #[test]
    fn test_candidate_keys() {
        let digest = "0123456789abcdef".repeat(4);
        let keys = candidate_keys("uploads/STA10690.25o", &digest);
        assert_eq!(keys[0], "uploads/STA10690.25o");
        assert_eq!(keys[1], "uploads/STA10690_01234567.25o");
        assert_eq!(keys[2], "uploads/STA10690_0123456789abcdef.25o");
        assert_eq!(keys[3], format!("uploads/STA10690_{}.25o", digest));

        let keys = candidate_keys("README", "abcdef0123456789");
        assert_eq!(keys, vec!["README", "README_abcdef01", "README_abcdef0123456789"]);
    }

    #[test]
    fn test_key_file_name() {
        assert_eq!(key_file_name("uploads/a/STA1.25n"), "STA1.25n");
        assert_eq!(key_file_name("STA1.25n"), "STA1.25n");
    }
}
