//! Subresource-integrity style digests (`sha512-<base64>`)

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::{Result, SkillError};

/// `sha256-<base64>` digest of `bytes`
pub fn sri_sha256(bytes: &[u8]) -> String {
    format!("sha256-{}", STANDARD.encode(Sha256::digest(bytes)))
}

/// Lowercase hex sha256, used as the content identifier of archive sources
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn digest_for(algorithm: &str, bytes: &[u8]) -> Option<String> {
    let encoded = match algorithm {
        "sha512" => STANDARD.encode(Sha512::digest(bytes)),
        "sha256" => STANDARD.encode(Sha256::digest(bytes)),
        _ => return None,
    };
    Some(format!("{algorithm}-{encoded}"))
}

/// Check `bytes` against an integrity string.
///
/// The string may carry several space-separated hashes; the strongest
/// supported one is checked. A string with no supported algorithm fails.
pub fn verify(reference: &str, bytes: &[u8], expected: &str) -> Result<()> {
    let mut candidates: Vec<(&str, &str)> = expected
        .split_whitespace()
        .filter_map(|item| item.split_once('-').map(|(alg, _)| (alg, item)))
        .filter(|(alg, _)| matches!(*alg, "sha512" | "sha256"))
        .collect();
    candidates.sort_by_key(|(alg, _)| if *alg == "sha512" { 0 } else { 1 });

    let Some((algorithm, wanted)) = candidates.first() else {
        return Err(SkillError::Integrity {
            reference: reference.to_string(),
            expected: expected.to_string(),
            actual: "unsupported integrity algorithm".to_string(),
        });
    };

    let actual = digest_for(algorithm, bytes).unwrap_or_default();
    if actual == *wanted {
        Ok(())
    } else {
        Err(SkillError::Integrity {
            reference: reference.to_string(),
            expected: wanted.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_match_and_mismatch() {
        let bytes = b"skill bundle";
        let good = digest_for("sha512", bytes).expect("sha512");
        verify("pdf@1.0.0", bytes, &good).expect("should verify");

        let err = verify("pdf@1.0.0", b"tampered", &good).expect_err("should fail");
        assert!(matches!(err, SkillError::Integrity { .. }));
    }

    #[test]
    fn strongest_algorithm_wins() {
        let bytes = b"abc";
        let combined = format!("{} sha512-bogus", sri_sha256(bytes));
        let err = verify("x", bytes, &combined).expect_err("sha512 is checked first");
        match err {
            SkillError::Integrity { expected, .. } => assert_eq!(expected, "sha512-bogus"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unsupported_algorithm_is_rejected() {
        let err = verify("x", b"abc", "md5-xyz").expect_err("should fail");
        assert!(matches!(err, SkillError::Integrity { .. }));
    }

    #[test]
    fn sha256_helpers_agree() {
        let bytes = b"hello";
        assert_eq!(
            sha256_hex(bytes),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(sri_sha256(bytes).starts_with("sha256-LPJNul+wow4m6Dsqxbni"));
    }
}
