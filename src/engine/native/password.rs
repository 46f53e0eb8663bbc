use super::xml::{Attributes, attribute};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Hash algorithms accepted in protection and encryption descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Parse an algorithm name such as `SHA-512` (case and dash insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "SHA1" => Some(HashAlgorithm::Sha1),
            "SHA256" => Some(HashAlgorithm::Sha256),
            "SHA384" => Some(HashAlgorithm::Sha384),
            "SHA512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Digest size in bytes
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Hash the concatenation of `parts`
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            HashAlgorithm::Sha1 => run::<Sha1>(parts),
            HashAlgorithm::Sha256 => run::<Sha256>(parts),
            HashAlgorithm::Sha384 => run::<Sha384>(parts),
            HashAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }
}

/// Password as UTF-16LE bytes, the form every OOXML hash consumes
pub fn utf16le(password: &str) -> Vec<u8> {
    password.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// Characters of a password the legacy hash looks at
const LEGACY_MAX_CHARS: usize = 15;

/// The 16-bit XOR hash stored in legacy `password` attributes
pub fn legacy_hash(password: &str) -> u16 {
    let mut hash: u64 = 0;
    let mut length: u64 = 0;
    for (index, ch) in password.chars().take(LEGACY_MAX_CHARS).enumerate() {
        let value = u64::from(u32::from(ch) & 0xffff) << (index + 1);
        let rotated = value >> 15;
        hash ^= (value & 0x7fff) | rotated;
        length += 1;
    }
    hash ^= length;
    hash ^= 0xCE4B;
    (hash & 0xffff) as u16
}

/// Salted, iterated protection hash: `H0 = H(salt || pw)`, `Hn = H(Hn-1 || LE32(n-1))`
pub fn iterated_hash(
    algorithm: HashAlgorithm,
    password: &str,
    salt: &[u8],
    spin_count: u32,
) -> Vec<u8> {
    let mut hash = algorithm.digest(&[salt, &utf16le(password)]);
    for round in 0..spin_count {
        hash = algorithm.digest(&[&hash, &round.to_le_bytes()]);
    }
    hash
}

/// What a protection element stores to check a password against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordVerifier {
    /// Legacy 16-bit hash
    Legacy(u16),

    /// Salted iterated hash
    Hashed {
        algorithm: HashAlgorithm,
        hash: Vec<u8>,
        salt: Vec<u8>,
        spin_count: u32,
    },

    /// An algorithm this engine cannot compute
    Unsupported(String),
}

impl PasswordVerifier {
    /// Read the verifier from a protection element's attributes.
    ///
    /// `prefix` is empty for sheet protection and `workbook` for workbook
    /// protection, whose attributes are named `workbookPassword`,
    /// `workbookHashValue` and so on. Returns `None` when the element has no
    /// password at all.
    pub fn from_attributes(attributes: &Attributes, prefix: &str) -> Option<Self> {
        let name = |base: &str| prefixed(prefix, base);

        if let Some(algorithm_name) = attribute(attributes, &name("algorithmName")) {
            let hash = attribute(attributes, &name("hashValue")).and_then(decode_base64);
            let salt = attribute(attributes, &name("saltValue")).and_then(decode_base64);
            let spin_count = attribute(attributes, &name("spinCount"))
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0);

            return match (HashAlgorithm::from_name(algorithm_name), hash, salt) {
                (Some(algorithm), Some(hash), Some(salt)) => Some(PasswordVerifier::Hashed {
                    algorithm,
                    hash,
                    salt,
                    spin_count,
                }),
                _ => Some(PasswordVerifier::Unsupported(algorithm_name.to_string())),
            };
        }

        attribute(attributes, &name("password"))
            .and_then(|hex| u16::from_str_radix(hex.trim(), 16).ok())
            .map(PasswordVerifier::Legacy)
    }

    /// Check `password` against this verifier.
    ///
    /// # Returns
    /// `None` when the verifier uses an unsupported algorithm
    pub fn matches(&self, password: &str) -> Option<bool> {
        match self {
            PasswordVerifier::Legacy(expected) => Some(legacy_hash(password) == *expected),
            PasswordVerifier::Hashed {
                algorithm,
                hash,
                salt,
                spin_count,
            } => Some(iterated_hash(*algorithm, password, salt, *spin_count) == *hash),
            PasswordVerifier::Unsupported(_) => None,
        }
    }
}

fn decode_base64(value: &str) -> Option<Vec<u8>> {
    BASE64.decode(value.trim()).ok()
}

/// `prefixed("workbook", "hashValue")` is `workbookHashValue`
fn prefixed(prefix: &str, base: &str) -> String {
    if prefix.is_empty() {
        return base.to_string();
    }
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", prefix, first.to_ascii_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT_B64: &str = "AAECAwQFBgcICQoLDA0ODw==";

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_legacy_hash_known_values() {
        assert_eq!(legacy_hash(""), 0xCE4B);
        assert_eq!(legacy_hash("password"), 0x83AF);
        assert_eq!(legacy_hash("secret"), 0xDAA7);
        assert_eq!(legacy_hash("abc"), 0xCC1A);
    }

    #[test]
    fn test_iterated_hash_known_values() {
        let salt: Vec<u8> = (0u8..16).collect();

        let sha512 = iterated_hash(HashAlgorithm::Sha512, "secret", &salt, 10);
        assert_eq!(
            BASE64.encode(sha512),
            "CoBj8C4LJFOzosCJXdhEU4RdNsPlIhFCwkr+U7x3wbUjL+uH1qt3FIP83qh0VJlKuokE7RJwMheXqYN4Yc1sdQ=="
        );

        let sha256 = iterated_hash(HashAlgorithm::Sha256, "secret", &salt, 5);
        assert_eq!(BASE64.encode(sha256), "zu3slRS21KDGoR18qie29ptNzlkU1j1YfumdKDBJVIU=");

        let sha1 = iterated_hash(HashAlgorithm::Sha1, "secret", &salt, 3);
        assert_eq!(BASE64.encode(sha1), "S508t9DdJKQazZU0SrAEApBQpx0=");
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(HashAlgorithm::from_name("SHA-512"), Some(HashAlgorithm::Sha512));
        assert_eq!(HashAlgorithm::from_name("sha1"), Some(HashAlgorithm::Sha1));
        assert_eq!(HashAlgorithm::from_name("MD5"), None);
        assert_eq!(HashAlgorithm::Sha384.output_len(), 48);
    }

    #[test]
    fn test_sheet_verifier_from_attributes() {
        let attributes = attrs(&[
            ("algorithmName", "SHA-512"),
            (
                "hashValue",
                "CoBj8C4LJFOzosCJXdhEU4RdNsPlIhFCwkr+U7x3wbUjL+uH1qt3FIP83qh0VJlKuokE7RJwMheXqYN4Yc1sdQ==",
            ),
            ("saltValue", SALT_B64),
            ("spinCount", "10"),
            ("sheet", "1"),
        ]);

        let verifier = PasswordVerifier::from_attributes(&attributes, "").unwrap();
        assert_eq!(verifier.matches("secret"), Some(true));
        assert_eq!(verifier.matches("Secret"), Some(false));
    }

    #[test]
    fn test_workbook_verifier_uses_prefixed_names() {
        let attributes = attrs(&[("workbookPassword", "83AF"), ("lockStructure", "1")]);

        let verifier = PasswordVerifier::from_attributes(&attributes, "workbook").unwrap();
        assert_eq!(verifier, PasswordVerifier::Legacy(0x83AF));
        assert_eq!(verifier.matches("password"), Some(true));

        // The unprefixed name is not a workbook password
        assert!(PasswordVerifier::from_attributes(&attributes, "").is_none());
    }

    #[test]
    fn test_unsupported_algorithm() {
        let attributes = attrs(&[
            ("algorithmName", "MD5"),
            ("hashValue", "AAAA"),
            ("saltValue", SALT_B64),
            ("spinCount", "1"),
        ]);

        let verifier = PasswordVerifier::from_attributes(&attributes, "").unwrap();
        assert_eq!(verifier, PasswordVerifier::Unsupported("MD5".to_string()));
        assert_eq!(verifier.matches("anything"), None);
    }

    #[test]
    fn test_no_password_attributes() {
        let attributes = attrs(&[("sheet", "1"), ("objects", "1")]);
        assert!(PasswordVerifier::from_attributes(&attributes, "").is_none());
    }

    #[test]
    fn test_prefixed_names() {
        assert_eq!(prefixed("workbook", "hashValue"), "workbookHashValue");
        assert_eq!(prefixed("", "spinCount"), "spinCount");
    }
}
