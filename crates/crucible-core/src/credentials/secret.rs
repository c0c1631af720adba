use rand::Rng;
use sha2::{Digest, Sha256};

const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
const GROUPS: usize = 4;
const GROUP_LEN: usize = 7;

fn base32_groups() -> String {
    let mut rng = rand::thread_rng();
    let groups: Vec<String> = (0..GROUPS)
        .map(|_| {
            (0..GROUP_LEN)
                .map(|_| BASE32_ALPHABET[rng.gen_range(0..BASE32_ALPHABET.len())] as char)
                .collect()
        })
        .collect();
    groups.join("-")
}

/// `<prefix>-xxxxxxx-xxxxxxx-xxxxxxx-xxxxxxx`, lowercase.
pub fn generate_platform_key(prefix: &str) -> String {
    format!("{}-{}", prefix, base32_groups()).to_lowercase()
}

/// `<prefix>-proxy-<groups>-<uuid>`, lowercase. The trailing uuid lets the
/// proxy find the record without scanning hashes.
pub fn generate_proxy_key(prefix: &str) -> String {
    format!(
        "{}-proxy-{}-{}",
        prefix,
        base32_groups(),
        uuid::Uuid::new_v4()
    )
    .to_lowercase()
}

pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_key_shape() {
        let key = generate_platform_key("sk-crucible");
        let rest = key.strip_prefix("sk-crucible-").unwrap();
        let groups: Vec<&str> = rest.split('-').collect();
        assert_eq!(groups.len(), GROUPS);
        assert!(groups.iter().all(|g| g.len() == GROUP_LEN));
        assert_eq!(key, key.to_lowercase());
    }

    #[test]
    fn proxy_keys_are_unique_and_hash_stably() {
        let a = generate_proxy_key("sk-crucible");
        let b = generate_proxy_key("sk-crucible");
        assert!(a.starts_with("sk-crucible-proxy-"));
        assert_ne!(a, b);
        assert_eq!(hash_secret(&a), hash_secret(&a));
        assert_ne!(hash_secret(&a), hash_secret(&b));
        assert_eq!(hash_secret(&a).len(), 64);
    }
}
