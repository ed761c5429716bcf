//! Cluster object naming
//!
//! Container and object names must fit in a DNS-1123 label. Names are
//! truncated by prefix so that a truncated name still reads as the original;
//! when two truncated names collide, the later one gets a deterministic hash
//! suffix derived from its full untruncated name.

use std::collections::HashSet;

/// Maximum length of a container name or DNS label
pub const MAX_NAME_LENGTH: usize = 63;

/// Length of the hex hash used for collision suffixes
const HASH_SUFFIX_LENGTH: usize = 8;

/// Truncate `name` to at most `limit` characters, keeping its prefix
///
/// A cut that lands on a `-` drops it so the result stays a valid label.
pub fn truncate_name(name: &str, limit: usize) -> String {
    if name.chars().count() <= limit {
        return name.to_string();
    }
    let prefix: String = name.chars().take(limit).collect();
    prefix.trim_end_matches('-').to_string()
}

/// Short deterministic hash of `input`
pub fn short_hash(input: &str) -> String {
    let hash = blake3::hash(input.as_bytes()).to_hex();
    hash.as_str()[..HASH_SUFFIX_LENGTH].to_string()
}

/// Truncate `name` and replace its tail with a hash of the full name
pub fn hashed_name(name: &str, limit: usize) -> String {
    suffixed_name(name, &short_hash(name), limit)
}

fn suffixed_name(name: &str, suffix: &str, limit: usize) -> String {
    let keep = limit.saturating_sub(suffix.len() + 1);
    let prefix: String = name.chars().take(keep).collect();
    let prefix = prefix.trim_end_matches('-');
    format!("{}-{}", prefix, suffix)
}

/// Allocates unique names within one pod
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a name that must not be reused
    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    /// Allocate a name for `full_name` within [`MAX_NAME_LENGTH`]
    ///
    /// Prefix truncation is used unless the result is already taken, in which
    /// case the name falls back to a hash suffix. Repeated allocations of the
    /// same name salt the hash with an ordinal until it is unused.
    pub fn allocate(&mut self, full_name: &str) -> String {
        let mut name = truncate_name(full_name, MAX_NAME_LENGTH);
        let mut ordinal = 0usize;
        while self.used.contains(&name) {
            name = if ordinal == 0 {
                hashed_name(full_name, MAX_NAME_LENGTH)
            } else {
                let salted = short_hash(&format!("{}#{}", full_name, ordinal));
                suffixed_name(full_name, &salted, MAX_NAME_LENGTH)
            };
            ordinal += 1;
        }
        self.used.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_are_untouched() {
        assert_eq!(truncate_name("runtime-build", MAX_NAME_LENGTH), "runtime-build");
    }

    #[test]
    fn test_truncation_keeps_prefix() {
        let long = "a".repeat(80);
        let truncated = truncate_name(&long, MAX_NAME_LENGTH);
        assert_eq!(truncated.len(), MAX_NAME_LENGTH);
        assert!(long.starts_with(&truncated));
    }

    #[test]
    fn test_hashed_name_is_deterministic_and_bounded() {
        let long = format!("{}-install", "x".repeat(70));
        let first = hashed_name(&long, MAX_NAME_LENGTH);
        let second = hashed_name(&long, MAX_NAME_LENGTH);
        assert_eq!(first, second);
        assert!(first.len() <= MAX_NAME_LENGTH);
        assert!(first.ends_with(&short_hash(&long)));
    }

    #[test]
    fn test_allocator_resolves_collisions() {
        let base = "c".repeat(70);
        let a = format!("{}-install", base);
        let b = format!("{}-compile", base);

        let mut allocator = NameAllocator::new();
        let first = allocator.allocate(&a);
        let second = allocator.allocate(&b);

        assert_eq!(first.len(), MAX_NAME_LENGTH);
        assert!(a.starts_with(&first));
        assert_ne!(first, second);
        assert!(second.len() <= MAX_NAME_LENGTH);
    }

    #[test]
    fn test_truncation_drops_trailing_dash() {
        let name = format!("{}-{}", "a".repeat(62), "tail");
        let truncated = truncate_name(&name, MAX_NAME_LENGTH);
        assert_eq!(truncated, "a".repeat(62));
        assert_eq!(truncate_name("http-debug-port", 5), "http");
    }

    #[test]
    fn test_allocator_repeated_name_stays_unique() {
        let mut allocator = NameAllocator::new();
        let names: Vec<_> = (0..4).map(|_| allocator.allocate("runtime-install")).collect();

        assert_eq!(names[0], "runtime-install");
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        for name in &names[1..] {
            assert!(name.starts_with("runtime-install-"));
            assert!(name.len() <= MAX_NAME_LENGTH);
        }
    }

    #[test]
    fn test_allocator_respects_reserved_names() {
        let mut allocator = NameAllocator::new();
        allocator.reserve("runtime");
        let name = allocator.allocate("runtime");
        assert_ne!(name, "runtime");
    }
}
