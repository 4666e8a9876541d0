//! Stable fingerprints for kernel names.
//!
//! Names must agree between processes and toolchain versions, so this uses
//! FNV-1a rather than the std `DefaultHasher`.

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(fnv1a_init(), bytes)
}

/// Incremental FNV-1a over a sequence of fields.
///
/// Each field is followed by a separator byte so that `("ab", "c")` and
/// `("a", "bc")` hash differently.
pub struct FieldHasher {
    state: u64,
}

impl FieldHasher {
    pub fn new() -> Self {
        Self {
            state: fnv1a_init(),
        }
    }

    pub fn field(&mut self, value: &str) -> &mut Self {
        self.state = fnv1a_bytes(self.state, value.as_bytes());
        self.state = fnv1a_bytes(self.state, &[0x1f]);
        self
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for FieldHasher {
    fn default() -> Self {
        Self::new()
    }
}
