use std::fmt;

/// Stable identity of a document's text: the UTF-8 byte length, used as the
/// cheap proxy, plus an md5 digest for strict comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    size: u64,
    digest: String,
}

impl Fingerprint {
    pub fn of(content: &str) -> Self {
        Self {
            size: content.len() as u64,
            digest: format!("{:x}", md5::compute(content.as_bytes())),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn same_size(&self, remote_size: u64) -> bool {
        self.size == remote_size
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.size, self.digest)
    }
}
