use crate::Hash;

/// Incremental blake3 hasher producing a [`Hash`].
///
/// All hashing in silo goes through this type so that the engine can be
/// swapped in one place.
#[derive(Clone)]
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update<A: AsRef<[u8]>>(mut self, data: A) -> Self {
        self.0.update(data.as_ref());
        self
    }

    pub fn write<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self {
        self.0.update(data.as_ref());
        self
    }

    pub fn finalize(self) -> Hash {
        Hash::from_bytes(*self.0.finalize().as_bytes())
    }

    pub fn hash<A: AsRef<[u8]>>(data: A) -> Hash {
        Self::new().update(data).finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
