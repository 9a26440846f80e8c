/// Number of hex characters kept from the digest.
const ID_LEN: usize = 32;

/// A stable chunk identifier derived from `(file_path, ordinal)`.
///
/// The same pair always yields the same id, so re-indexing a file
/// overwrites its previous chunks in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(String);

impl ChunkId {
    /// # Examples
    ///
    /// ```
    /// use srcbert::ChunkId;
    ///
    /// let a = ChunkId::new("/tree/notes.md", 0);
    /// let b = ChunkId::new("/tree/notes.md", 0);
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 32);
    /// ```
    pub fn new(file_path: &str, ordinal: usize) -> Self {
        let digest = blake3::hash(format!("{file_path}:{ordinal}").as_bytes());
        let hex = digest.to_hex();
        Self(hex.as_str()[..ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ids for ordinals `from..to` of one file.
pub fn ids_in_range(file_path: &str, from: usize, to: usize) -> Vec<String> {
    (from..to)
        .map(|ordinal| ChunkId::new(file_path, ordinal).into_string())
        .collect()
}
