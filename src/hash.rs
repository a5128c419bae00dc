use std::fmt;

/// 8 byte truncated blake3 hash of a canonical call signature.
///
/// This is the permanent identity of a node. It is a pure function of the
/// class name, the canonicalized plain data and the identifiers of referenced
/// nodes, so re-running the same logical construction in a fresh process
/// yields the same identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 8]);

impl NodeId {
    pub(crate) fn hash(signature: &str) -> Self {
        let digest = blake3::Hasher::new()
            .update(b"memograph:")
            .update(signature.as_bytes())
            .finalize();

        let mut id = [0u8; 8];
        id.copy_from_slice(&digest.as_bytes()[..8]);
        NodeId(id)
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 16];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).expect("hex digits are valid UTF-8")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}
