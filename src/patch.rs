use crate::address::{Address, AddressRange};

/// One guest instruction's worth of rewriting directives.
///
/// The body is an opaque directive encoding produced by the patcher; it is
/// only interpreted by the assembler layer when the patch is written into
/// an executable block.
#[derive(Debug, Clone)]
pub struct Patch {
    address: Address,
    size: u64,
    body: Box<[u8]>,
}

impl Patch {
    pub fn new(address: impl Into<Address>, size: u64, body: impl Into<Box<[u8]>>) -> Self {
        Self {
            address: address.into(),
            size,
            body: body.into(),
        }
    }

    /// Guest address of the rewritten instruction.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Guest instruction size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// First guest address past the rewritten instruction.
    pub fn end(&self) -> Address {
        self.address + self.size
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Guest interval rewritten by this patch.
    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.address, self.end())
    }
}

/// Guest range of an ordered basic block of patches, `None` when empty.
pub(crate) fn block_range(patches: &[Patch]) -> Option<AddressRange> {
    let first = patches.first()?;
    let last = patches.last()?;
    Some(AddressRange::new(first.address(), last.end()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_block_range() {
        let patches = vec![
            Patch::new(0x1000u64, 4, vec![]),
            Patch::new(0x1004u64, 4, vec![]),
            Patch::new(0x1008u64, 4, vec![]),
        ];

        assert_eq!(patches[1].range(), AddressRange::new(0x1004u64, 0x1008u64));
        assert_eq!(
            block_range(&patches),
            Some(AddressRange::new(0x1000u64, 0x100cu64))
        );
        assert_eq!(block_range(&[]), None);
    }
}
