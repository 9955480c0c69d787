//! Core scalar types shared across the raidcore crates.

/// Logical block address.
pub type Lba = u64;

/// Number of blocks in a transfer.
pub type BlockCount = u64;

/// Drive position index within an array (0-based, < width).
pub type Position = u32;

/// Block operation opcode carried by a per-drive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Placeholder slot, never dispatched.
    Nop,
    Read,
    Write,
    WriteVerify,
    Verify,
    Zero,
    CheckZeroed,
}

impl Opcode {
    /// Whether this opcode modifies media. Cancelling one of these mid-flight
    /// on a redundant geometry can leave a stripe inconsistent.
    #[must_use]
    pub fn is_media_modify(self) -> bool {
        matches!(self, Self::Write | Self::WriteVerify | Self::Zero)
    }

    /// Whether this opcode reads user data back to the client.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Nop => "nop",
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteVerify => "write-verify",
            Self::Verify => "verify",
            Self::Zero => "zero",
            Self::CheckZeroed => "check-zeroed",
        };
        write!(f, "{name}")
    }
}

/// Priority a request carries down to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IoPriority {
    Low,
    #[default]
    Normal,
    Urgent,
}
