//! Error types for BMB chain operations.

use thiserror::Error;

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, BmsError>;

/// Failure of the underlying SPI transport itself.
///
/// Any of these means the bus, not the chain, is unusable; by convention the
/// call site treats them as fatal (device reset) rather than retrying.
#[derive(Error, Debug)]
pub enum SpiError {
    /// The exchange did not complete within the bounded wait
    #[error("SPI exchange timed out after {0} ms")]
    Timeout(u64),

    /// The SPI peripheral reported a hardware fault
    #[error("SPI bus fault")]
    Bus,

    /// I/O error from an OS-level SPI device
    #[error("SPI I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error kinds of a chain transaction, in ascending severity.
///
/// `Crc` and `CommandCounter` are chain-topology-explainable and are absorbed
/// and retried internally up to the configured attempt bounds. `Por`,
/// `WriteReject` and `Spi` imply a node- or bus-level problem beyond this
/// crate's authority and are always surfaced unchanged.
#[derive(Error, Debug)]
pub enum BmsError {
    /// A frame failed CRC validation, or a dual-port call could not prove
    /// full pack coverage
    #[error("frame failed CRC validation")]
    Crc,

    /// A reply's embedded command counter did not match the expected value
    #[error("command counter mismatch: expected {expected}, got {got}")]
    CommandCounter {
        /// Counter value the port expected
        expected: u8,
        /// Counter value embedded in the reply
        got: u8,
    },

    /// A node's counter reports zero: it lost power and reset, and must be
    /// fully reconfigured by the caller before normal operation resumes
    #[error("power-on reset detected in chain reply")]
    Por,

    /// The transport accepted the write but the node did not apply it
    #[error("write rejected by node {node}")]
    WriteReject {
        /// Chain index of the rejecting node
        node: usize,
    },

    /// The underlying transport failed or timed out
    #[error("SPI transport error: {0}")]
    Spi(#[from] SpiError),
}

impl BmsError {
    /// Whether the dispatch layer may absorb this error and retry after a
    /// topology re-probe. Everything else propagates to the caller unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BmsError::Crc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_crc_failures_are_recoverable() {
        assert!(BmsError::Crc.is_recoverable());
        assert!(!BmsError::CommandCounter { expected: 5, got: 4 }.is_recoverable());
        assert!(!BmsError::Por.is_recoverable());
        assert!(!BmsError::WriteReject { node: 0 }.is_recoverable());
        assert!(!BmsError::Spi(SpiError::Bus).is_recoverable());
    }
}
