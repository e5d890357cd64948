//! Execution environment pushed into a module before it runs.

use satsim_calldata::{BinaryReader, BinaryWriter, CalldataError};
use satsim_types::{Address, Network};

/// Block and caller context seen by a contract.
///
/// Encoded as: sender, origin (32 bytes each), block number (u64),
/// owner, contract address (32 bytes each), timestamp (u64), network id (u8).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    pub sender: Address,
    pub origin: Address,
    pub block_number: u64,
    /// Deployer of the contract
    pub owner: Address,
    pub address: Address,
    pub timestamp: u64,
    pub network: Network,
}

impl Environment {
    pub const ENCODED_LEN: usize = 32 * 4 + 8 * 2 + 1;

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(Self::ENCODED_LEN);
        writer
            .write_address(&self.sender)
            .write_address(&self.origin)
            .write_u64(self.block_number)
            .write_address(&self.owner)
            .write_address(&self.address)
            .write_u64(self.timestamp)
            .write_u8(self.network.id());
        writer.into_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self, CalldataError> {
        let mut reader = BinaryReader::new(data);
        let sender = reader.read_address()?;
        let origin = reader.read_address()?;
        let block_number = reader.read_u64()?;
        let owner = reader.read_address()?;
        let address = reader.read_address()?;
        let timestamp = reader.read_u64()?;
        let network_id = reader.read_u8()?;
        Ok(Self {
            sender,
            origin,
            block_number,
            owner,
            address,
            timestamp,
            // Unknown ids fall back to regtest
            network: Network::from_id(network_id).unwrap_or_default(),
        })
    }
}
