//! Conversions between fixed-size hashes and their `0x`-prefixed hex
//! renderings in the store.

use web3::types::{H160, H256};

use crate::components::store::StoreError;

pub fn h256_to_hex(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

// Like H256::from_slice, but returns an error instead of panicking when
// the input does not have the right length.
pub fn h256_from_hex(s: &str) -> Result<H256, StoreError> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| StoreError::Unknown(anyhow::anyhow!("invalid hex value `{}`: {}", s, e)))?;
    h256_from_bytes(&bytes)
}

pub fn h256_from_bytes(bytes: &[u8]) -> Result<H256, StoreError> {
    if bytes.len() != H256::len_bytes() {
        return Err(StoreError::Unknown(anyhow::anyhow!(
            "invalid H256 value `{}` has {} bytes instead of {}",
            hex::encode(bytes),
            bytes.len(),
            H256::len_bytes()
        )));
    }
    Ok(H256::from_slice(bytes))
}

pub fn h160_from_bytes(bytes: &[u8]) -> Result<H160, StoreError> {
    if bytes.len() != H160::len_bytes() {
        return Err(StoreError::Unknown(anyhow::anyhow!(
            "invalid H160 value `{}` has {} bytes instead of {}",
            hex::encode(bytes),
            bytes.len(),
            H160::len_bytes()
        )));
    }
    Ok(H160::from_slice(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h256_round_trips() {
        let hash = H256::repeat_byte(0xab);
        let hex = h256_to_hex(&hash);
        assert!(hex.starts_with("0x"));
        assert_eq!(h256_from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(h256_from_hex("0xabcd").is_err());
        assert!(h256_from_bytes(&[0u8; 31]).is_err());
        assert!(h160_from_bytes(&[0u8; 32]).is_err());
    }
}
