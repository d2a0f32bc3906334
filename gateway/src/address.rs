//! Address handling.
//!
//! Deposit addresses handed out by the platform are a shared hot-wallet
//! account plus a destination tag, written as `base<separator>tag`
//! (`rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh$12345`). The ledger only ever sees the
//! base address; the tag travels in the transaction's `SourceTag` /
//! `DestinationTag` fields.

use thiserror::Error;

use crate::config::ACCOUNT_ID_VERSION;

/// Length of a decoded account id including its version byte.
const ACCOUNT_ID_PAYLOAD_LEN: usize = 21;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address")]
    Empty,

    #[error("destination tag `{0}` is not a 32-bit unsigned integer")]
    InvalidTag(String),

    #[error("`{0}` is not a valid account address")]
    InvalidBase(String),
}

/// An address split into its ledger account and optional destination tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAddress {
    pub base: String,
    pub tag: Option<u32>,
}

/// Split `address` on `separator` into base address and tag.
///
/// Does not check the base address checksum; see [`validate`].
pub fn split(address: &str, separator: char) -> Result<SplitAddress, AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }

    match address.split_once(separator) {
        Some((base, tag)) => {
            if base.is_empty() {
                return Err(AddressError::Empty);
            }
            let tag = tag
                .parse::<u32>()
                .map_err(|_| AddressError::InvalidTag(tag.to_string()))?;
            Ok(SplitAddress {
                base: base.to_string(),
                tag: Some(tag),
            })
        }
        None => Ok(SplitAddress {
            base: address.to_string(),
            tag: None,
        }),
    }
}

/// Fully validate an address: tag syntax plus base58check of the account id.
pub fn validate(address: &str, separator: char) -> Result<SplitAddress, AddressError> {
    let split = split(address, separator)?;
    if !is_valid_account_id(&split.base) {
        return Err(AddressError::InvalidBase(split.base));
    }
    Ok(split)
}

/// `true` when `base` is a classic account address: Ripple base58 alphabet,
/// double-SHA256 checksum, version byte 0, 20-byte account id.
pub fn is_valid_account_id(base: &str) -> bool {
    if !base.starts_with('r') {
        return false;
    }
    match bs58::decode(base)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(Some(ACCOUNT_ID_VERSION))
        .into_vec()
    {
        Ok(payload) => payload.len() == ACCOUNT_ID_PAYLOAD_LEN,
        Err(_) => false,
    }
}

/// Re-join a base address and tag into the platform's address form.
pub fn join(base: &str, tag: Option<u32>, separator: char) -> String {
    match tag {
        Some(tag) => format!("{base}{separator}{tag}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    #[test]
    fn splits_tagged_address() {
        let split = split(&format!("{GENESIS}$42"), '$').unwrap();
        assert_eq!(split.base, GENESIS);
        assert_eq!(split.tag, Some(42));
    }

    #[test]
    fn untagged_address_has_no_tag() {
        let split = split(GENESIS, '$').unwrap();
        assert_eq!(split.base, GENESIS);
        assert_eq!(split.tag, None);
    }

    #[test]
    fn rejects_non_numeric_and_oversized_tags() {
        assert_eq!(
            split("rAbc$x1", '$'),
            Err(AddressError::InvalidTag("x1".into()))
        );
        assert!(matches!(
            split("rAbc$4294967296", '$'),
            Err(AddressError::InvalidTag(_))
        ));
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(split("  ", '$'), Err(AddressError::Empty));
        assert_eq!(split("$5", '$'), Err(AddressError::Empty));
    }

    #[test]
    fn validates_checksum() {
        assert!(is_valid_account_id(GENESIS));
        // One flipped character must fail the checksum.
        assert!(!is_valid_account_id("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTi"));
        assert!(!is_valid_account_id("not-an-address"));
        assert!(!is_valid_account_id(""));
    }

    #[test]
    fn validate_combines_tag_and_checksum() {
        assert!(validate(&format!("{GENESIS}$7"), '$').is_ok());
        assert!(matches!(
            validate("rBogus$7", '$'),
            Err(AddressError::InvalidBase(_))
        ));
    }

    #[test]
    fn join_inverts_split() {
        let joined = join(GENESIS, Some(9), '$');
        let split = split(&joined, '$').unwrap();
        assert_eq!(join(&split.base, split.tag, '$'), joined);
    }
}
