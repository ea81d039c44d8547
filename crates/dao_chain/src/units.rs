//! Address validation and native-currency unit conversion.

use std::str::FromStr;

use alloy_primitives::utils::{ParseUnits, format_units, parse_units};
use alloy_primitives::{Address, U256};

use crate::error::ChainError;

const ADDRESS_HEX_LEN: usize = 40;

/// Parse a `0x`-prefixed 20-byte hex address.
///
/// All-lowercase and all-uppercase input is accepted as-is; mixed-case input
/// must carry a valid EIP-55 checksum.
pub fn parse_address(input: &str) -> Result<Address, ChainError> {
    let invalid = |reason: &str| ChainError::InvalidAddress {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| invalid("missing 0x prefix"))?;

    if hex_part.len() != ADDRESS_HEX_LEN {
        return Err(invalid("expected 40 hex digits"));
    }
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("contains non-hex characters"));
    }

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(format!("0x{hex_part}"), None)
            .map_err(|_| invalid("bad EIP-55 checksum"));
    }

    Address::from_str(hex_part).map_err(|e| invalid(&e.to_string()))
}

/// Like [`parse_address`], but also rejects the zero address.
pub fn parse_nonzero_address(input: &str) -> Result<Address, ChainError> {
    let address = parse_address(input)?;
    if address.is_zero() {
        return Err(ChainError::InvalidAddress {
            input: input.to_string(),
            reason: "zero address".into(),
        });
    }
    Ok(address)
}

/// File stem used for an address on disk: lowercase hex, no prefix.
pub fn wallet_file_stem(address: &Address) -> String {
    hex::encode(address.as_slice())
}

/// Convert a display amount such as `"0.5"` into minimal integer units.
pub fn to_minimal_units(display: &str, decimals: u8) -> Result<U256, ChainError> {
    let trimmed = display.trim();
    let invalid = |reason: String| ChainError::InvalidAmount {
        input: display.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty amount".into()));
    }
    match parse_units(trimmed, decimals) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(invalid("amount must not be negative".into())),
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Render minimal units in display form with trailing zeros trimmed
/// (`500000000000000000` at 18 decimals becomes `"0.5"`). For reporting only.
pub fn to_display_units(amount: U256, decimals: u8) -> String {
    match format_units(amount, decimals) {
        Ok(formatted) => trim_fraction(&formatted),
        Err(_) => amount.to_string(),
    }
}

/// Display form followed by the currency symbol, e.g. `"0.5 ETH"`.
pub fn format_native(amount: U256, decimals: u8, symbol: &str) -> String {
    format!("{} {symbol}", to_display_units(amount, decimals))
}

fn trim_fraction(formatted: &str) -> String {
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted.to_string(),
    }
}

/// Total fee for `gas_units` at `price` per unit. Cannot overflow in 256 bits.
pub fn gas_cost(gas_units: u64, price: u128) -> U256 {
    U256::from(gas_units) * U256::from(price)
}

/// `balance - cost` when the balance strictly exceeds the cost.
pub fn spendable_after(balance: U256, cost: U256) -> Option<U256> {
    if balance > cost {
        balance.checked_sub(cost)
    } else {
        None
    }
}
