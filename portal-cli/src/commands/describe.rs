//! Describe command implementation

use anyhow::{Context, Result};
use portal_namespace::NamespaceSet;

pub fn execute(mask: &str, json: bool) -> Result<()> {
    let set = parse_mask(mask)?;

    if json {
        let names: Vec<_> = set.kinds().collect();
        println!("{}", serde_json::json!({ "bits": set.bits(), "names": names }));
    } else if set.is_empty() {
        println!("(none) {:#x}", set.bits());
    } else {
        println!("{set} {:#x}", set.bits());
    }

    Ok(())
}

/// Accepts `0x...`, a decimal number or namespace names. Unknown bits are dropped
fn parse_mask(mask: &str) -> Result<NamespaceSet> {
    let mask = mask.trim();

    let bits = if let Some(hex) = mask.strip_prefix("0x").or_else(|| mask.strip_prefix("0X")) {
        Some(u32::from_str_radix(hex, 16))
    } else if mask.bytes().all(|b| b.is_ascii_digit()) {
        Some(mask.parse::<u32>())
    } else {
        None
    };

    match bits {
        Some(bits) => {
            let bits = bits.with_context(|| format!("Invalid bitmask {mask:?}"))?;
            Ok(NamespaceSet::from_bits(bits).known())
        }
        None => Ok(mask.parse::<NamespaceSet>()?),
    }
}
