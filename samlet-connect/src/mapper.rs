use crate::config::AttributePair;
use crate::RawAttributes;

/// Rename IdP-supplied attribute keys according to the provider's
/// attribute map. Keys without a mapping pass through unchanged, value
/// lists are never touched. Pure and order-independent over the key set.
pub fn apply_attribute_map(
    map: &[AttributePair],
    raw: &RawAttributes,
) -> RawAttributes {
    raw.iter()
        .map(|(name, values)| {
            let renamed = map
                .iter()
                .find(|pair| pair.external == *name)
                .map(|pair| pair.internal.clone())
                .unwrap_or_else(|| name.clone());
            (renamed, values.clone())
        })
        .collect()
}
