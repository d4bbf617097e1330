mod application;

use serde::Deserialize;

pub use application::*;

/// Deserialize an empty string as [None].
/// Configuration of the [Option] type cannot be represented directly in
/// the TOML defaults, so optional strings use `""` for [None].
pub fn deserialize_non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}
