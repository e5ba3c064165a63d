use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::eyre;
use toml::Value;
use toml::map::{Entry, Map};

/// Layer `addition` over `target`. Tables merge key by key; any other value
/// replaces what was there, and the string `"null"` removes the key.
pub fn merge_tables(
    target: &mut Map<String, Value>,
    addition: Map<String, Value>,
    source_path: &Path,
) -> Result<()> {
    for (key, value) in addition {
        match value {
            Value::Table(table) => match target.entry(key.clone()) {
                Entry::Occupied(mut occ) => {
                    if let Value::Table(existing) = occ.get_mut() {
                        merge_tables(existing, table, source_path)?;
                    } else {
                        return Err(eyre!(
                            "'{key}' is a table in {} but a plain value in an earlier file",
                            source_path.display()
                        ));
                    }
                }
                Entry::Vacant(vac) => {
                    vac.insert(Value::Table(table));
                }
            },
            Value::String(raw) if raw.eq_ignore_ascii_case("null") => {
                target.remove(&key);
            }
            other => {
                target.insert(key, other);
            }
        }
    }

    Ok(())
}
