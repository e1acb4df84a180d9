use std::path::{Component, Path};

/// Reduces an untrusted file name to one safe path component.
///
/// Directory parts (either separator), `.`/`..`, drive prefixes and
/// control characters are dropped. Returns `None` when nothing usable is
/// left.
pub fn safe_file_name(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let last = Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            Component::Prefix(_) | Component::RootDir | Component::CurDir | Component::ParentDir => {
                None
            }
        })
        .next_back()?;

    let cleaned: String = last
        .to_string_lossy()
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}
