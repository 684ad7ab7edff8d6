//! Path resolution: walks a `/`-delimited name from the root, never following a symbolic link on
//! a non-terminal component.

use crate::error::{Error, Result};
use crate::file_entry::FileEntry;
use crate::volume::Volume;

pub(crate) fn resolve(volume: &Volume, path: &[u8]) -> Result<FileEntry> {
    let path = std::str::from_utf8(path).map_err(|_| Error::corrupt("path is not valid UTF-8"))?;

    let mut current = volume.root_file_entry()?;
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

    for (i, component) in components.iter().enumerate() {
        if !current.is_directory() {
            return Err(Error::NotFound(format!(
                "{component:?} has no parent directory in the path"
            )));
        }
        let next = current.sub_file_entry_by_utf8_name(component)?;
        let is_last = i + 1 == components.len();
        if !is_last && next.is_symbolic_link() {
            return Err(Error::NotFound(format!(
                "{component:?} is a symbolic link, not followed mid-path"
            )));
        }
        current = next;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    // Exercised end-to-end in volume.rs against a hand-built image; path splitting itself has no
    // branchy logic worth a unit test beyond the empty-component filter, covered implicitly by
    // the `/a//b/` style paths produced from real directory traversals.
}
