//! Platform helpers for the journal files.

use std::path::Path;

/// Mark a file hidden where the platform supports an attribute for it.
///
/// On Unix the journal already hides itself through its dot-prefixed name.
#[cfg(not(windows))]
pub fn set_file_hidden(_path: &Path, _hidden: bool) -> std::io::Result<()> {
    Ok(())
}

#[cfg(windows)]
pub fn set_file_hidden(path: &Path, hidden: bool) -> std::io::Result<()> {
    use std::os::windows::ffi::OsStrExt;

    use winapi::um::fileapi::{GetFileAttributesW, SetFileAttributesW};
    use winapi::um::winnt::FILE_ATTRIBUTE_HIDDEN;

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    unsafe {
        let attrs = GetFileAttributesW(wide.as_ptr());
        if attrs == u32::MAX {
            return Err(std::io::Error::last_os_error());
        }
        let updated = if hidden {
            attrs | FILE_ATTRIBUTE_HIDDEN
        } else {
            attrs & !FILE_ATTRIBUTE_HIDDEN
        };
        if SetFileAttributesW(wide.as_ptr(), updated) == 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
