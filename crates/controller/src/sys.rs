use std::path::Path;

/// Free space in bytes on the filesystem holding `path`, reported to the
/// operator through `get_status`. Probe failures degrade to 0 rather than
/// failing the status command.
#[cfg(unix)]
pub fn free_disk_space(path: &Path) -> u64 {
    use std::{ffi::CString, os::unix::ffi::OsStrExt};

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return 0;
    };

    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return 0;
    }

    stats.f_bavail as u64 * stats.f_frsize as u64
}

#[cfg(not(unix))]
pub fn free_disk_space(_path: &Path) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn reports_nonzero_space_for_temp_dir() {
        assert!(free_disk_space(&std::env::temp_dir()) > 0);
    }

    #[cfg(unix)]
    #[test]
    fn missing_path_degrades_to_zero() {
        assert_eq!(free_disk_space(Path::new("/definitely/not/here")), 0);
    }
}
