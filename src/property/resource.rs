//! File handle for one property with user/system fallback.

use crate::config::ReadConfig;
use crate::types::{Location, Locations};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use tracing::{debug, warn};

/// Why a location could not be opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpenFailure {
    /// No path configured or the file does not exist.
    Missing,
    /// The file exists but cannot be opened (permissions, I/O error).
    Denied,
}

/// The open file behind a property.
///
/// At most one of the two candidate files is open at a time. A location that
/// opened successfully stays preferred until it fails.
pub(crate) struct ReadableResource {
    key: String,
    locations: Locations,
    location: Location,
    file: Option<File>,
    /// Consecutive failed open attempts (both locations failing).
    failures: u32,
}

impl ReadableResource {
    pub fn new(key: &str, locations: Locations) -> Self {
        Self {
            key: key.to_string(),
            locations,
            location: Location::User,
            file: None,
            failures: 0,
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    /// Path of the location currently in use.
    pub fn path(&self) -> Option<&Path> {
        self.locations.get(self.location)
    }

    /// Opens the current location, falling back to the other one.
    ///
    /// Returns true if a file is open afterwards. When both locations fail the
    /// primary location is selected again for the next attempt.
    pub fn open(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }

        let first = self.location;
        let mut failed = Vec::with_capacity(2);
        for location in [first, first.other()] {
            match self.try_open(location) {
                Ok(file) => {
                    if self.failures > 0 {
                        debug!(
                            key = %self.key,
                            %location,
                            attempts = self.failures,
                            "property available again"
                        );
                    }
                    self.file = Some(file);
                    self.location = location;
                    self.failures = 0;
                    return true;
                }
                Err(reason) => failed.push((location, reason)),
            }
        }

        self.location = Location::User;
        self.failures += 1;
        // Once per failure streak
        if self.failures == 1 {
            warn!(key = %self.key, ?failed, "property file not available");
        } else {
            debug!(
                key = %self.key,
                attempt = self.failures,
                "property file still not available"
            );
        }
        false
    }

    fn try_open(&self, location: Location) -> std::result::Result<File, OpenFailure> {
        let Some(path) = self.locations.get(location) else {
            return Err(OpenFailure::Missing);
        };
        // A FIFO without a writer would block the registry thread in open
        let opened = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path);
        match opened {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(OpenFailure::Missing),
            Err(err) => {
                debug!(key = %self.key, path = %path.display(), %err, "cannot open property file");
                Err(OpenFailure::Denied)
            }
        }
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    #[cfg(test)]
    pub fn replace_file(&mut self, file: File) {
        self.file = Some(file);
    }

    /// Reads the file from its start into `buf`, returning the byte count.
    ///
    /// The buffer is sized to the reported length plus `limits.slack`. If the
    /// source yields more than it reported, reading continues with a growing
    /// buffer until it runs dry or `limits.max_read` is reached.
    pub fn read_into(&mut self, buf: &mut Vec<u8>, limits: &ReadConfig) -> io::Result<usize> {
        // A short-lived second handle makes virtual filesystems drop stale
        // cached content before the real read.
        let _nudge = self.path().and_then(|p| File::open(p).ok());

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "property file closed"))?;

        let max_read = limits.max_read.max(1);
        file.seek(SeekFrom::Start(0))?;
        let size = (file.metadata()?.len() as usize).min(max_read);
        let want = (size + limits.slack).min(max_read);
        if buf.len() < want {
            buf.resize(want, 0);
        }

        let mut total = read_some(file, &mut buf[..want])?;
        if total > size {
            loop {
                if total == buf.len() {
                    if buf.len() >= max_read {
                        warn!(key = %self.key, max_read, "property read truncated");
                        break;
                    }
                    let grown = (buf.len() * 2).min(max_read);
                    buf.resize(grown, 0);
                }
                let n = read_some(file, &mut buf[total..])?;
                if n == 0 {
                    break;
                }
                total += n;
            }
        }
        Ok(total)
    }
}

fn read_some(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn locations(dir: &TempDir) -> Locations {
        Locations::new(
            Some(dir.path().join("user.prop")),
            Some(dir.path().join("system.prop")),
        )
    }

    fn limits() -> ReadConfig {
        ReadConfig::default()
    }

    #[test]
    fn test_prefers_user_location() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("user.prop"), "u").unwrap();
        fs::write(dir.path().join("system.prop"), "s").unwrap();

        let mut res = ReadableResource::new("A.b", locations(&dir));
        assert!(res.open());
        assert_eq!(res.location(), Location::User);

        let mut buf = Vec::new();
        let n = res.read_into(&mut buf, &limits()).unwrap();
        assert_eq!(&buf[..n], b"u");
    }

    #[test]
    fn test_fallback_is_sticky_until_it_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("system.prop"), "s").unwrap();

        let mut res = ReadableResource::new("A.b", locations(&dir));
        assert!(res.open());
        assert_eq!(res.location(), Location::System);

        // User file appears, but the working fallback stays in use
        fs::write(dir.path().join("user.prop"), "u").unwrap();
        res.close();
        assert!(res.open());
        assert_eq!(res.location(), Location::System);

        // Fallback disappears: flip back to the user file
        fs::remove_file(dir.path().join("system.prop")).unwrap();
        res.close();
        assert!(res.open());
        assert_eq!(res.location(), Location::User);
    }

    #[test]
    fn test_both_missing_counts_streak_and_reverts() {
        let dir = TempDir::new().unwrap();
        let mut res = ReadableResource::new("A.b", locations(&dir));

        assert!(!res.open());
        assert!(!res.open());
        assert_eq!(res.failures(), 2);
        assert_eq!(res.location(), Location::User);
        assert!(!res.is_open());

        fs::write(dir.path().join("system.prop"), "s").unwrap();
        assert!(res.open());
        assert_eq!(res.failures(), 0);
    }

    #[test]
    fn test_reread_sees_new_content_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user.prop");
        fs::write(&path, "first").unwrap();

        let mut res = ReadableResource::new("A.b", locations(&dir));
        assert!(res.open());
        let mut buf = Vec::new();
        let n = res.read_into(&mut buf, &limits()).unwrap();
        assert_eq!(&buf[..n], b"first");

        fs::write(&path, "2nd").unwrap();
        let n = res.read_into(&mut buf, &limits()).unwrap();
        assert_eq!(&buf[..n], b"2nd");
    }

    #[test]
    fn test_read_bounded_by_max_read() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("user.prop"), vec![b'x'; 100]).unwrap();

        let mut res = ReadableResource::new("A.b", locations(&dir));
        assert!(res.open());
        let mut buf = Vec::new();
        let n = res
            .read_into(
                &mut buf,
                &ReadConfig {
                    slack: 31,
                    max_read: 16,
                },
            )
            .unwrap();
        assert_eq!(n, 16);
    }

    #[test]
    fn test_source_longer_than_reported_is_read_fully() {
        // procfs reports a zero length but has content
        let status = Path::new("/proc/self/status");
        if !status.exists() {
            return;
        }
        let mut res = ReadableResource::new(
            "Proc.status",
            Locations::new(Some(status.to_path_buf()), None),
        );
        assert!(res.open());

        let mut buf = Vec::new();
        let n = res
            .read_into(
                &mut buf,
                &ReadConfig {
                    slack: 4,
                    max_read: 1024 * 1024,
                },
            )
            .unwrap();
        assert!(n > 4);
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("Name:"));
    }

    #[test]
    fn test_fifo_without_writer_opens_immediately() {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("user.prop");
        let c_path = CString::new(fifo.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        let mut res = ReadableResource::new("A.b", locations(&dir));
        assert!(res.open());
        assert_eq!(res.location(), Location::User);
    }

    #[test]
    fn test_read_closed_resource_fails() {
        let dir = TempDir::new().unwrap();
        let mut res = ReadableResource::new("A.b", locations(&dir));
        let mut buf = Vec::new();
        assert!(res.read_into(&mut buf, &limits()).is_err());
    }
}
