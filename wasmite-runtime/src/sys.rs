//! The system context: the file/stdio conduit surface a module instance
//! sees, materialized from the module configuration.
//!
//! This is deliberately a bare conduit interface, not an OS emulation: an
//! argv/envp pair, three standard streams, and preopened file-system
//! handles at descriptors 3 and up.

use {
    crate::instance::ExpectPoisoned,
    std::{
        collections::BTreeMap,
        fmt, io,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

/// A minimal read-only file-system handle for preopens. The sandbox layer
/// that would interpret paths on top of this is an external collaborator.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str) -> io::Result<Box<dyn io::Read + Send>>;
}

pub type FsHandle = Arc<dyn FileSystem>;

pub type SharedReader = Arc<Mutex<dyn io::Read + Send>>;
pub type SharedWriter = Arc<Mutex<dyn io::Write + Send>>;

pub fn reader(r: impl io::Read + Send + 'static) -> SharedReader {
    Arc::new(Mutex::new(r))
}

pub fn writer(w: impl io::Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(w))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SysError {
    #[error("args invalid: empty value")]
    EmptyArg,
    #[error("args invalid: contains NUL character")]
    NulInArg,
    #[error("environ invalid: empty key")]
    EmptyEnvKey,
    #[error("environ invalid: key contains '=' character")]
    EnvKeyContainsEq,
    #[error("environ invalid: contains NUL character")]
    NulInEnv,
}

/// A preopened file system and the guest path it is mounted at.
#[derive(Clone)]
pub struct FileEntry {
    pub path: String,
    pub fs:   FsHandle,
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry").field("path", &self.path).finish()
    }
}

/// The validated, immutable system context bound to one call context.
#[derive(Clone)]
pub struct SysContext {
    args:     Vec<String>,
    /// `key=value` entries, order preserved.
    environ:  Vec<String>,
    stdin:    SharedReader,
    stdout:   SharedWriter,
    stderr:   SharedWriter,
    /// Preopened file systems keyed by file descriptor, starting at 3.
    preopens: BTreeMap<u32, FileEntry>,
}

impl SysContext {
    /// Validates and assembles a context. Argument values are NUL-checked;
    /// environment keys must be nonempty and free of `=` and NUL, as the
    /// argv/envp vectors are NUL-terminated on the guest side.
    pub fn new(
        args: Vec<String>,
        environ: Vec<(String, String)>,
        stdin: Option<SharedReader>,
        stdout: Option<SharedWriter>,
        stderr: Option<SharedWriter>,
        preopens: BTreeMap<u32, FileEntry>,
    ) -> Result<SysContext, SysError> {
        for arg in &args {
            if arg.is_empty() {
                return Err(SysError::EmptyArg);
            }
            if arg.contains('\0') {
                return Err(SysError::NulInArg);
            }
        }
        let mut joined = Vec::with_capacity(environ.len());
        for (key, value) in &environ {
            if key.is_empty() {
                return Err(SysError::EmptyEnvKey);
            }
            if key.contains('=') {
                return Err(SysError::EnvKeyContainsEq);
            }
            if key.contains('\0') || value.contains('\0') {
                return Err(SysError::NulInEnv);
            }
            joined.push(format!("{key}={value}"));
        }
        Ok(SysContext {
            args,
            environ: joined,
            stdin: stdin.unwrap_or_else(|| reader(io::empty())),
            stdout: stdout.unwrap_or_else(|| writer(io::sink())),
            stderr: stderr.unwrap_or_else(|| writer(io::sink())),
            preopens,
        })
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn environ(&self) -> &[String] {
        &self.environ
    }

    pub fn preopens(&self) -> &BTreeMap<u32, FileEntry> {
        &self.preopens
    }

    pub fn read_stdin(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdin.lock().expect_poisoned().read(buf)
    }

    pub fn write_stdout(&self, bytes: &[u8]) -> io::Result<()> {
        self.stdout.lock().expect_poisoned().write_all(bytes)
    }

    pub fn write_stderr(&self, bytes: &[u8]) -> io::Result<()> {
        self.stderr.lock().expect_poisoned().write_all(bytes)
    }
}

impl Default for SysContext {
    fn default() -> SysContext {
        SysContext {
            args:     Vec::new(),
            environ:  Vec::new(),
            stdin:    reader(io::empty()),
            stdout:   writer(io::sink()),
            stderr:   writer(io::sink()),
            preopens: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for SysContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysContext")
            .field("args", &self.args)
            .field("environ", &self.environ)
            .field("preopens", &self.preopens)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn env_key_validation() {
        let err = SysContext::new(
            vec![],
            vec![("".into(), "x".into())],
            None,
            None,
            None,
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, SysError::EmptyEnvKey);

        let err = SysContext::new(
            vec![],
            vec![("a=b".into(), "x".into())],
            None,
            None,
            None,
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, SysError::EnvKeyContainsEq);
    }

    #[test]
    fn environ_is_pair_joined_in_order() {
        let sys = SysContext::new(
            vec!["prog".into()],
            vec![("A".into(), "1".into()), ("B".into(), "2".into())],
            None,
            None,
            None,
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(sys.environ(), ["A=1", "B=2"]);
    }

    #[test]
    fn default_stdin_is_eof() {
        let sys = SysContext::default();
        let mut buf = [0u8; 8];
        assert_eq!(sys.read_stdin(&mut buf).unwrap(), 0);
    }
}
