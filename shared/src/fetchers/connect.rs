//! Staging of PEM credentials for database clients that read them from disk.
//!
//! Certificates are written into a private temporary directory that is
//! removed when the [`StagedCredentials`] value is dropped, whether or not
//! the client that used them connected successfully.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// PEM credentials written to a scoped temporary directory.
#[derive(Debug, Default)]
pub struct StagedCredentials {
    dir: Option<TempDir>,
    /// CA certificate path.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate path.
    pub client_cert: Option<PathBuf>,
    /// Client key path.
    pub client_key: Option<PathBuf>,
}

impl StagedCredentials {
    /// Writes the given PEM blobs to files.
    ///
    /// Nothing touches the filesystem when all inputs are empty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or a file cannot be written.
    pub fn stage(
        ca_cert: Option<&str>,
        client_cert: Option<&str>,
        client_key: Option<&str>,
    ) -> io::Result<Self> {
        fn present(pem: Option<&str>) -> Option<&str> {
            pem.map(str::trim).filter(|p| !p.is_empty())
        }

        let (ca_cert, client_cert, client_key) =
            (present(ca_cert), present(client_cert), present(client_key));

        if ca_cert.is_none() && client_cert.is_none() && client_key.is_none() {
            return Ok(Self::default());
        }

        let dir = tempfile::Builder::new().prefix("lantern-tls-").tempdir()?;
        let write = |name: &str, pem: Option<&str>| -> io::Result<Option<PathBuf>> {
            pem.map(|pem| {
                let path = dir.path().join(name);
                fs::write(&path, format!("{pem}\n"))?;
                Ok(path)
            })
            .transpose()
        };

        let ca_cert = write("ca_cert.pem", ca_cert)?;
        let client_cert = write("client_cert.pem", client_cert)?;
        let client_key = write("client_cert_key.pem", client_key)?;

        tracing::debug!(dir = %dir.path().display(), "Staged TLS credentials");

        Ok(Self {
            dir: Some(dir),
            ca_cert,
            client_cert,
            client_key,
        })
    }

    /// The staging directory, if anything was staged.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }
}
