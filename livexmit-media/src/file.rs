//! File-backed byte-stream media.
//!
//! Files have no pollable handle: they register nothing and the transfer
//! loop treats them as always ready. Reads block on the file itself.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

// ---

use mio::{Interest, Registry, Token};
use tracing::info;

// ---

use livexmit_domain::{Medium, Result, Source, Target, TransmitConfig, UriDescriptor, XmitError};

// ---

fn file_path(uri: &UriDescriptor) -> Result<PathBuf> {
    // ---
    match uri.path() {
        "" => Err(XmitError::config(format!("no file path in '{uri}'"))),
        p => Ok(PathBuf::from(p)),
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

pub struct FileSource {
    // ---
    uri: UriDescriptor,
    path: PathBuf,
    file: Option<File>,
    eof: bool,
}

impl FileSource {
    // ---

    pub fn open(uri: &UriDescriptor, _cfg: &TransmitConfig) -> Result<Self> {
        // ---
        let path = file_path(uri)?;
        let file = File::open(&path)
            .map_err(|e| XmitError::config(format!("cannot open {}: {e}", path.display())))?;
        info!(path = %path.display(), "reading file");

        Ok(Self {
            uri: uri.clone(),
            path,
            file: Some(file),
            eof: false,
        })
    }
}

impl Medium for FileSource {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        self.file.is_some() && !self.eof
    }

    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<bool> {
        Ok(false)
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }
}

impl Source for FileSource {
    // ---
    fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>> {
        // ---
        let Some(file) = self.file.as_mut() else {
            return Err(XmitError::EndOfStream(self.path.display().to_string()));
        };

        let mut buf = vec![0u8; max];
        let n = file.read(&mut buf)?;
        if n == 0 {
            self.eof = true;
            return Err(XmitError::EndOfStream(self.path.display().to_string()));
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    fn end(&self) -> bool {
        self.eof
    }
}

// ---------------------------------------------------------------------------
// FileTarget
// ---------------------------------------------------------------------------

pub struct FileTarget {
    // ---
    uri: UriDescriptor,
    file: Option<File>,
}

impl FileTarget {
    // ---

    pub fn open(uri: &UriDescriptor, _cfg: &TransmitConfig) -> Result<Self> {
        // ---
        let path = file_path(uri)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = File::create(&path)
            .map_err(|e| XmitError::config(format!("cannot create {}: {e}", path.display())))?;
        info!(path = %path.display(), "writing file");

        Ok(Self {
            uri: uri.clone(),
            file: Some(file),
        })
    }
}

impl Medium for FileTarget {
    // ---
    fn uri(&self) -> &UriDescriptor {
        &self.uri
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<bool> {
        Ok(false)
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut f) = self.file.take() {
            let _ = f.flush();
        }
    }
}

impl Target for FileTarget {
    // ---
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        // ---
        let file = self.file.as_mut().ok_or_else(|| XmitError::Transmission {
            step: "write",
            code: -1,
            message: "file closed".into(),
        })?;
        file.write_all(chunk).map_err(|e| XmitError::Transmission {
            step: "write",
            code: e.raw_os_error().unwrap_or(-1),
            message: e.to_string(),
        })
    }

    fn broken(&self) -> bool {
        self.file.is_none()
    }
}

impl Drop for FileTarget {
    // ---
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    #[test]
    fn copy_through_files() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ts");
        let output = dir.path().join("nested/out.ts");
        fs::write(&input, vec![0x47u8; 3000]).unwrap();

        let cfg = TransmitConfig::default();
        let src_uri = UriDescriptor::parse(&format!("file://{}", input.display())).unwrap();
        let tar_uri = UriDescriptor::parse(&format!("file://{}", output.display())).unwrap();

        let mut src = FileSource::open(&src_uri, &cfg).unwrap();
        let mut tar = FileTarget::open(&tar_uri, &cfg).unwrap();

        let mut sizes = Vec::new();
        loop {
            match src.read(1316) {
                Ok(Some(chunk)) => {
                    sizes.push(chunk.len());
                    tar.write(&chunk).unwrap();
                }
                Ok(None) => panic!("files always have data or end"),
                Err(XmitError::EndOfStream(_)) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        tar.close();

        assert_eq!(sizes, vec![1316, 1316, 368]);
        assert!(src.end());
        assert_eq!(fs::read(&output).unwrap(), vec![0x47u8; 3000]);
    }

    // ---

    #[test]
    fn missing_input_is_configuration_error() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let uri = UriDescriptor::parse(&format!("file://{}/absent.ts", dir.path().display())).unwrap();
        let err = FileSource::open(&uri, &TransmitConfig::default())
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, XmitError::Configuration(_)));
    }

    // ---

    #[test]
    fn file_media_never_register() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let uri = UriDescriptor::parse(&format!("file://{}/o.ts", dir.path().display())).unwrap();
        let mut tar = FileTarget::open(&uri, &TransmitConfig::default()).unwrap();

        let poll = mio::Poll::new().unwrap();
        let registered = tar
            .register(poll.registry(), Token(1), Interest::WRITABLE)
            .unwrap();
        assert!(!registered, "files are always ready and have nothing to register");
    }
}
