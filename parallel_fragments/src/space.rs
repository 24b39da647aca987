//! Free-space precondition checked before any output is created.

use std::io;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Reports the bytes available on the volume that would hold `path`.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the filesystem through `fs2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fs2Probe;

impl SpaceProbe for Fs2Probe {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(volume_dir(path))
    }
}

impl<F> SpaceProbe for F
where
    F: Fn(&Path) -> io::Result<u64> + Send + Sync,
{
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        self(path)
    }
}

/// The output file usually does not exist yet, so probe its directory.
fn volume_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Fails with [`PipelineError::InsufficientDiskSpace`] when the volume
/// holding `output` has less than `required` bytes free.
pub fn ensure_free_space(probe: &dyn SpaceProbe, output: &Path, required: u64) -> Result<()> {
    let available = probe.available_bytes(output)?;
    if available < required {
        return Err(PipelineError::InsufficientDiskSpace {
            required,
            available,
        });
    }
    Ok(())
}
