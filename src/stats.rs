//! Optional CSV statistics about written documents.

use crate::error::Result;
use std::io::Write;
use std::path::Path;

const HEADER: &str = "objects,bytes,version,encrypted\n";

/// A summary of one written document.
#[derive(Debug, Copy, Clone)]
pub(crate) struct WriteStats {
    pub objects: usize,
    pub bytes: usize,
    pub version: (u8, u8),
    pub encrypted: bool,
}

/// Append a summary line to the stats file, creating it (with a header row)
/// on first use.
pub(crate) fn append(path: &Path, stats: &WriteStats) -> Result<()> {
    let fresh = !path.exists();

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    if fresh {
        file.write_all(HEADER.as_bytes())?;
    }

    writeln!(
        file,
        "{},{},{}.{},{}",
        stats.objects,
        stats.bytes,
        stats.version.0,
        stats.version.1,
        stats.encrypted,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_once() {
        let dir = std::env::temp_dir().join("pdfmill-stats-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stats.csv");
        let _ = std::fs::remove_file(&path);

        let stats = WriteStats {
            objects: 4,
            bytes: 1234,
            version: (1, 7),
            encrypted: false,
        };

        append(&path, &stats).unwrap();
        append(&path, &stats).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("objects,").count(), 1);
        assert_eq!(content.lines().count(), 3);

        let _ = std::fs::remove_file(&path);
    }
}
