//! Merging per-chunk files into one artifact.
//!
//! Every merge writes to a temporary file next to the destination and
//! renames it into place only once the whole artifact has been written.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// Stack tabular files under the first file's header.
///
/// Returns the number of data rows written. Blank lines are dropped. A
/// header that differs from the first one is logged and its rows are kept.
/// Fails with `InvalidData` if no input has a header, leaving `dest` as it was.
pub fn stack_tables(inputs: &[PathBuf], dest: &Path) -> io::Result<u64> {
    write_atomically(dest, |out| {
        let mut canonical: Option<Vec<u8>> = None;
        let mut rows = 0u64;
        let mut line = Vec::new();

        for input in inputs {
            let mut reader = BufReader::new(File::open(input)?);

            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                warn!("Skipping empty table: {}", input.display());
                continue;
            }

            let header = trim_eol(&line).to_vec();
            if let Some(expected) = &canonical {
                if *expected != header {
                    warn!(
                        "Header of {} differs from the first table; stacking anyway",
                        input.display()
                    );
                }
            } else {
                write_line(out, &header)?;
                canonical = Some(header);
            }

            loop {
                line.clear();
                if reader.read_until(b'\n', &mut line)? == 0 {
                    break;
                }
                let row = trim_eol(&line);
                if row.is_empty() {
                    continue;
                }
                write_line(out, row)?;
                rows += 1;
            }
        }

        if canonical.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "every input table is empty; no header to write",
            ));
        }
        Ok(rows)
    })
}

/// Append files byte for byte. Returns the number of bytes written.
pub fn concat_raw(inputs: &[PathBuf], dest: &Path) -> io::Result<u64> {
    write_atomically(dest, |out| {
        let mut total = 0u64;
        for input in inputs {
            let mut file = File::open(input)?;
            total += io::copy(&mut file, out)?;
        }
        Ok(total)
    })
}

fn write_atomically<F>(dest: &Path, write: F) -> io::Result<u64>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> io::Result<u64>,
{
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    let written = {
        let mut out = BufWriter::new(temp.as_file_mut());
        let written = write(&mut out)?;
        out.flush()?;
        written
    };
    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|e| e.error)?;

    Ok(written)
}

fn write_line<W: Write>(out: &mut W, line: &[u8]) -> io::Result<()> {
    out.write_all(line)?;
    out.write_all(b"\n")
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
