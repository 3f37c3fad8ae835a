//! Archive codec
//!
//! Export archives are zstd-compressed tar streams (`.tar.zst`) holding a
//! flat set of files: `metadata.json` plus a document file and an index file
//! per collection. Packing and unpacking are strictly sequential; memory use
//! is bounded by one copy buffer regardless of archive size.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

use crate::config::MAX_COMPRESSION_LEVEL;
use crate::error::{ArchiveError, Result};

/// File extension of export archives
pub const ARCHIVE_EXT: &str = ".tar.zst";

/// Short alias accepted for uploads
pub const ARCHIVE_EXT_SHORT: &str = ".tzst";

/// Whether a file name looks like an archive
pub fn is_archive_name(name: &str) -> bool {
    name.ends_with(ARCHIVE_EXT) || name.ends_with(ARCHIVE_EXT_SHORT)
}

/// Pack every regular file directly under `source_dir` into `output_path`
/// at maximum compression.
pub fn pack(source_dir: &Path, output_path: &Path) -> Result<u64> {
    pack_with_level(source_dir, output_path, MAX_COMPRESSION_LEVEL)
}

/// Pack with an explicit zstd level.
///
/// Entries are added in file-name order with zeroed mtimes, so packing the
/// same directory twice yields identical archives. Returns the archive size.
/// A partially written archive is removed on failure.
pub fn pack_with_level(source_dir: &Path, output_path: &Path, level: i32) -> Result<u64> {
    match pack_inner(source_dir, output_path, level) {
        Ok(size) => {
            debug!("Packed {} ({} bytes)", output_path.display(), size);
            Ok(size)
        }
        Err(e) => {
            let _ = fs::remove_file(output_path);
            Err(e)
        }
    }
}

fn pack_inner(source_dir: &Path, output_path: &Path, level: i32) -> Result<u64> {
    let mut files = Vec::new();
    let entries = fs::read_dir(source_dir).map_err(|e| {
        write_error(format!("read directory '{}': {e}", source_dir.display()))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| write_error(format!("read directory entry: {e}")))?;
        let file_type = entry
            .file_type()
            .map_err(|e| write_error(format!("stat '{}': {e}", entry.path().display())))?;
        if file_type.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let file = File::create(output_path)
        .map_err(|e| write_error(format!("create '{}': {e}", output_path.display())))?;
    let encoder = zstd::Encoder::new(BufWriter::new(file), level)
        .map_err(|e| write_error(format!("zstd encoder: {e}")))?;
    let mut builder = Builder::new(encoder);

    for (name, path) in &files {
        append_file(&mut builder, name, path)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| write_error(format!("tar finish: {e}")))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| write_error(format!("zstd finish: {e}")))?;
    writer
        .flush()
        .map_err(|e| write_error(format!("flush '{}': {e}", output_path.display())))?;
    drop(writer);

    let size = fs::metadata(output_path)
        .map_err(|e| write_error(format!("stat '{}': {e}", output_path.display())))?
        .len();
    Ok(size)
}

fn append_file<W: Write>(builder: &mut Builder<W>, name: &str, path: &Path) -> Result<()> {
    let mut file = File::open(path)
        .map_err(|e| write_error(format!("open '{}': {e}", path.display())))?;
    let size = file
        .metadata()
        .map_err(|e| write_error(format!("stat '{}': {e}", path.display())))?
        .len();

    let mut header = Header::new_gnu();
    header
        .set_path(name)
        .map_err(|e| write_error(format!("set path '{name}': {e}")))?;
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_entry_type(EntryType::Regular);
    header.set_cksum();

    builder
        .append(&header, &mut file)
        .map_err(|e| write_error(format!("append '{name}': {e}")))?;
    Ok(())
}

/// Extract every regular-file entry of `archive_path` into `output_dir`.
///
/// Directory and other non-file entries are skipped. Returns the extracted
/// names in archive order.
pub fn unpack(archive_path: &Path, output_dir: &Path) -> Result<Vec<String>> {
    let file = File::open(archive_path)
        .map_err(|e| read_error(format!("open '{}': {e}", archive_path.display())))?;
    let decoder = zstd::Decoder::new(BufReader::new(file))
        .map_err(|e| read_error(format!("zstd decoder: {e}")))?;
    let mut archive = Archive::new(decoder);

    let mut extracted = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| read_error(format!("read entries: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| read_error(format!("read entry: {e}")))?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }

        let raw_path = entry
            .path()
            .map_err(|e| read_error(format!("entry path: {e}")))?
            .into_owned();
        let name = flat_entry_name(&raw_path)?;

        let target = output_dir.join(&name);
        let mut out = BufWriter::new(File::create(&target)?);
        io::copy(&mut entry, &mut out)
            .map_err(|e| read_error(format!("extract '{name}': {e}")))?;
        out.flush()?;
        extracted.push(name);
    }

    debug!(
        "Unpacked {} entries from {}",
        extracted.len(),
        archive_path.display()
    );
    Ok(extracted)
}

/// Entry name as a single plain file name, or an error for anything that
/// could land outside the output directory.
fn flat_entry_name(path: &Path) -> Result<String> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(name.to_string_lossy().into_owned()),
        _ => Err(read_error(format!(
            "unsafe entry name '{}'",
            PathBuf::from(path).display()
        ))),
    }
}

fn read_error(msg: String) -> crate::error::TransferError {
    ArchiveError::Read(msg).into()
}

fn write_error(msg: String) -> crate::error::TransferError {
    ArchiveError::Write(msg).into()
}
