use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};

use thiserror::Error;
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

fn io_error<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> ArchiveError + 'a {
    move |source| ArchiveError::Io {
        action,
        path: path.to_owned(),
        source,
    }
}

fn zip_error(path: &Path) -> impl FnOnce(ZipError) -> ArchiveError + '_ {
    move |source| ArchiveError::Zip {
        path: path.to_owned(),
        source,
    }
}

/// Zips the contents of `source` (not the directory itself) into `archive`.
///
/// An existing archive is replaced only once the new one is complete.
pub fn zip_dir(source: &Path, archive: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).map_err(io_error("creating", parent))?;
    }
    let partial = archive.with_extension("zip.partial");
    let file = File::create(&partial).map_err(io_error("creating", &partial))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir(&mut writer, source, "", options, &partial)?;
    writer.finish().map_err(zip_error(&partial))?;

    fs::rename(&partial, archive).map_err(io_error("replacing", archive))
}

fn add_dir(
    writer: &mut ZipWriter<BufWriter<File>>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
    archive: &Path,
) -> Result<(), ArchiveError> {
    let mut entries = fs::read_dir(dir)
        .map_err(io_error("reading", dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error("reading", dir))?;
    // Stable entry order keeps archives of identical trees identical.
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());
        let file_type = entry.file_type().map_err(io_error("inspecting", &path))?;
        if file_type.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(zip_error(archive))?;
            add_dir(writer, &path, &format!("{name}/"), options, archive)?;
        } else if file_type.is_file() {
            writer
                .start_file(name, options)
                .map_err(zip_error(archive))?;
            let mut input = BufReader::new(File::open(&path).map_err(io_error("opening", &path))?);
            io::copy(&mut input, writer).map_err(io_error("archiving", &path))?;
        }
    }
    Ok(())
}

/// Unpacks `archive` into `target`, creating it when missing.
pub fn extract(archive: &Path, target: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive).map_err(io_error("opening", archive))?;
    fs::create_dir_all(target).map_err(io_error("creating", target))?;
    ZipArchive::new(BufReader::new(file))
        .and_then(|mut zip| zip.extract(target))
        .map_err(zip_error(archive))
}
