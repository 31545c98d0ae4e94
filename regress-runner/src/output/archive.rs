// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `.tar.gz` bundles of testcase outputs, and extraction of downloaded log archives.

use crate::errors::ArchiveError;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::{
    fs,
    io::{self, BufWriter, Write},
};

/// Packs the directory `src_dir` into the `.tar.gz` file `output_file`, with every entry placed
/// under `base_name`.
///
/// The archive is written atomically: `output_file` either doesn't change or is complete.
pub fn create_tar_gz(
    src_dir: &Utf8Path,
    base_name: &str,
    output_file: &Utf8Path,
) -> Result<(), ArchiveError> {
    let create_error = |error| ArchiveError::Create {
        path: output_file.to_owned(),
        error,
    };

    AtomicFile::new(output_file, OverwriteBehavior::AllowOverwrite)
        .write(|file| {
            let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(base_name, src_dir)?;
            let mut writer = builder.into_inner()?.finish()?;
            writer.flush()
        })
        .map_err(|err| match err {
            atomicwrites::Error::Internal(err) | atomicwrites::Error::User(err) => {
                create_error(err)
            }
        })
}

/// Extracts the `.tar.gz` file `archive` into `dest_dir`, returning the extracted file paths.
///
/// Entries that would be written outside of `dest_dir` are skipped.
pub fn extract_tar_gz(
    archive: &Utf8Path,
    dest_dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, ArchiveError> {
    let extract_error = |error| ArchiveError::Extract {
        path: archive.to_owned(),
        error,
    };

    fs::create_dir_all(dest_dir).map_err(extract_error)?;
    let file = fs::File::open(archive).map_err(extract_error)?;
    let mut tar = tar::Archive::new(GzDecoder::new(io::BufReader::new(file)));

    let mut extracted = Vec::new();
    for entry in tar.entries().map_err(extract_error)? {
        let mut entry = entry.map_err(extract_error)?;
        let path_bytes = entry.path_bytes();
        let rel_path = std::str::from_utf8(&path_bytes)
            .map(Utf8PathBuf::from)
            .map_err(|_| ArchiveError::NonUtf8Entry {
                path: archive.to_owned(),
            })?;
        let is_file = entry.header().entry_type().is_file();
        if entry.unpack_in(dest_dir).map_err(extract_error)? && is_file {
            extracted.push(dest_dir.join(rel_path));
        }
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn bundle_and_extract() {
        let dir = Utf8TempDir::new().unwrap();
        let src = dir.path().join("tc1_sleep");
        fs::create_dir_all(src.join("initial_config")).unwrap();
        fs::write(src.join("app_sleep.log"), "line 1\n").unwrap();
        fs::write(src.join("initial_config/nm1_mapred-site.xml"), "<configuration/>").unwrap();

        let bundle = dir.path().join("testcase_01_sleep.tar.gz");
        create_tar_gz(&src, "tc1_sleep", &bundle).unwrap();

        let dest = dir.path().join("extracted");
        let mut files = extract_tar_gz(&bundle, &dest).unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![
                dest.join("tc1_sleep/app_sleep.log"),
                dest.join("tc1_sleep/initial_config/nm1_mapred-site.xml"),
            ]
        );
        assert_eq!(
            fs::read_to_string(dest.join("tc1_sleep/app_sleep.log")).unwrap(),
            "line 1\n"
        );
    }

    #[test]
    fn extract_missing_archive() {
        let dir = Utf8TempDir::new().unwrap();
        let err = extract_tar_gz(&dir.path().join("missing.tar.gz"), dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::Extract { .. }), "unexpected error: {err}");
    }
}
