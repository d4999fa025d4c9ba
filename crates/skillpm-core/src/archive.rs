//! Unpacking of downloaded skill archives (tar.gz, tgz, tar, zip)

use std::io::Cursor;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{IoContext, Result, SkillError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    TarGz,
    Tar,
    Zip,
}

fn detect_format(bytes: &[u8]) -> Option<ArchiveFormat> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        return Some(ArchiveFormat::TarGz);
    }
    if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
        return Some(ArchiveFormat::Zip);
    }
    if bytes.len() > 262 && &bytes[257..262] == b"ustar" {
        return Some(ArchiveFormat::Tar);
    }
    None
}

/// Unpack `bytes` into `dest` and return the skill root.
///
/// A single top-level directory (npm's `package/`, GitHub's `repo-sha/`)
/// is treated as the root.
pub fn unpack(reference: &str, bytes: &[u8], dest: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest).at(dest)?;

    let format = detect_format(bytes)
        .ok_or_else(|| SkillError::network(reference, "download is not a tar or zip archive"))?;
    let failed = |e: std::io::Error| {
        SkillError::network(reference, format!("failed to unpack archive: {e}"))
    };

    match format {
        ArchiveFormat::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));
            archive.unpack(dest).map_err(failed)?;
        }
        ArchiveFormat::Tar => {
            let mut archive = tar::Archive::new(Cursor::new(bytes));
            archive.unpack(dest).map_err(failed)?;
        }
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| SkillError::network(reference, format!("invalid zip archive: {e}")))?;
            archive.extract(dest).map_err(|e| {
                SkillError::network(reference, format!("failed to unpack archive: {e}"))
            })?;
        }
    }

    single_root(dest)
}

fn single_root(dest: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dest).at(dest)? {
        let entry = entry.at(dest)?;
        let name = entry.file_name();
        // macOS zip tooling adds this alongside the real root
        if name == "__MACOSX" {
            continue;
        }
        entries.push(entry.path());
    }
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dest.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn tar_gz(prefix: &str, files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{prefix}{name}"), body.as_bytes())
                .expect("append");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    #[test]
    fn strips_npm_package_prefix() {
        let bytes = tar_gz("package/", &[("SKILL.md", "---\nname: pdf\n---\n"), ("a/b.txt", "b")]);
        let dir = tempfile::tempdir().expect("tempdir");
        let root = unpack("pdf", &bytes, dir.path()).expect("unpack");
        assert_eq!(root, dir.path().join("package"));
        assert!(root.join("SKILL.md").exists());
        assert!(root.join("a/b.txt").exists());
    }

    #[test]
    fn flat_archive_uses_dest_as_root() {
        let bytes = tar_gz("", &[("SKILL.md", "x"), ("run.sh", "y")]);
        let dir = tempfile::tempdir().expect("tempdir");
        let root = unpack("flat", &bytes, dir.path()).expect("unpack");
        assert_eq!(root, dir.path());
    }

    #[test]
    fn unpacks_zip() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("skill/SKILL.md", options).expect("start");
            writer.write_all(b"---\nname: z\n---\n").expect("write");
            writer.finish().expect("finish");
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let root = unpack("z", cursor.get_ref(), dir.path()).expect("unpack");
        assert!(root.join("SKILL.md").exists());
    }

    #[test]
    fn rejects_non_archives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = unpack("x", b"<html>not found</html>", dir.path()).expect_err("should fail");
        assert!(matches!(err, SkillError::Network { .. }));
    }
}
