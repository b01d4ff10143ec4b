//! Jar and zip containers.
//!
//! Analysis and instrumentation both walk archives entry by entry and
//! dispatch on content, so a class stored under any name is still found and
//! archives nested in archives are opened recursively. Nested locations are
//! written `outer.jar@inner.jar@a/B.class`.

use crate::classfile::MAGIC;
use crate::result::{CoverageError, CoverageResult};
use byteorder::{BigEndian, ByteOrder};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Local file header signature, `PK\x03\x04`
const ZIP_MAGIC: u32 = 0x504B_0304;

/// Extensions of the archives found while walking a directory
pub const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "war", "ear", "zip"];

/// What a byte buffer holds, judged by its first four bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// A class file
    ClassFile,
    /// A jar or zip archive
    Archive,
    /// Anything else; left alone
    Other,
}

impl ContentType {
    /// Classify `bytes`
    #[must_use]
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() < 4 {
            return Self::Other;
        }
        match BigEndian::read_u32(bytes) {
            MAGIC => Self::ClassFile,
            ZIP_MAGIC => Self::Archive,
            _ => Self::Other,
        }
    }
}

/// One archive entry with its uncompressed content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name, `/`-separated; directories end with `/`
    pub name: String,
    /// Content; empty for directories
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    /// File entry
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Whether this entry is a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Location of this entry inside the archive at `archive`
    #[must_use]
    pub fn location(&self, archive: &str) -> String {
        format!("{archive}@{}", self.name)
    }
}

/// Whether `name` is part of a jar signature
///
/// Instrumented classes no longer match their signed digests, so signature
/// files are dropped from instrumented archives.
#[must_use]
pub fn is_signature_entry(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    [".SF", ".RSA", ".DSA", ".EC"]
        .iter()
        .any(|ext| upper.ends_with(ext))
}

/// Every entry of the archive in `bytes`, in stored order
pub fn read_entries(bytes: &[u8], location: &str) -> CoverageResult<Vec<ArchiveEntry>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| CoverageError::archive(location, e))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| CoverageError::archive(location, e))?;
        let name = file.name().to_string();
        let mut content = Vec::new();
        if !file.is_dir() {
            file.read_to_end(&mut content)
                .map_err(|e| CoverageError::archive(format!("{location}@{name}"), e))?;
        }
        entries.push(ArchiveEntry {
            name,
            bytes: content,
        });
    }
    Ok(entries)
}

/// Deflated archive holding `entries` in the given order
pub fn write_entries(entries: &[ArchiveEntry], location: &str) -> CoverageResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        if entry.is_dir() {
            writer
                .add_directory(entry.name.as_str(), entry_options())
                .map_err(|e| CoverageError::archive(location, e))?;
        } else {
            writer
                .start_file(entry.name.as_str(), entry_options())
                .map_err(|e| CoverageError::archive(location, e))?;
            writer.write_all(&entry.bytes)?;
        }
    }
    let cursor = writer
        .finish()
        .map_err(|e| CoverageError::archive(location, e))?;
    Ok(cursor.into_inner())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(
            ContentType::detect(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]),
            ContentType::ClassFile
        );
        assert_eq!(ContentType::detect(b"PK\x03\x04rest"), ContentType::Archive);
        assert_eq!(
            ContentType::detect(b"Manifest-Version: 1.0"),
            ContentType::Other
        );
        assert_eq!(ContentType::detect(b"PK"), ContentType::Other);
    }

    #[test]
    fn test_entries_survive_a_rewrite() {
        let entries = vec![
            ArchiveEntry::new("META-INF/", Vec::new()),
            ArchiveEntry::new("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec()),
            ArchiveEntry::new("a/B.class", vec![0xCA, 0xFE, 0xBA, 0xBE, 1, 2, 3]),
        ];
        let bytes = write_entries(&entries, "app.jar").unwrap();
        assert_eq!(ContentType::detect(&bytes), ContentType::Archive);

        let read = read_entries(&bytes, "app.jar").unwrap();
        assert_eq!(read, entries);
        assert!(read[0].is_dir());
        assert_eq!(read[2].location("app.jar"), "app.jar@a/B.class");
    }

    #[test]
    fn test_corrupt_archive_names_its_location() {
        let err = read_entries(b"PK\x03\x04 truncated", "lib/app.jar").unwrap_err();
        assert!(matches!(
            err,
            CoverageError::Archive { ref location, .. } if location == "lib/app.jar"
        ));
    }

    #[test]
    fn test_signature_entries() {
        assert!(is_signature_entry("META-INF/SIGNER.SF"));
        assert!(is_signature_entry("META-INF/signer.rsa"));
        assert!(is_signature_entry("META-INF/KEY.DSA"));
        assert!(is_signature_entry("META-INF/KEY.EC"));
        assert!(!is_signature_entry("META-INF/MANIFEST.MF"));
        assert!(!is_signature_entry("META-INF/services/x.SF"));
        assert!(!is_signature_entry("a/B.SF"));
    }
}
