use std::io::{Read, Seek};

use zip::ZipArchive;

use crate::XlsxError;

/// Uncompressed size limits applied while loading a package.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageLimits {
    /// Largest single part that will be inflated.
    pub max_part_bytes: u64,
    /// Largest sum of inflated parts.
    pub max_total_bytes: u64,
}

impl PackageLimits {
    pub const DEFAULT_MAX_PART_BYTES: u64 = 256 * 1024 * 1024;
    pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 512 * 1024 * 1024;
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: Self::DEFAULT_MAX_PART_BYTES,
            max_total_bytes: Self::DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// Running total of inflated bytes across one load.
#[derive(Debug)]
pub(crate) struct InflateBudget {
    limits: PackageLimits,
    used_bytes: u64,
}

impl InflateBudget {
    pub(crate) fn new(limits: PackageLimits) -> Self {
        Self {
            limits,
            used_bytes: 0,
        }
    }

    /// Read an entry into memory.
    ///
    /// The declared size is checked first, then the read is capped at the limit plus one byte so
    /// forged size metadata cannot inflate past it.
    pub(crate) fn read_entry<R: Read + Seek>(
        &mut self,
        archive: &mut ZipArchive<R>,
        name: &str,
    ) -> Result<Vec<u8>, XlsxError> {
        let file = archive.by_name(name)?;
        let declared_size = file.size();
        let max_part = self.limits.max_part_bytes;
        let remaining = self.limits.max_total_bytes.saturating_sub(self.used_bytes);

        if declared_size > max_part {
            return Err(XlsxError::PartTooLarge {
                part: name.to_string(),
                size: declared_size,
                max: max_part,
            });
        }
        if declared_size > remaining {
            return Err(self.package_too_large(declared_size));
        }

        let effective_max = max_part.min(remaining);
        let mut buf = Vec::new();
        file.take(effective_max.saturating_add(1))
            .read_to_end(&mut buf)?;

        let observed = buf.len() as u64;
        if observed > effective_max {
            if effective_max < max_part {
                return Err(self.package_too_large(observed));
            }
            return Err(XlsxError::PartTooLarge {
                part: name.to_string(),
                size: observed,
                max: max_part,
            });
        }

        self.used_bytes = self.used_bytes.saturating_add(observed);
        Ok(buf)
    }

    fn package_too_large(&self, next: u64) -> XlsxError {
        XlsxError::PackageTooLarge {
            total: self.used_bytes.saturating_add(next),
            max: self.limits.max_total_bytes,
        }
    }
}

/// Find the archive entry for an OPC part name.
///
/// Part names compare case-insensitively and some producers write a leading `/` or
/// backslashes; an exact match wins over an equivalent one.
pub(crate) fn find_entry<R: Read + Seek>(archive: &ZipArchive<R>, part: &str) -> Option<String> {
    let mut equivalent = None;
    for name in archive.file_names() {
        if name == part {
            return Some(name.to_string());
        }
        if equivalent.is_none() && part_names_equivalent(name, part) {
            equivalent = Some(name.to_string());
        }
    }
    equivalent
}

fn part_names_equivalent(entry: &str, part: &str) -> bool {
    let entry = entry.trim_start_matches(['/', '\\']);
    let part = part.trim_start_matches('/');
    entry.len() == part.len()
        && entry
            .bytes()
            .zip(part.bytes())
            .all(|(a, b)| a == b || (a == b'\\' && b == b'/') || a.eq_ignore_ascii_case(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Write};

    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default();
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn limits(max_part_bytes: u64, max_total_bytes: u64) -> PackageLimits {
        PackageLimits {
            max_part_bytes,
            max_total_bytes,
        }
    }

    #[test]
    fn reads_within_limits() {
        let bytes = build_zip(&[("a.txt", b"hello world")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut budget = InflateBudget::new(limits(11, 11));
        assert_eq!(budget.read_entry(&mut archive, "a.txt").unwrap(), b"hello world");
    }

    #[test]
    fn part_over_limit_is_rejected() {
        let bytes = build_zip(&[("a.txt", b"hello world")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut budget = InflateBudget::new(limits(10, 100));
        match budget.read_entry(&mut archive, "a.txt").unwrap_err() {
            XlsxError::PartTooLarge { part, size, max } => {
                assert_eq!((part.as_str(), size, max), ("a.txt", 11, 10));
            }
            other => panic!("expected PartTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn budget_spans_parts() {
        let bytes = build_zip(&[("a.txt", b"12345"), ("b.txt", b"67890")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut budget = InflateBudget::new(limits(100, 8));
        budget.read_entry(&mut archive, "a.txt").unwrap();
        match budget.read_entry(&mut archive, "b.txt").unwrap_err() {
            XlsxError::PackageTooLarge { total, max } => assert_eq!((total, max), (10, 8)),
            other => panic!("expected PackageTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn find_entry_prefers_exact_name() {
        let bytes = build_zip(&[
            ("XL\\Workbook.xml", b"equivalent"),
            ("xl/workbook.xml", b"exact"),
        ]);
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(find_entry(&archive, "xl/workbook.xml").as_deref(), Some("xl/workbook.xml"));
    }

    #[test]
    fn find_entry_accepts_equivalent_names() {
        let bytes = build_zip(&[("/XL/Workbook.xml", b"x")]);
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(find_entry(&archive, "xl/workbook.xml").as_deref(), Some("/XL/Workbook.xml"));
        assert_eq!(find_entry(&archive, "xl/styles.xml"), None);
    }
}
