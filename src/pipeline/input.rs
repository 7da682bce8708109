//! Input resolution: turn user-supplied paths into a list of readable PDFs.
//!
//! Paths come from the command line or from an input-list file (one path per
//! line). Each candidate must exist, be a regular file, carry a `.pdf`
//! extension, and start with the `%PDF` magic bytes. Candidates that fail are
//! skipped with a warning; only an empty result is an error.

use crate::error::FormMergeError;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read an input-list file: one path per line, blank lines ignored.
pub fn read_input_list(path: &Path) -> Result<Vec<String>, FormMergeError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| FormMergeError::InputListUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// A candidate left out of the input set, with the reason.
#[derive(Debug)]
pub struct SkippedInput {
    pub candidate: String,
    pub reason: FormMergeError,
}

/// Outcome of [`resolve_inputs`]: accepted paths in input order, plus every
/// candidate that was dropped so callers can report them.
#[derive(Debug, Default)]
pub struct ResolvedInputs {
    pub paths: Vec<PathBuf>,
    pub skipped: Vec<SkippedInput>,
}

impl ResolvedInputs {
    /// The accepted paths, or [`FormMergeError::NoValidInputs`] when nothing
    /// survived.
    pub fn into_paths(self) -> Result<Vec<PathBuf>, FormMergeError> {
        if self.paths.is_empty() {
            return Err(FormMergeError::NoValidInputs {
                skipped: self.skipped.len(),
            });
        }
        Ok(self.paths)
    }
}

/// Sort candidates into readable PDF files and skipped entries.
pub fn resolve_inputs(candidates: &[String]) -> ResolvedInputs {
    let mut resolved = ResolvedInputs {
        paths: Vec::with_capacity(candidates.len()),
        skipped: Vec::new(),
    };

    for candidate in candidates {
        match check_candidate(Path::new(candidate)) {
            Ok(path) => {
                debug!("Accepted input {}", path.display());
                resolved.paths.push(path);
            }
            Err(reason) => {
                warn!("Skipping {}: {}", candidate, reason);
                resolved.skipped.push(SkippedInput {
                    candidate: candidate.clone(),
                    reason,
                });
            }
        }
    }

    resolved
}

/// Whether the path ends in `.pdf`, case-insensitively.
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Validate one candidate: existence, extension, readability, magic bytes.
pub fn check_candidate(path: &Path) -> Result<PathBuf, FormMergeError> {
    let owned = path.to_path_buf();

    if !path.is_file() {
        return Err(FormMergeError::FileNotFound { path: owned });
    }
    if !has_pdf_extension(path) {
        return Err(FormMergeError::NotAPdf { path: owned });
    }

    match File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(FormMergeError::NotAPdf { path: owned });
            }
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(FormMergeError::PermissionDenied { path: owned });
        }
        Err(_) => return Err(FormMergeError::FileNotFound { path: owned }),
    }

    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> String {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(has_pdf_extension(Path::new("a/B.PDF")));
        assert!(has_pdf_extension(Path::new("form.pdf")));
        assert!(!has_pdf_extension(Path::new("form.pdf.txt")));
        assert!(!has_pdf_extension(Path::new("pdf")));
    }

    #[test]
    fn invalid_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(dir.path(), "good.pdf", b"%PDF-1.7\n");
        let text = write_file(dir.path(), "notes.txt", b"%PDF-1.7\n");
        let fake = write_file(dir.path(), "fake.pdf", b"hello");
        let missing = dir.path().join("gone.pdf").to_string_lossy().into_owned();
        let folder = dir.path().to_string_lossy().into_owned();

        let resolved = resolve_inputs(&[
            text.clone(),
            missing.clone(),
            good.clone(),
            fake.clone(),
            folder,
        ]);

        assert_eq!(resolved.paths, vec![PathBuf::from(&good)]);
        let skipped: Vec<&str> = resolved.skipped.iter().map(|s| s.candidate.as_str()).collect();
        assert_eq!(skipped.len(), 4);
        assert_eq!(&skipped[..3], [text.as_str(), missing.as_str(), fake.as_str()]);
        assert!(matches!(
            resolved.skipped[0].reason,
            FormMergeError::NotAPdf { .. }
        ));
        assert!(matches!(
            resolved.skipped[1].reason,
            FormMergeError::FileNotFound { .. }
        ));
        assert!(resolved.skipped[1].reason.to_string().contains("gone.pdf"));
        assert_eq!(resolved.into_paths().unwrap(), vec![PathBuf::from(good)]);
    }

    #[test]
    fn nothing_valid_is_an_error() {
        let resolved = resolve_inputs(&["/no/such.pdf".to_string(), "x.doc".to_string()]);
        assert_eq!(resolved.skipped.len(), 2);
        let err = resolved.into_paths().unwrap_err();
        assert!(matches!(err, FormMergeError::NoValidInputs { skipped: 2 }));
    }

    #[test]
    fn input_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let list = write_file(dir.path(), "list.txt", b"a.pdf\n\n  b.pdf  \n\r\n");

        let entries = read_input_list(Path::new(&list)).unwrap();

        assert_eq!(entries, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn missing_input_list_is_reported() {
        let err = read_input_list(Path::new("/no/such/list.txt")).unwrap_err();
        assert!(matches!(err, FormMergeError::InputListUnreadable { .. }));
    }
}
