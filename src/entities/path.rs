//! File-sequence path descriptor.
//!
//! A `Path` splits `"/shots/plate.0001.exr"` into directory `"/shots/"`,
//! base name `"plate."`, number `"0001"` (padding 4) and extension `".exr"`,
//! so any other frame of the sequence can be formatted with `get()`.
//! Movie files (`"clip.mov"`) simply have no number.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable (possibly frame-numbered) file path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path {
    directory: String,
    base_name: String,
    number: String,
    padding: usize,
    extension: String,
}

impl Path {
    /// Parse a path string.
    ///
    /// Trailing digits of the file stem become the frame number; the
    /// padding is taken from the digit count only when it has a leading zero.
    pub fn new(value: &str) -> Self {
        let split = value
            .rfind(|c| c == '/' || c == '\\')
            .map(|i| i + 1)
            .unwrap_or(0);
        let directory = value[..split].to_string();
        let file_name = &value[split..];

        let (stem, extension) = match file_name.rfind('.') {
            Some(i) if i > 0 => (&file_name[..i], file_name[i..].to_string()),
            _ => (file_name, String::new()),
        };

        let mut digit_start = stem.len();
        for (i, ch) in stem.char_indices().rev() {
            if ch.is_ascii_digit() {
                digit_start = i;
            } else {
                break;
            }
        }
        let base_name = stem[..digit_start].to_string();
        let number = stem[digit_start..].to_string();
        let padding = if number.len() > 1 && number.starts_with('0') {
            number.len()
        } else {
            0
        };

        Self {
            directory,
            base_name,
            number,
            padding,
            extension,
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_empty(&self) -> bool {
        self.base_name.is_empty() && self.number.is_empty() && self.extension.is_empty()
    }

    /// True when the file name carries a frame number.
    pub fn is_sequence(&self) -> bool {
        !self.number.is_empty()
    }

    /// Parsed frame number, if any.
    pub fn frame(&self) -> Option<i64> {
        self.number.parse().ok()
    }

    /// Full path for `frame` (`None` keeps the stored number).
    pub fn get(&self, frame: Option<i64>) -> String {
        let number = match frame {
            Some(n) if self.is_sequence() => {
                if self.padding > 0 {
                    format!("{:0width$}", n, width = self.padding)
                } else {
                    n.to_string()
                }
            }
            _ => self.number.clone(),
        };
        format!("{}{}{}{}", self.directory, self.base_name, number, self.extension)
    }

    /// Display form with the number replaced by `#` padding, e.g. `plate.####.exr`.
    pub fn sequence_string(&self) -> String {
        if !self.is_sequence() {
            return format!("{}{}", self.base_name, self.extension);
        }
        let hashes = "#".repeat(self.padding.max(1));
        format!("{}{}{}", self.base_name, hashes, self.extension)
    }

    /// Glob pattern matching every frame of the sequence.
    pub fn glob_pattern(&self) -> String {
        format!("{}{}*{}", self.directory, self.base_name, self.extension)
    }

    /// Scan the directory for frames of this sequence, returns `(first, last)`.
    pub fn detect_range(&self) -> Option<(i64, i64)> {
        if !self.is_sequence() {
            return None;
        }
        let pattern = self.glob_pattern();
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Invalid sequence pattern {}: {}", pattern, e);
                return None;
            }
        };

        let mut range: Option<(i64, i64)> = None;
        for entry in entries.flatten() {
            let candidate = Path::new(&entry.to_string_lossy());
            if candidate.base_name != self.base_name || candidate.extension != self.extension {
                continue;
            }
            if let Some(n) = candidate.frame() {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(n), hi.max(n)),
                    None => (n, n),
                });
            }
        }
        debug!("Sequence {} range: {:?}", self.sequence_string(), range);
        range
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get(None))
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path::new(value)
    }
}
