use std::fmt;
use std::panic::Location;

use serde::{Serialize, Serializer};

/// Static location that identifies a kernel region.
///
/// Two textually distinct call sites never compare equal, even when they
/// launch identical iteration spaces. Hand-named sites live in their own
/// key space and never match a source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallSite {
    Source {
        file: &'static str,
        line: u32,
        column: u32,
    },
    Named(&'static str),
}

impl CallSite {
    pub const fn new(file: &'static str, line: u32, column: u32) -> Self {
        Self::Source { file, line, column }
    }

    /// Site identified by name only, for kernels registered by hand.
    pub const fn named(name: &'static str) -> Self {
        Self::Named(name)
    }

    /// Location of the code calling the current function.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line(), location.column())
    }

    pub const fn file(&self) -> Option<&'static str> {
        match self {
            Self::Source { file, .. } => Some(*file),
            Self::Named(_) => None,
        }
    }

    pub const fn line(&self) -> Option<u32> {
        match self {
            Self::Source { line, .. } => Some(*line),
            Self::Named(_) => None,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { file, line, column } => write!(f, "{file}:{line}:{column}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl Serialize for CallSite {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The [`CallSite`] of the macro invocation.
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::CallSite::new(file!(), line!(), column!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_lines_are_distinct_sites() {
        let a = crate::call_site!();
        let b = crate::call_site!();
        assert_ne!(a, b);
        assert_eq!(a.file(), b.file());
    }

    #[test]
    fn caller_reports_this_file() {
        let site = CallSite::caller();
        assert!(site.file().is_some_and(|file| file.ends_with("call_site.rs")));
        assert!(site.line().is_some_and(|line| line > 0));
    }

    #[test]
    fn named_sites_display_their_name() {
        assert_eq!(CallSite::named("stencil").to_string(), "stencil");
        assert_eq!(CallSite::new("a.rs", 3, 7).to_string(), "a.rs:3:7");
        assert_eq!(CallSite::named("stencil").file(), None);
    }

    #[test]
    fn named_site_never_matches_a_source_location() {
        assert_ne!(CallSite::named("x"), CallSite::new("x", 0, 0));
        assert_ne!(CallSite::named("k.rs"), CallSite::new("k.rs", 1, 1));
    }
}
