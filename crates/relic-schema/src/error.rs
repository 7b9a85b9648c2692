use serde::Serialize;
use std::fmt;

///
/// ErrorList
///
/// Flat accumulator for schema validation failures. Validation reports
/// every violation in one pass instead of stopping at the first.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct ErrorList {
    errors: Vec<String>,
}

impl ErrorList {
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record one validation failure.
    pub fn add(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Fold another list's failures into this one.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate recorded failure messages.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    /// Collapse into a `Result`, failing if anything was recorded.
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorList {}

/// Record a formatted validation failure into an [`ErrorList`].
#[macro_export]
macro_rules! err {
    ($errs:expr, $($arg:tt)*) => {
        $errs.add(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_resolves_ok() {
        let errs = ErrorList::new();
        assert!(errs.is_empty());
        assert!(errs.result().is_ok());
    }

    #[test]
    fn recorded_failures_surface_in_display() {
        let mut errs = ErrorList::new();
        err!(errs, "field '{}' is bad", "x");
        err!(errs, "entity '{}' is worse", "Y");

        let err = errs.result().expect_err("non-empty list should fail");
        assert_eq!(err.len(), 2);

        let rendered = err.to_string();
        assert!(rendered.contains("2 error(s)"));
        assert!(rendered.contains("field 'x' is bad"));
        assert!(rendered.contains("entity 'Y' is worse"));
    }
}
