/// A single item that failed inside a best-effort loop
#[derive(Clone, Debug, PartialEq)]
pub struct ItemFailure {
    /// What was being processed (file name, blob path, ...)
    pub item: String,

    /// Human readable reason
    pub reason: String,
}

/// Outcome of a best-effort loop over independent items
///
/// Successes keep input order. Failures are collected instead of aborting the
/// loop, and the caller decides whether a partial result is acceptable.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchResult<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<ItemFailure>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        BatchResult {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&mut self, value: T) {
        self.succeeded.push(value);
    }

    pub fn push_err(&mut self, item: impl Into<String>, reason: impl ToString) {
        self.failed.push(ItemFailure {
            item: item.into(),
            reason: reason.to_string(),
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

impl<T> FromIterator<Result<T, ItemFailure>> for BatchResult<T> {
    fn from_iter<I: IntoIterator<Item = Result<T, ItemFailure>>>(iter: I) -> Self {
        let mut batch = BatchResult::new();
        for outcome in iter {
            match outcome {
                Ok(value) => batch.succeeded.push(value),
                Err(failure) => batch.failed.push(failure),
            }
        }
        batch
    }
}
