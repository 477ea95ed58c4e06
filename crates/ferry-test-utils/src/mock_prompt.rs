// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canned login code prompt.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ferry_core::{CodePrompt, FerryError};
use secrecy::SecretString;

/// Answers every login prompt with the same code, or reports that nobody can answer.
pub struct MockPrompt {
    code: Option<String>,
    asked: AtomicUsize,
}

impl MockPrompt {
    /// A prompt that always answers `code`.
    pub fn with_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            asked: AtomicUsize::new(0),
        }
    }

    /// A prompt with no operator behind it.
    pub fn non_interactive() -> Self {
        Self {
            code: None,
            asked: AtomicUsize::new(0),
        }
    }

    /// Number of times a code was requested.
    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodePrompt for MockPrompt {
    fn is_interactive(&self) -> bool {
        self.code.is_some()
    }

    async fn login_code(&self, _identity: &str) -> Result<SecretString, FerryError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.code
            .as_deref()
            .map(|c| SecretString::from(c.to_string()))
            .ok_or_else(|| FerryError::AuthRequired("no operator available".into()))
    }
}
