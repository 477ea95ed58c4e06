// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source of out-of-band login codes.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::FerryError;

/// Supplies the code the identity provider sent out-of-band.
///
/// The TTY implementation lives in the binary; tests inject fakes.
#[async_trait]
pub trait CodePrompt: Send + Sync {
    /// False when no operator can answer, which makes bootstrap failure terminal.
    fn is_interactive(&self) -> bool;

    async fn login_code(&self, identity: &str) -> Result<SecretString, FerryError>;
}
