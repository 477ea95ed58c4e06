// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator prompt for the out-of-band login code.

use std::io::IsTerminal;

use async_trait::async_trait;
use ferry_core::{CodePrompt, FerryError};
use secrecy::SecretString;
use tracing::info;

/// Environment variable checked before prompting on the terminal.
pub const LOGIN_CODE_ENV: &str = "FERRY_LOGIN_CODE";

/// Reads the login code from `FERRY_LOGIN_CODE`, falling back to a hidden TTY prompt.
pub struct TtyPrompt {
    enabled: bool,
}

impl TtyPrompt {
    /// `enabled` mirrors `session.interactive`; when false the prompt never answers.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

fn code_from_env() -> Option<SecretString> {
    std::env::var(LOGIN_CODE_ENV)
        .ok()
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty())
        .map(SecretString::from)
}

#[async_trait]
impl CodePrompt for TtyPrompt {
    fn is_interactive(&self) -> bool {
        self.enabled && (std::env::var_os(LOGIN_CODE_ENV).is_some() || std::io::stdin().is_terminal())
    }

    async fn login_code(&self, identity: &str) -> Result<SecretString, FerryError> {
        if let Some(code) = code_from_env() {
            info!("using login code from {LOGIN_CODE_ENV}");
            return Ok(code);
        }
        if !self.is_interactive() {
            return Err(FerryError::AuthRequired(format!(
                "no terminal to read the login code for {identity}; set {LOGIN_CODE_ENV}"
            )));
        }

        let prompt = format!("Login code sent to {identity}: ");
        let code = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
            .await
            .map_err(|e| FerryError::Internal(format!("prompt task failed: {e}")))?
            .map_err(|e| FerryError::AuthRequired(format!("failed to read login code: {e}")))?;

        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(FerryError::AuthRequired("empty login code".into()));
        }
        Ok(SecretString::from(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    #[test]
    fn disabled_prompt_is_never_interactive() {
        assert!(!TtyPrompt::new(false).is_interactive());
    }

    #[tokio::test]
    #[serial]
    async fn env_code_takes_precedence() {
        // SAFETY: serialized with the other environment-mutating tests.
        unsafe { std::env::set_var(LOGIN_CODE_ENV, " 24680 ") };
        let prompt = TtyPrompt::new(true);
        assert!(prompt.is_interactive());
        let code = prompt.login_code("+15550001").await.unwrap();
        unsafe { std::env::remove_var(LOGIN_CODE_ENV) };
        assert_eq!(code.expose_secret(), "24680");
    }
}
