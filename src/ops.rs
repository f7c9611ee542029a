//! The `ssr_runtime` extension: the complete runtime surface visible to
//! component code.
//!
//! Provides only what rendering needs:
//! - console.log/warn/error (captured per render, re-emitted via tracing)
//! - crypto.randomUUID, crypto.getRandomValues, crypto.subtle.digest
//! - atob, btoa
//! - the component registry and render entry point (bootstrap.js)
//!
//! There is no fs, net, env, or timer access.

use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};

// ============================================================================
// Console Output Capture
// ============================================================================

/// Captured console output from the sandboxed runtime
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.warns.is_empty() && self.errors.is_empty()
    }

    /// Re-emit captured lines through tracing, tagged with the component.
    pub fn emit(&self, component: &str) {
        for line in &self.logs {
            tracing::debug!(target: "ssr::console", component, "{}", line);
        }
        for line in &self.warns {
            tracing::warn!(target: "ssr::console", component, "{}", line);
        }
        for line in &self.errors {
            tracing::error!(target: "ssr::console", component, "{}", line);
        }
    }
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Crypto Ops
// ============================================================================

#[op2]
#[string]
pub fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2(fast)]
pub fn op_crypto_get_random_values(#[buffer] buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

#[op2]
#[buffer]
pub fn op_crypto_subtle_digest(
    #[string] algorithm: &str,
    #[buffer] data: &[u8],
) -> Result<Vec<u8>, Error> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    let result = match algorithm.to_uppercase().replace('-', "").as_str() {
        "SHA256" => Sha256::digest(data).to_vec(),
        "SHA384" => Sha384::digest(data).to_vec(),
        "SHA512" => Sha512::digest(data).to_vec(),
        _ => {
            return Err(anyhow!(
                "Unsupported algorithm: {}. Supported: SHA-256, SHA-384, SHA-512",
                algorithm
            ))
        }
    };

    Ok(result)
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> String {
    use base64::Engine;
    // btoa expects Latin-1, but we'll be lenient and accept UTF-8
    base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 in decoded data: {}", e))
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    ssr_runtime,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_crypto_subtle_digest,
        op_btoa,
        op_atob,
    ],
    esm_entry_point = "ext:ssr_runtime/bootstrap.js",
    esm = ["ext:ssr_runtime/bootstrap.js" = "src/bootstrap.js"],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_output_empty() {
        let mut output = ConsoleOutput::default();
        assert!(output.is_empty());
        output.warns.push("careful".into());
        assert!(!output.is_empty());
    }
}
