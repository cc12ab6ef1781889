use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::Path;

use safety_alert_bot::signature;

/// Print the signature header value for a payload read from a file or stdin
pub fn handle_sign(secret: &str, payload: &Path) -> Result<()> {
    if secret.is_empty() {
        bail!("webhook secret must not be empty");
    }

    let body = if payload == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("Failed to read payload from stdin")?;
        body
    } else {
        std::fs::read(payload).with_context(|| format!("Failed to read {:?}", payload))?
    };

    println!("{}", signature::sign(&body, secret));
    Ok(())
}
