use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

/// Pretty JSON on stdout, newline terminated.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{text}").context("writing to stdout")?;
    Ok(())
}
