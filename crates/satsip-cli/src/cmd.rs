//! Host integrations backed by external programs: the `lightning:` URI
//! handler and the system clipboard.

use std::io::Write;
use std::process::{Command, Stdio};

use satsip_client::zap::{CapabilityError, Clipboard, UriOpener};

/// Run `program` with `args`, optionally feeding `stdin`. Fails on spawn
/// errors and non-zero exit.
fn run_cmd(program: &str, args: &[&str], stdin: Option<&str>) -> Result<(), CapabilityError> {
    let cmd_line = format!("{program} {}", args.join(" "));
    tracing::debug!("exec: {cmd_line}");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CapabilityError(format!("failed to execute {cmd_line}: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .map_err(|e| CapabilityError(format!("failed to write to {program}: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| CapabilityError(format!("failed to wait for {cmd_line}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CapabilityError(format!(
            "{cmd_line} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Try each `(program, args)` in turn until one succeeds.
fn run_first(candidates: &[(&str, &[&str])], stdin: Option<&str>) -> Result<(), CapabilityError> {
    let mut last = CapabilityError("no candidate program".into());
    for (program, args) in candidates {
        match run_cmd(program, args, stdin) {
            Ok(()) => return Ok(()),
            Err(e) => last = e,
        }
    }
    Err(last)
}

/// Opens URIs with the desktop's registered handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUriOpener;

impl UriOpener for SystemUriOpener {
    fn open(&self, uri: &str) -> Result<(), CapabilityError> {
        if cfg!(target_os = "macos") {
            run_cmd("open", &[uri], None)
        } else if cfg!(target_os = "windows") {
            run_cmd("cmd", &["/C", "start", "", uri], None)
        } else {
            run_cmd("xdg-open", &[uri], None)
        }
    }
}

const NO_ARGS: &[&str] = &[];

const XCLIP_ARGS: &[&str] = &["-selection", "clipboard"];
const XSEL_ARGS: &[&str] = &["--clipboard", "--input"];

const LINUX_CLIPBOARDS: &[(&str, &[&str])] = &[
    ("wl-copy", NO_ARGS),
    ("xclip", XCLIP_ARGS),
    ("xsel", XSEL_ARGS),
];

/// Copies text with whichever clipboard tool is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<(), CapabilityError> {
        if cfg!(target_os = "macos") {
            run_cmd("pbcopy", NO_ARGS, Some(text))
        } else if cfg!(target_os = "windows") {
            run_cmd("clip", NO_ARGS, Some(text))
        } else {
            run_first(LINUX_CLIPBOARDS, Some(text))
        }
    }
}
