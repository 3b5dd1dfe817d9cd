use std::fmt;
use std::io;
use std::path::Path;

use crate::SimgError;

/// Error reported by the command line tools: a message with a hint, plus
/// the underlying cause for `--debug` output.
#[derive(Debug)]
pub struct CliError {
    pub msg: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Format a user friendly I/O error message with suggestions.
pub fn format_io_error(operation: &str, path: &Path, err: &io::Error) -> String {
    use io::ErrorKind::*;
    let suggestion = match err.kind() {
        NotFound => "Check that the file exists and the path is correct.",
        PermissionDenied => "Check permissions or run as a different user.",
        UnexpectedEof => "File appears truncated or corrupted.",
        WriteZero => "Disk may be full. Free up space and try again.",
        Other if err.raw_os_error() == Some(28) => "Disk may be full. Free up space and try again.",
        _ => "Check permissions or free up disk space.",
    };
    format!(
        "Error {} '{}': {}. {}",
        operation,
        path.display(),
        err,
        suggestion
    )
}

/// Convert an I/O error into a CLI error with context.
pub fn io_cli_error(operation: &str, path: &Path, err: io::Error) -> CliError {
    CliError {
        msg: format_io_error(operation, path, &err),
        source: Some(Box::new(err)),
    }
}

/// Attach the operation and path to an I/O error, keeping its kind.
pub fn io_error(operation: &str, path: &Path, err: io::Error) -> io::Error {
    io::Error::new(err.kind(), format_io_error(operation, path, &err))
}

pub fn simple_cli_error(msg: &str) -> CliError {
    CliError {
        msg: msg.to_string(),
        source: None,
    }
}

/// Convert a library error into a CLI error with a hint.
pub fn simg_cli_error(context: &str, err: SimgError) -> CliError {
    CliError {
        msg: format!("{}: {}", context, cli_hint(&err)),
        source: Some(Box::new(err)),
    }
}

/// Return an actionable hint for an error variant.
pub fn cli_hint(err: &SimgError) -> String {
    use SimgError::*;
    match err {
        Format(msg) => format!("{msg}. Check that the bmap file matches the image."),
        Xml(msg) => format!("{msg}. The bmap file is not valid XML."),
        ChecksumMismatch { .. } => format!("{err}. The image does not match its bmap file."),
        ShortRead { .. } => format!("{err}. The image file appears truncated."),
        Unaligned { .. } => format!("{err}. This is a bug."),
        WriterFinalized => format!("{err}. This is a bug."),
        Config(msg) => format!("{msg}. Invalid configuration."),
        SparseFormat(msg) => format!("{msg}. Verify the file is an Android sparse image."),
        Io(io) => format!("{io}"),
    }
}
