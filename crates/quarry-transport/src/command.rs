//! Remote command names and command-line construction.

pub const UPLOAD_PACK: &str = "git-upload-pack";
pub const RECEIVE_PACK: &str = "git-receive-pack";
pub const UPLOAD_ARCHIVE: &str = "git-upload-archive";

/// Quote `arg` for a POSIX shell: wrapped in single quotes, with embedded
/// single quotes written as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// `<command> '<repository path>'`
pub fn command_line(command: &str, repository_path: &str) -> String {
    format!("{command} {}", shell_quote(repository_path))
}
