//! Path translation between the native path space and the shell path space.
//!
//! Service commands are written against native, drive-rooted paths
//! (`C:\Workdir\bin\tool`) but run under a POSIX shell that expects
//! `/c/Workdir/bin/tool`. The functions here convert in both directions and
//! rewrite the executable prefix of a command line.

/// Returns `true` for path separators accepted in drive-rooted paths.
fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

/// Splits `C:\rest` into the drive letter and the remainder starting at the
/// separator. Returns `None` when the input is not drive-rooted.
fn split_drive(path: &str) -> Option<(char, &str)> {
    let mut chars = path.char_indices();
    let (_, drive) = chars.next()?;
    let (_, colon) = chars.next()?;
    let (sep_idx, sep) = chars.next()?;
    if !drive.is_ascii_alphabetic() || colon != ':' || !is_separator(sep) {
        return None;
    }
    Some((drive, &path[sep_idx..]))
}

/// Returns `true` if `token` looks like a drive-rooted native path.
pub fn is_drive_rooted(token: &str) -> bool {
    split_drive(token).is_some()
}

/// Converts a drive-rooted native path into shell syntax.
///
/// `C:\Workdir\bin` becomes `/c/Workdir/bin`. Input that is not
/// drive-rooted is returned unchanged.
pub fn to_shell_path(native: &str) -> String {
    let Some((drive, rest)) = split_drive(native) else {
        return native.to_string();
    };
    let rest = rest.replace('\\', "/");
    let rest = rest.strip_prefix('/').unwrap_or(&rest);
    format!("/{}/{}", drive.to_ascii_lowercase(), rest)
}

/// Converts a `/x/rest` shell path into native syntax (`X:\rest`).
///
/// The root segment must be a single ASCII letter; anything else (`/1/x`,
/// `/é/x`, `/usr/...`) is returned unchanged.
pub fn to_native_path(shell: &str) -> String {
    let mut chars = shell.char_indices();
    let matched = match (chars.next(), chars.next(), chars.next()) {
        (Some((_, '/')), Some((_, drive)), Some((rest_idx, '/'))) if drive.is_ascii_alphabetic() => {
            Some((drive, &shell[rest_idx + 1..]))
        }
        _ => None,
    };
    match matched {
        Some((drive, rest)) => format!(
            "{}:\\{}",
            drive.to_ascii_uppercase(),
            rest.replace('/', "\\")
        ),
        None => shell.to_string(),
    }
}

/// Rewrites the executable of a command line into shell syntax.
///
/// Only the first whitespace-delimited token is considered; the remainder is
/// carried over verbatim. Commands whose first token is not drive-rooted are
/// returned unchanged.
pub fn normalize_command(cmd: &str) -> String {
    let trimmed = cmd.trim_start();
    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(idx) => (&trimmed[..idx], trimmed[idx..].trim_start()),
        None => (trimmed, ""),
    };
    if !is_drive_rooted(first) {
        return cmd.to_string();
    }
    format!("{} {}", to_shell_path(first), rest)
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_path_from_backslash_path() {
        assert_eq!(to_shell_path(r"C:\Workdir\bin\mysql_start"), "/c/Workdir/bin/mysql_start");
        assert_eq!(to_shell_path("D:/data/db"), "/d/data/db");
    }

    #[test]
    fn shell_path_passes_through_non_drive_paths() {
        assert_eq!(to_shell_path("/usr/bin/env"), "/usr/bin/env");
        assert_eq!(to_shell_path("relative\\path"), "relative\\path");
        assert_eq!(to_shell_path("C:"), "C:");
        assert_eq!(to_shell_path(""), "");
    }

    #[test]
    fn native_path_from_shell_path() {
        assert_eq!(to_native_path("/c/Workdir/bin/tool.exe"), r"C:\Workdir\bin\tool.exe");
        assert_eq!(to_native_path("/usr/bin/env"), "/usr/bin/env");
        assert_eq!(to_native_path("c/foo"), "c/foo");
        assert_eq!(to_native_path("///foo"), "///foo");
        assert_eq!(to_native_path("/1/x"), "/1/x");
        assert_eq!(to_native_path("/é/x"), "/é/x");
    }

    #[test]
    fn translation_round_trips() {
        for shell in ["/c/Workdir/bin/tool", "/d/a b/c", "/z/"] {
            assert_eq!(to_shell_path(&to_native_path(shell)), shell);
        }
        for native in [r"C:\Workdir\bin\tool", r"D:\a b\c", r"Z:\"] {
            assert_eq!(to_native_path(&to_shell_path(native)), native);
        }
        assert_eq!(to_native_path(&to_shell_path("E:/x/y")), r"E:\x\y");
    }

    #[test]
    fn normalize_rewrites_drive_rooted_executable() {
        assert_eq!(
            normalize_command(r"C:\Workdir\bin\mysql_start --port 3306"),
            "/c/Workdir/bin/mysql_start --port 3306"
        );
        assert_eq!(normalize_command(r"C:\Tools\run.exe"), "/c/Tools/run.exe");
    }

    #[test]
    fn normalize_keeps_remainder_intact() {
        assert_eq!(
            normalize_command(r"C:\bin\app   --name 'a  b'  C:\other"),
            r"/c/bin/app --name 'a  b'  C:\other"
        );
    }

    #[test]
    fn normalize_leaves_other_commands_alone() {
        assert_eq!(normalize_command("/usr/bin/foo --flag"), "/usr/bin/foo --flag");
        assert_eq!(normalize_command("npm run dev  "), "npm run dev  ");
        assert_eq!(normalize_command(""), "");
        assert_eq!(normalize_command("   "), "   ");
    }
}
