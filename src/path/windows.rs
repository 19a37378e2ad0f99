// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Windows path dialect.
//!
//! Lexical manipulation of Windows paths that works the same on every host.
//! Both `\` and `/` are accepted as separators on input, and `\` is always
//! produced on output. A path may begin with a __volume name__: either a drive
//! letter (`C:`) or a UNC prefix (`\\host\share`). Drive-relative paths
//! (`C:a`) are kept distinct from drive-absolute paths (`C:\a`).
//!
//! # See Also
//!
//! - [Naming Files, Paths, and Namespaces](https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file)

/// Canonical path separator.
pub const SEPARATOR: char = '\\';

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_slash(c: u8) -> bool {
    c == b'\\' || c == b'/'
}

/// Check if path names a reserved device, e.g., `NUL` or `con`.
pub fn is_reserved_name(path: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|reserved| path.eq_ignore_ascii_case(reserved))
}

/// Length of the leading volume name of path.
///
/// Returns 2 for a drive letter, the length of `\\host\share` for a UNC
/// prefix, and 0 if path carries no volume name.
pub fn volume_name_len(path: &str) -> usize {
    let bytes = path.as_bytes();
    let len = bytes.len();
    if len < 2 {
        return 0;
    }

    if bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return 2;
    }

    // INVARIANT: UNC is `\\` + host + separator + share, where the host may not
    // start with a separator or dot, and the share may not start with a dot.
    if len >= 5 && is_slash(bytes[0]) && is_slash(bytes[1]) && !is_slash(bytes[2]) && bytes[2] != b'.'
    {
        let mut idx = 3;
        while idx < len - 1 {
            if is_slash(bytes[idx]) {
                idx += 1;
                if is_slash(bytes[idx]) || bytes[idx] == b'.' {
                    break;
                }

                while idx < len && !is_slash(bytes[idx]) {
                    idx += 1;
                }

                return idx;
            }
            idx += 1;
        }
    }

    0
}

fn is_unc(path: &str) -> bool {
    volume_name_len(path) > 2
}

/// Check if path is absolute.
///
/// Only drive-absolute paths, rooted UNC paths, and reserved device names are
/// absolute. A leading separator without a volume name is not.
pub fn is_abs(path: &str) -> bool {
    if is_reserved_name(path) {
        return true;
    }

    let vol_len = volume_name_len(path);
    if vol_len == 0 {
        return false;
    }

    path.as_bytes().get(vol_len).is_some_and(|&c| is_slash(c))
}

/// Replace each forward slash with [`SEPARATOR`].
pub fn from_slash(path: &str) -> String {
    path.replace('/', "\\")
}

/// Shortest path equivalent to path by purely lexical processing.
///
/// Never resolves `..` above a volume root. A bare drive letter cleans to
/// `C:.`, and a bare UNC prefix is returned as-is.
pub fn clean(path: &str) -> String {
    let vol_len = volume_name_len(path);
    let (volume, rest) = path.split_at(vol_len);
    if rest.is_empty() {
        if vol_len > 1 && path.as_bytes()[1] != b':' {
            return from_slash(path);
        }

        return format!("{path}.");
    }

    let mut cleaned = from_slash(volume);
    cleaned.push_str(&super::lexical_clean(rest, is_slash, SEPARATOR));
    cleaned
}

/// Join path elements with [`SEPARATOR`] and clean the result.
///
/// Empty elements are skipped, and an empty string is returned if nothing is
/// left. Joining never produces a UNC path unless the first element is one.
pub fn join(elems: &[&str]) -> String {
    match elems.iter().position(|elem| !elem.is_empty()) {
        Some(start) => join_non_empty(&elems[start..]),
        None => String::new(),
    }
}

fn join_non_empty(elems: &[&str]) -> String {
    let head = elems[0];

    // INVARIANT: Keep `C:` relative to the current directory of its drive.
    if head.len() == 2 && head.as_bytes()[1] == b':' {
        let tail = elems[1..]
            .iter()
            .skip_while(|elem| elem.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\\");
        return clean(&format!("{head}{tail}"));
    }

    let joined = clean(&elems.join("\\"));
    if !is_unc(&joined) {
        return joined;
    }

    let head = clean(head);
    if is_unc(&head) {
        return joined;
    }

    // INVARIANT: Two non-UNC halves must not fuse into a UNC path.
    let tail = clean(&elems[1..].join("\\"));
    if head.ends_with(SEPARATOR) {
        format!("{head}{tail}")
    } else {
        format!("{head}{SEPARATOR}{tail}")
    }
}
