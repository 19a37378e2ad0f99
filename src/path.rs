// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Biome path grammar.
//!
//! Paths inside a biome follow the conventions of the biome's operating
//! system, not the host's. All functions here are purely lexical and select
//! their dialect from a [`Descriptor`]: POSIX-style slash paths for Linux and
//! macOS biomes, and the [`windows`] grammar for Windows biomes.
//!
//! # See Also
//!
//! - [Lexical File Names in Plan 9](https://9p.io/sys/doc/lexnames.html)

pub mod windows;

use crate::biome::{Descriptor, Os};

/// Join any number of path elements into a single path.
///
/// The result is cleaned as if by [`clean`]. However, if `elems` is empty or
/// all of its elements are empty, then an empty string is returned.
pub fn join(desc: &Descriptor, elems: &[&str]) -> String {
    match desc.os {
        Os::Windows => windows::join(elems),
        _ => join_slash(elems),
    }
}

/// Check if path is absolute under biome's dialect.
pub fn is_abs(desc: &Descriptor, path: &str) -> bool {
    match desc.os {
        Os::Windows => windows::is_abs(path),
        _ => path.starts_with('/'),
    }
}

/// Shortest path equivalent to `path` by purely lexical processing.
///
/// An empty path cleans to `"."`.
pub fn clean(desc: &Descriptor, path: &str) -> String {
    if path.is_empty() {
        return ".".into();
    }

    join(desc, &[path])
}

/// Replace each forward slash in `path` with the biome's separator.
///
/// Multiple slashes are replaced by multiple separators.
pub fn from_slash(desc: &Descriptor, path: &str) -> String {
    match desc.os {
        Os::Windows => windows::from_slash(path),
        _ => path.into(),
    }
}

/// Absolute representation of `path` inside a biome.
///
/// Relative paths are joined onto `work_dir`. The result is always cleaned,
/// but is not guaranteed to be the unique name of the file it refers to.
pub fn abs_path(desc: &Descriptor, work_dir: &str, path: &str) -> String {
    if is_abs(desc, path) {
        return clean(desc, path);
    }

    join(desc, &[work_dir, path])
}

fn join_slash(elems: &[&str]) -> String {
    match elems.iter().position(|elem| !elem.is_empty()) {
        Some(start) => lexical_clean(&elems[start..].join("/"), |c| c == b'/', '/'),
        None => String::new(),
    }
}

/// Lexically clean a path that carries no volume name.
///
/// Applies the following rules until nothing changes:
///
/// 1. Replace runs of separators with one separator.
/// 2. Eliminate `.` elements.
/// 3. Eliminate `..` elements along with the non-`..` element preceding them.
/// 4. Eliminate `..` elements that begin a rooted path.
///
/// Every separator in the output is `sep`. Returns `"."` when nothing is left.
pub(crate) fn lexical_clean(path: &str, is_sep: impl Fn(u8) -> bool, sep: char) -> String {
    let bytes = path.as_bytes();
    let len = bytes.len();
    let rooted = len > 0 && is_sep(bytes[0]);
    let mut out = String::with_capacity(len);
    let mut read = 0;
    let mut dotdot = 0;

    if rooted {
        out.push(sep);
        read = 1;
        dotdot = 1;
    }

    while read < len {
        let at_end = |idx: usize| idx == len || is_sep(bytes[idx]);
        if is_sep(bytes[read]) {
            read += 1;
        } else if bytes[read] == b'.' && at_end(read + 1) {
            read += 1;
        } else if bytes[read] == b'.' && bytes[read + 1] == b'.' && at_end(read + 2) {
            read += 2;
            if out.len() > dotdot {
                // INVARIANT: Backtrack to the previous separator, but never past `dotdot`.
                let mut write = out.len() - 1;
                while write > dotdot && out.as_bytes()[write] != sep as u8 {
                    write -= 1;
                }
                out.truncate(write);
            } else if !rooted {
                if !out.is_empty() {
                    out.push(sep);
                }
                out.push_str("..");
                dotdot = out.len();
            }
        } else {
            if (rooted && out.len() != 1) || (!rooted && !out.is_empty()) {
                out.push(sep);
            }
            let start = read;
            while read < len && !is_sep(bytes[read]) {
                read += 1;
            }
            out.push_str(&path[start..read]);
        }
    }

    if out.is_empty() {
        out.push('.');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use simple_test_case::test_case;

    const LINUX: Descriptor = Descriptor { os: Os::Linux };
    const WINDOWS: Descriptor = Descriptor { os: Os::Windows };

    #[test_case(LINUX, &[], ""; "linux no elements")]
    #[test_case(LINUX, &["", ""], ""; "linux all empty")]
    #[test_case(LINUX, &["a", "b", "c"], "a/b/c"; "linux three elements")]
    #[test_case(LINUX, &["a", "b/c"], "a/b/c"; "linux nested element")]
    #[test_case(LINUX, &["a", ""], "a"; "linux trailing empty")]
    #[test_case(LINUX, &["", "a"], "a"; "linux leading empty")]
    #[test_case(WINDOWS, &["a", "b", "c"], r"a\b\c"; "windows three elements")]
    #[test_case(WINDOWS, &["a", r"b\c"], r"a\b\c"; "windows nested element")]
    #[test_case(WINDOWS, &["a", ""], "a"; "windows trailing empty")]
    #[test_case(WINDOWS, &["", "a"], "a"; "windows leading empty")]
    #[test_case(WINDOWS, &["a", "b/c"], r"a\b\c"; "windows slash element")]
    #[test]
    fn join_dialect(desc: Descriptor, elems: &[&str], expect: &str) {
        pretty_assertions::assert_eq!(join(&desc, elems), expect);
    }

    #[test_case(LINUX, "", "."; "linux empty")]
    #[test_case(LINUX, "a/c", "a/c"; "linux already clean")]
    #[test_case(LINUX, "a//c", "a/c"; "linux doubled slash")]
    #[test_case(LINUX, "a/c/.", "a/c"; "linux trailing dot")]
    #[test_case(LINUX, "a/c/b/..", "a/c"; "linux trailing dotdot")]
    #[test_case(LINUX, "/../a/c", "/a/c"; "linux dotdot above root")]
    #[test_case(LINUX, "/../a/b/../././/c", "/a/c"; "linux combination")]
    #[test_case(LINUX, "../../a", "../../a"; "linux leading dotdots")]
    #[test_case(WINDOWS, "", "."; "windows empty")]
    #[test_case(WINDOWS, r"a\\c", r"a\c"; "windows doubled separator")]
    #[test_case(WINDOWS, r"a\c\b\..", r"a\c"; "windows trailing dotdot")]
    #[test_case(WINDOWS, r"\..\a\b\..\.\.\\c", r"\a\c"; "windows combination")]
    #[test_case(WINDOWS, "/../a/b/../././/c", r"\a\c"; "windows slash combination")]
    #[test]
    fn clean_dialect(desc: Descriptor, path: &str, expect: &str) {
        pretty_assertions::assert_eq!(clean(&desc, path), expect);
    }

    #[test]
    fn join_differs_from_clean_on_empty() {
        pretty_assertions::assert_eq!(join(&LINUX, &[""]), "");
        pretty_assertions::assert_eq!(clean(&LINUX, ""), ".");
    }

    #[test_case(LINUX, "/home/user", true; "linux rooted")]
    #[test_case(LINUX, "home/user", false; "linux relative")]
    #[test_case(WINDOWS, r"C:\Users", true; "windows drive absolute")]
    #[test_case(WINDOWS, r"\Users", false; "windows rootless drive")]
    #[test]
    fn is_abs_dialect(desc: Descriptor, path: &str, expect: bool) {
        pretty_assertions::assert_eq!(is_abs(&desc, path), expect);
    }

    #[test]
    fn from_slash_dialect() {
        pretty_assertions::assert_eq!(from_slash(&LINUX, "a/b//c"), "a/b//c");
        pretty_assertions::assert_eq!(from_slash(&WINDOWS, "a/b//c"), r"a\b\\c");
    }

    #[test_case(LINUX, "/work", "src/main.rs", "/work/src/main.rs"; "linux relative joins work")]
    #[test_case(LINUX, "/work", "/etc/../tmp", "/tmp"; "linux absolute is cleaned")]
    #[test_case(WINDOWS, r"C:\work", "src/lib.rs", r"C:\work\src\lib.rs"; "windows relative joins work")]
    #[test_case(WINDOWS, r"C:\work", r"D:\tmp\.", r"D:\tmp"; "windows absolute is cleaned")]
    #[test]
    fn abs_path_in_work_dir(desc: Descriptor, work: &str, path: &str, expect: &str) {
        pretty_assertions::assert_eq!(abs_path(&desc, work, path), expect);
    }
}
