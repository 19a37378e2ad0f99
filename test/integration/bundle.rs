// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{read_archive, ArchiveEntry, TreeFixture};

use anyhow::Result;
use biome::{
    bundle::{bundle, Bundle, BundleError, BundleOptions, IGNORE_FILE_NAME},
    pattern::parse_lines,
    stamp::{Stamp, StampTable},
    tree::{DirTree, MemoryFile, MemoryTree},
};
use pretty_assertions::assert_eq;

fn run_bundle(fixture: &TreeFixture, prev_stamps: &StampTable) -> Result<(Vec<ArchiveEntry>, Bundle)> {
    let opts = BundleOptions {
        prev_stamps: prev_stamps.clone(),
        link_root: Some(fixture.path().into()),
        ..Default::default()
    };

    let mut out = Vec::new();
    let result = bundle(&mut out, &DirTree::new(fixture.path()), &opts)?;
    Ok((read_archive(&out)?, result))
}

fn stamp_paths(bundle: &Bundle) -> Vec<&str> {
    bundle.stamps.keys().map(String::as_str).collect()
}

#[test]
fn bundle_empty() -> Result<()> {
    let fixture = TreeFixture::new()?;
    let (entries, result) = run_bundle(&fixture, &StampTable::new())?;
    assert!(entries.is_empty());
    assert_eq!(result, Bundle::default());
    Ok(())
}

#[test]
fn bundle_empty_directory() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;

    let (entries, result) = run_bundle(&fixture, &StampTable::new())?;
    assert_eq!(entries, vec![ArchiveEntry::dir("foo/")]);
    assert_eq!(result.stamps["foo"].as_str(), "dir");
    Ok(())
}

#[test]
fn bundle_file() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;

    let (entries, result) = run_bundle(&fixture, &StampTable::new())?;
    let expect = vec![
        ArchiveEntry::dir("foo/"),
        ArchiveEntry::file("foo/bar.txt", "Hello, World!\n"),
    ];
    assert_eq!(entries, expect);
    assert_eq!(stamp_paths(&result), vec!["foo", "foo/bar.txt"]);
    assert!(result.to_remove.is_empty());
    Ok(())
}

#[test]
fn bundle_file_ignored() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    fixture.write("foo/zzz.txt", "Hello, World!\n")?;
    fixture.write(IGNORE_FILE_NAME, "/foo/bar.txt\n")?;

    let (entries, result) = run_bundle(&fixture, &StampTable::new())?;
    let expect = vec![
        ArchiveEntry::dir("foo/"),
        ArchiveEntry::file("foo/zzz.txt", "Hello, World!\n"),
    ];
    assert_eq!(entries, expect);
    assert_eq!(stamp_paths(&result), vec!["foo", "foo/zzz.txt"]);
    Ok(())
}

#[test]
fn bundle_directory_ignored() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    fixture.write("baz.txt", "Hello, World!\n")?;
    fixture.write(IGNORE_FILE_NAME, "foo/\n")?;

    let (entries, result) = run_bundle(&fixture, &StampTable::new())?;
    assert_eq!(entries, vec![ArchiveEntry::file("baz.txt", "Hello, World!\n")]);
    assert_eq!(stamp_paths(&result), vec!["baz.txt"]);
    Ok(())
}

#[test]
fn bundle_negated_rule_keeps_file() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("drop.txt", "a")?;
    fixture.write("keep.txt", "b")?;
    fixture.write("notes.md", "c")?;
    fixture.write(IGNORE_FILE_NAME, "*.txt\n!keep.txt\n")?;

    let (entries, _) = run_bundle(&fixture, &StampTable::new())?;
    let expect = vec![
        ArchiveEntry::file("keep.txt", "b"),
        ArchiveEntry::file("notes.md", "c"),
    ];
    assert_eq!(entries, expect);
    Ok(())
}

#[test]
fn bundle_global_rules_yield_to_local_rules() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("build.log", "a")?;
    fixture.write("keep.log", "b")?;
    fixture.write(IGNORE_FILE_NAME, "!keep.log\n")?;

    let opts = BundleOptions {
        global_ignore: parse_lines(b"*.log\n"),
        link_root: Some(fixture.path().into()),
        ..Default::default()
    };
    let mut out = Vec::new();
    bundle(&mut out, &DirTree::new(fixture.path()), &opts)?;

    assert_eq!(read_archive(&out)?, vec![ArchiveEntry::file("keep.log", "b")]);
    Ok(())
}

#[test]
fn bundle_file_unchanged() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::dir("foo/")]);
    assert_eq!(second.stamps, first.stamps);
    assert!(second.to_remove.is_empty());
    Ok(())
}

#[test]
fn bundle_file_changed() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("bar.txt", "Hello, World!\n")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.write("bar.txt", "Goodbye, World!\n")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::file("bar.txt", "Goodbye, World!\n")]);
    assert!(second.to_remove.is_empty());
    Ok(())
}

#[test]
fn bundle_file_created() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("old.txt", "old")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.write("new.txt", "new")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::file("new.txt", "new")]);
    assert_eq!(stamp_paths(&second), vec!["new.txt", "old.txt"]);
    Ok(())
}

#[test]
fn bundle_file_removed() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.remove("foo/bar.txt")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::dir("foo/")]);
    assert_eq!(second.to_remove, vec!["foo/bar.txt"]);
    Ok(())
}

#[test]
fn bundle_directory_turned_into_file() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.remove("foo")?;
    fixture.write("foo", "now a file")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::file("foo", "now a file")]);
    assert_eq!(second.to_remove, vec!["foo", "foo/bar.txt"]);
    Ok(())
}

#[test]
fn bundle_file_turned_into_directory() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("foo", "a file")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.remove("foo")?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    let expect = vec![
        ArchiveEntry::dir("foo/"),
        ArchiveEntry::file("foo/bar.txt", "Hello, World!\n"),
    ];
    assert_eq!(entries, expect);
    assert_eq!(second.to_remove, vec!["foo"]);
    Ok(())
}

#[cfg(unix)]
#[test]
fn bundle_symlink() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("foo")?;
    fixture.write("foo/bar.txt", "Hello, World!\n")?;
    fixture.write("top.txt", "top")?;
    fixture.symlink("link", "foo/bar.txt")?;
    fixture.symlink("foo/up", "../top.txt")?;

    let (entries, result) = run_bundle(&fixture, &StampTable::new())?;
    let expect = vec![
        ArchiveEntry::dir("foo/"),
        ArchiveEntry::file("foo/bar.txt", "Hello, World!\n"),
        ArchiveEntry::link("foo/up", "../top.txt"),
        ArchiveEntry::link("link", "foo/bar.txt"),
        ArchiveEntry::file("top.txt", "top"),
    ];
    assert_eq!(entries, expect);
    assert!(result.stamps["link"].as_str().contains('+'));
    assert!(result.to_remove.is_empty());
    Ok(())
}

#[cfg(unix)]
#[test]
fn bundle_symlink_through_parent_is_relative() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.mkdir("a/b")?;
    fixture.write("a/target.txt", "x")?;
    fixture.symlink("a/b/link", "./../../a/target.txt")?;

    let (entries, _) = run_bundle(&fixture, &StampTable::new())?;
    assert!(entries.contains(&ArchiveEntry::link("a/b/link", "../target.txt")));
    Ok(())
}

#[cfg(unix)]
#[test]
fn bundle_rewrite_symlink() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "a")?;
    fixture.write("bb.txt", "b")?;
    fixture.symlink("link", "a.txt")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.remove("link")?;
    fixture.symlink("link", "bb.txt")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::link("link", "bb.txt")]);
    assert_eq!(second.to_remove, vec!["link"]);
    Ok(())
}

#[cfg(unix)]
#[test]
fn bundle_replace_file_with_symlink() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "a")?;
    fixture.write("link", "plain file")?;
    let (_, first) = run_bundle(&fixture, &StampTable::new())?;

    fixture.remove("link")?;
    fixture.symlink("link", "a.txt")?;
    let (entries, second) = run_bundle(&fixture, &first.stamps)?;
    assert_eq!(entries, vec![ArchiveEntry::link("link", "a.txt")]);
    assert_eq!(second.to_remove, vec!["link"]);
    Ok(())
}

#[cfg(unix)]
#[test]
fn bundle_symlink_escape() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.symlink("link", "../outside.txt")?;

    let result = run_bundle(&fixture, &StampTable::new());
    let error = result.unwrap_err().downcast::<BundleError>()?;
    assert!(matches!(error, BundleError::SymlinkEscape { .. }));
    Ok(())
}

#[cfg(unix)]
#[test]
fn bundle_symlink_without_link_root() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "a")?;
    fixture.symlink("link", "a.txt")?;

    let mut out = Vec::new();
    let result = bundle(&mut out, &DirTree::new(fixture.path()), &BundleOptions::default());
    assert!(matches!(result, Err(BundleError::NoLinkRoot { .. })));
    Ok(())
}

#[test]
fn bundle_memory_tree() -> Result<()> {
    let mut tree = MemoryTree::new();
    tree.insert("src/main.rs", MemoryFile::file("fn main() {}\n", 0o644))
        .insert("src/lib.rs", MemoryFile::file("", 0o644))
        .insert("target/debug/app", MemoryFile::file("\x7fELF", 0o755))
        .insert(IGNORE_FILE_NAME, MemoryFile::file("/target\n", 0o644));

    let mut out = Vec::new();
    let result = bundle(&mut out, &tree, &BundleOptions::default())?;
    let expect = vec![
        ArchiveEntry::dir("src/"),
        ArchiveEntry::file("src/lib.rs", ""),
        ArchiveEntry::file("src/main.rs", "fn main() {}\n"),
    ];
    assert_eq!(read_archive(&out)?, expect);
    assert_eq!(stamp_paths(&result), vec!["src", "src/lib.rs", "src/main.rs"]);
    Ok(())
}

#[test]
fn bundle_symlink_stamped_before_epoch_turned_into_file() -> Result<()> {
    let mut tree = MemoryTree::new();
    tree.insert("link", MemoryFile::file("now a file", 0o644));

    let mut prev_stamps = StampTable::new();
    prev_stamps.insert("link".into(), Stamp::new("-1.500000-6-32768-41471-0-0+0"));
    let opts = BundleOptions {
        prev_stamps,
        ..Default::default()
    };

    let mut out = Vec::new();
    let result = bundle(&mut out, &tree, &opts)?;
    assert_eq!(read_archive(&out)?, vec![ArchiveEntry::file("link", "now a file")]);
    assert_eq!(result.to_remove, vec!["link"]);
    Ok(())
}
