// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Incremental sync of host directory trees into biomes.
//!
//! A __biome__ is an isolated environment holding a working copy of a host
//! directory tree, in which programs can be run. Biome keeps that working copy
//! up to date by shipping only what changed since the last push:
//!
//! - [`stamp`] fingerprints tree entries by their metadata.
//! - [`pattern`] compiles gitignore-style rules that keep entries out.
//! - [`bundle`] walks a [`tree`], archives changed entries, and lists what
//!   must be removed from the biome.
//! - [`path`] speaks the path grammar of the biome, which may differ from the
//!   host's.
//! - [`push`] streams a bundle into a [`biome`] and applies it there, keeping
//!   stamps in the [`store`].

pub mod biome;
pub mod bundle;
pub mod config;
pub mod path;
pub mod pattern;
pub mod pipe;
pub mod push;
pub mod stamp;
pub mod store;
pub mod tree;
pub mod xdg;
