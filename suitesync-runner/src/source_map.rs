// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping compiled test files back to their original sources.
//!
//! A runner may report compiled output files (for example, transpiled JavaScript). Each output
//! file maps to one or more original sources through its source map, and each source maps back to
//! exactly one output file.

use crate::helpers::normalize_lexically;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{collections::HashMap, fmt, io};
use tracing::debug;

/// Resolves a file to the original sources it was compiled from.
pub trait SourceMapResolver: Send + Sync + fmt::Debug {
    /// Returns the original sources for `file`, or `file` itself if it isn't a compiled output.
    ///
    /// The returned list is never empty.
    fn resolve(&self, file: &Utf8Path) -> Vec<Utf8PathBuf>;
}

/// A resolver that maps every file to itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityResolver;

impl SourceMapResolver for IdentityResolver {
    fn resolve(&self, file: &Utf8Path) -> Vec<Utf8PathBuf> {
        vec![file.to_owned()]
    }
}

/// A resolver that follows the `//# sourceMappingURL=` comment at the end of JavaScript outputs.
///
/// Only `.js`, `.mjs` and `.cjs` files are considered. Inline (`data:`) source maps, missing map
/// files and malformed maps all fall back to the file itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceMapFileResolver;

impl SourceMapFileResolver {
    const URL_PREFIX: &'static str = "//# sourceMappingURL=";

    fn read_sources(file: &Utf8Path) -> io::Result<Option<Vec<Utf8PathBuf>>> {
        if !matches!(file.extension(), Some("js" | "mjs" | "cjs")) {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(file)?;
        let Some(url) = contents
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| line.trim().strip_prefix(Self::URL_PREFIX))
        else {
            return Ok(None);
        };
        if url.starts_with("data:") {
            return Ok(None);
        }

        let dir = file.parent().unwrap_or(Utf8Path::new(""));
        let map_file = normalize_lexically(&dir.join(url));
        let map: RawSourceMap = serde_json::from_str(&std::fs::read_to_string(&map_file)?)
            .map_err(io::Error::other)?;

        let map_dir = map_file.parent().unwrap_or(Utf8Path::new(""));
        let root = match &map.source_root {
            Some(root) => map_dir.join(root),
            None => map_dir.to_owned(),
        };
        let sources: Vec<_> = map
            .sources
            .iter()
            .map(|source| normalize_lexically(&root.join(source)))
            .collect();
        Ok((!sources.is_empty()).then_some(sources))
    }
}

impl SourceMapResolver for SourceMapFileResolver {
    fn resolve(&self, file: &Utf8Path) -> Vec<Utf8PathBuf> {
        match Self::read_sources(file) {
            Ok(Some(sources)) => sources,
            Ok(None) => vec![file.to_owned()],
            Err(error) => {
                debug!("failed to read source map for {file}, using the file itself: {error}");
                vec![file.to_owned()]
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    #[serde(default)]
    source_root: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
}

/// Caches source-map lookups in both directions for one configuration.
#[derive(Clone, Debug, Default)]
pub struct SourceMapCache {
    file_to_sources: HashMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    source_to_file: HashMap<Utf8PathBuf, Utf8PathBuf>,
}

impl SourceMapCache {
    /// Resolves `file` through `resolver`, consulting and populating the cache.
    pub fn resolve(
        &mut self,
        resolver: &dyn SourceMapResolver,
        file: &Utf8Path,
    ) -> Vec<Utf8PathBuf> {
        if let Some(sources) = self.file_to_sources.get(file) {
            return sources.clone();
        }
        let sources = resolver.resolve(file);
        self.record(file, sources.clone());
        sources
    }

    /// Records that `file` was compiled from `sources`.
    pub fn record(&mut self, file: &Utf8Path, sources: Vec<Utf8PathBuf>) {
        for source in &sources {
            if source != file {
                self.source_to_file.insert(source.clone(), file.to_owned());
            }
        }
        self.file_to_sources.insert(file.to_owned(), sources);
    }

    /// Returns the sources recorded for the output `file`.
    pub fn sources_for(&self, file: &Utf8Path) -> Option<&[Utf8PathBuf]> {
        self.file_to_sources.get(file).map(Vec::as_slice)
    }

    /// Returns the output file recorded for `source`.
    pub fn file_for(&self, source: &Utf8Path) -> Option<&Utf8Path> {
        self.source_to_file.get(source).map(Utf8PathBuf::as_path)
    }

    /// Forgets all mappings.
    pub fn clear(&mut self) {
        self.file_to_sources.clear();
        self.source_to_file.clear();
    }
}
