// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Turn a possibly-relative config path into a canonical absolute one.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}

/// The config path for this invocation: the first CLI argument, or the
/// given default.
pub fn config_path_from_args(default: &str) -> Result<PathBuf> {
    let arg = std::env::args().nth(1);
    resolve_config_path(arg.as_deref().unwrap_or(default))
}
