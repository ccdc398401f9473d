//! Configuration, command-line helpers and logging.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Command-line helpers.
pub mod cli;
/// Configuration file parsing and validation.
pub mod config;
/// Logger initialization.
pub mod logger;
