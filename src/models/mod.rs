// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models shared by the stores and backends.

pub mod progress;
pub mod session;

pub use progress::{NarrationMode, ProgressDocument, Settings, ThemeMode};
pub use session::{Identity, Session};
