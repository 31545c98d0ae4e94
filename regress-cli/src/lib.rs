// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs configuration-matrix regression tests against a live cluster.
//!
//! Every testcase generated from the `[[matrix]]` groups of `.config/regress.toml` is run under
//! every `[[contexts]]` entry, and the results of all contexts are expected to agree.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputContext;
