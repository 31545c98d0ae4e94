// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for regress.
//!
//! Configuration is read from three layers, each overriding the previous one:
//!
//! * the defaults embedded in the binary ([`RegressConfig::DEFAULT_CONFIG`]);
//! * `.config/regress.toml` in the repository root, or the file passed in with `--config-file`;
//! * `REGRESS_<SECTION>__<KEY>` environment variables, for scalar settings.

mod defaults;
mod imp;
mod log_level;
mod testcase_limit;

pub use defaults::*;
pub use imp::*;
pub use log_level::*;
pub use testcase_limit::*;
