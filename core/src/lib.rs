// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

//! Async clients for the OpenAI, Anthropic and Perplexity HTTP APIs sharing
//! one retry executor.
//!
//! The crate only emits records through the `log` facade; installing a
//! logger is left to the application.

pub mod blocking;
pub mod config;
pub mod llm;

pub use config::{ConfigError, EnvSource, ProcessEnv, Settings, SettingsOverrides};
pub use llm::*;
