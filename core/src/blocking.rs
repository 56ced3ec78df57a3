// Copyright (c) 2025 ByteDance Ltd. and/or its affiliates
// SPDX-License-Identifier: MIT

//! Run a client call from synchronous code.

use std::future::Future;

/// Drive `future` to completion on a fresh current-thread runtime.
///
/// Must not be called from inside an async context: tokio panics when a
/// runtime is started on a thread that is already driving one.
pub fn block_on<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}
