// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod metrics_server;

pub use metrics_server::{metrics_router, serve, telemetry_router};
