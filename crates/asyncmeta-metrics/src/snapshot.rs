// Copyright 2025 AsyncMeta Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for one client operation kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Traffic counters for one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub connects: u64,
    pub connect_failures: u64,
    pub binds: u64,
    pub requests_sent: u64,
    pub retries: u64,
    pub abandons: u64,
    pub stale_responses: u64,
    pub entries: u64,
    pub read_errors: u64,
    pub quarantines: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    /// Operations currently holding an admission slot
    pub pending_operations: u64,
    pub busy_rejections: u64,
    pub timeouts: u64,
    pub teardowns: u64,
    pub operations: HashMap<String, OperationMetrics>,
    pub targets: HashMap<String, TargetMetrics>,
}

impl MetricsSnapshot {
    /// Renders the snapshot as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
