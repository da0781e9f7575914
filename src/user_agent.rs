// Copyright 2025 dentsusoken
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

//! User-Agent strings sent by the HTTP clients.

/// The package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for object storage requests
pub fn storage_client() -> String {
    for_feature("storage")
}

/// User-Agent for compute metadata token requests
pub fn metadata_client() -> String {
    for_feature("metadata")
}

fn for_feature(feature: &str) -> String {
    format!("locker/{feature}/{VERSION}")
}
