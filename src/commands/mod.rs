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

pub mod lock;
pub mod unlock;

use crate::config::{LockerConfig, Operation};
use crate::error::Result;

pub use lock::LockCommand;
pub use unlock::UnlockCommand;

/// Executes the operation selected by configuration.
pub fn run(config: &LockerConfig) -> Result<()> {
    match config.operation {
        Operation::Lock => LockCommand::new(config)?.execute(),
        Operation::Unlock => UnlockCommand::new(config)?.execute(),
    }
}
