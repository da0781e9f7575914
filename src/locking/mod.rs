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

pub mod acquisition;
pub mod lock;
pub mod marker;
pub mod scope;
pub mod timeout;
pub mod wait_observer;

pub use acquisition::{LockAttempt, LockTimeoutBudget, PollingBackoff};
pub use lock::{DistributedLock, LockOutcome};
pub use marker::MarkerMetadata;
pub use scope::LockScope;
pub use timeout::{
    LockTimeoutParseError, LockTimeoutResolution, LockTimeoutResolver, LockTimeoutSource,
    LockTimeoutValue, parse_timeout_millis,
};
pub use wait_observer::{LockWaitObserver, LoggingObserver};
