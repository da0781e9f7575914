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

/// Initialize the logger with the specified verbosity level
///
/// # Arguments
/// * `verbose` - Verbosity level (0=info, 1=debug, 2+=trace)
///
/// `RUST_LOG` takes precedence when set.
pub fn setup_logger(verbose: u8) {
    let env_filter = default_filter(verbose);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(env_filter))
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "locker=info",
        1 => "locker=debug",
        _ => "locker=trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(default_filter(0), "locker=info");
        assert_eq!(default_filter(1), "locker=debug");
        assert_eq!(default_filter(2), "locker=trace");
        assert_eq!(default_filter(9), "locker=trace");
    }
}
