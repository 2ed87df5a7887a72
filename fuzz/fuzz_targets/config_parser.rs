#![no_main]

use huella::config::EngineConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Config parsing should reject garbage gracefully, never panic
        let _ = EngineConfig::from_toml_str(input);
    }
});
