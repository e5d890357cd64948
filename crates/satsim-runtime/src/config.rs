//! Harness configuration.
//!
//! Loaded from TOML. Every section has defaults, so an empty file is valid.

use crate::reentrancy::ReentrancyPolicy;
use satsim_types::Network;
use satsim_vm::layout::DEFAULT_UINT8_ARRAY_ID;
use satsim_vm::{BridgeConfig, WasmRuntimeConfig, DEFAULT_MAX_GAS};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Network pushed into every module environment
    pub network: Network,
    /// Which repeated addresses in a merged call stack count as reentrancy
    pub reentrancy: ReentrancyPolicy,
    /// Gas configuration
    pub gas: GasConfig,
    /// Trace toggles
    pub trace: TraceConfig,
    /// Module object layout
    pub bridge: BridgeSettings,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Load configuration from file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: HarnessConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gas.default_gas_limit == 0 {
            anyhow::bail!("Default gas limit cannot be 0");
        }
        if self.bridge.string_chunk_units == 0 {
            anyhow::bail!("String chunk size cannot be 0");
        }
        if self.bridge.uint8_array_id <= satsim_vm::layout::STRING_ID {
            anyhow::bail!(
                "Uint8Array class id {} collides with a builtin class",
                self.bridge.uint8_array_id
            );
        }
        tracing_subscriber::EnvFilter::try_new(&self.logging.level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", self.logging.level, e))?;
        Ok(())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            uint8_array_id: self.bridge.uint8_array_id,
            string_chunk_units: self.bridge.string_chunk_units,
            trace_pointers: self.trace.pointers,
        }
    }

    pub fn wasm_runtime_config(&self) -> WasmRuntimeConfig {
        WasmRuntimeConfig {
            uint8_array_id: self.bridge.uint8_array_id,
            debug_mode: self.trace.calls,
            ..WasmRuntimeConfig::default()
        }
    }
}

/// Gas configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Gas limit given to contracts created without an explicit one
    pub default_gas_limit: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default_gas_limit: DEFAULT_MAX_GAS,
        }
    }
}

/// Trace toggles. All off by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Retain/release and storage access
    pub pointers: bool,
    /// Cross-contract calls
    pub calls: bool,
    /// Gas used per entrypoint
    pub gas: bool,
    /// Contract deployments
    pub deployments: bool,
}

/// Module object layout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Class id of `Uint8Array` in the compiled modules
    pub uint8_array_id: u32,
    /// UTF-16 units read per memory access when lifting strings
    pub string_chunk_units: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            uint8_array_id: DEFAULT_UINT8_ARRAY_ID,
            string_chunk_units: 1024,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Emit JSON lines instead of pretty output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
