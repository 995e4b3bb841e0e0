// pml-config/src/lib.rs
// ============================================================================
// Module: PML Config Library
// Description: Canonical config model and validation for the PML Gateway.
// Purpose: Single source of truth for pml-gateway.toml semantics.
// Dependencies: pml-core, serde, toml
// ============================================================================

//! ## Overview
//! `pml-config` defines the canonical configuration model for the gateway
//! with strict, fail-closed validation and the documented environment
//! variable overrides.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::DownstreamServer;
pub use config::EmbeddingProvider;
pub use config::EmbeddingSection;
pub use config::ExecutorSection;
pub use config::GatewayConfig;
pub use config::SandboxSection;
pub use config::ServerConfig;
pub use config::ServerTransport;
pub use config::StoreSection;
pub use config::ToolDecl;
pub use config::TraceSinkSection;
pub use examples::config_toml_example;
