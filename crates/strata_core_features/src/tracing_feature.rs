//! Tracing and observability feature.
//!
//! Provides [`TracingFeature`] which installs a `tracing` subscriber from the
//! [`TracingConfig`] value.
//!
//! # Lifecycle
//!
//! - **`setup`** reads [`TRACING_CONFIG`] and republishes it, so features set
//!   up later see the configuration in effect.
//! - **`init`** installs the subscriber. Deferring installation to init lets
//!   the bootstrap builder, or features it depends on, provide a different
//!   configuration first.
//!
//! # Example
//!
//! ```no_run
//! use strata_core_features::{TRACING_CONFIG, TracingConfig, TracingFeature, TracingFormat};
//! use strata_feature::prelude::*;
//! use tracing::Level;
//!
//! # async fn demo() -> Result<(), FeatureError> {
//! let bootstrap = Bootstrap::new()
//!     .with_value(
//!         &TRACING_CONFIG,
//!         TracingConfig::new()
//!             .with_level(Level::DEBUG)
//!             .with_format(TracingFormat::Compact),
//!     )
//!     .add_features::<TracingFeature>()
//!     .start()?;
//! bootstrap.when_ready().await?;
//! # Ok(())
//! # }
//! ```

use crate::BootInfoFeature;
use std::sync::LazyLock;
use strata_feature::feature::{Feature, FeatureDef};
use strata_values::ValueKey;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable colored output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing configuration.
///
/// # Configuration Options
///
/// ```
/// use strata_core_features::{TracingConfig, TracingFormat};
/// use tracing::Level;
///
/// // Development: pretty output with debug level and span events
/// let dev = TracingConfig::new()
///     .with_level(Level::DEBUG)
///     .with_format(TracingFormat::Pretty)
///     .with_span_events(true);
///
/// // Production: JSON output for log aggregation
/// let prod = TracingConfig::new()
///     .with_level(Level::INFO)
///     .with_format(TracingFormat::Json)
///     .with_env_filter("strata_feature=info,strata_values=warn");
/// # assert_eq!(prod.format, TracingFormat::Json);
/// # assert!(dev.span_events);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Maximum log level.
    pub level: Level,
    /// Output format.
    pub format: TracingFormat,
    /// Environment filter (e.g., "strata_feature=debug,hyper=warn").
    pub env_filter: Option<String>,
    /// Whether to include span events (enter/exit).
    pub span_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
            span_events: false,
        }
    }
}

impl TracingConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets a custom environment filter string.
    ///
    /// Format: `target=level,target=level,...`
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Returns the filter the subscriber is installed with.
    ///
    /// An unparsable custom filter falls back to the level.
    #[must_use]
    pub fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => {
                EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::new(self.level.as_str()),
        }
    }

    /// Installs the global subscriber.
    ///
    /// Returns `false` when a global subscriber was already installed.
    pub fn install(&self) -> bool {
        let span_events = if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };
        let registry = tracing_subscriber::registry().with(self.filter());

        // try_init fails if a global subscriber is already set.
        match self.format {
            TracingFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_span_events(span_events),
                )
                .try_init()
                .is_ok(),
            TracingFormat::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_span_events(span_events),
                )
                .try_init()
                .is_ok(),
            TracingFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_span_events(span_events),
                )
                .try_init()
                .is_ok(),
        }
    }
}

/// Key of the [`TracingConfig`] value. Resolves to the defaults when nothing
/// is provided.
pub static TRACING_CONFIG: LazyLock<ValueKey<TracingConfig>> =
    LazyLock::new(|| ValueKey::with_default("tracing-config", |_| TracingConfig::default()));

// ─────────────────────────────────────────────────────────────────────────────
// TracingFeature
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing and logging feature.
///
/// Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a
/// `fmt` layer in the configured format.
///
/// # Values Provided
///
/// | Key | Tier | Description |
/// |-----|------|-------------|
/// | [`TRACING_CONFIG`] | Bootstrap | Configuration in effect |
///
/// # Dependencies
///
/// - [`BootInfoFeature`]
pub struct TracingFeature;

impl Feature for TracingFeature {
    fn describe() -> FeatureDef {
        FeatureDef::named("strata::tracing")
            .needs::<BootInfoFeature>()
            .setup(|setup| {
                let config = setup.get(&TRACING_CONFIG)?;
                setup.provide(&TRACING_CONFIG, config);
                Ok(())
            })
            .init(|context| {
                let config = context.get(&TRACING_CONFIG)?;
                let installed = config.install();
                tracing::info!(
                    level = %config.level,
                    format = ?config.format,
                    installed,
                    "tracing initialized"
                );
                context.supply().when_off(|| {
                    tracing::info!("tracing feature shutting down");
                });
                Ok(())
            })
    }
}
