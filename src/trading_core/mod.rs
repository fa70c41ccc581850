//! Trading Core - session-scoped analytics and the trade decision pipeline
//!
//! - Session clock and per-day state
//! - Volume profile and Value Area
//! - Swing points and liquidity sweeps
//! - Order-flow confirmations and trend filter
//! - Signal composition and trade lifecycle
//! - Engine orchestration

pub mod engine;
pub mod error;
pub mod indicators;
pub mod lifecycle;
pub mod order_flow;
pub mod profile;
pub mod session;
pub mod signal;
pub mod swings;
pub mod trend;

// Re-export commonly used types
pub use engine::{BarOutcome, Engine};
pub use error::{EngineError, Phase, PhaseError};
pub use indicators::{IndicatorKind, IndicatorSource, IndicatorValues, SeriesIndicators};
pub use lifecycle::{Position, RiskPlan, RiskRejection, TradeLifecycleController, TrailUpdate};
pub use order_flow::{DeltaFlip, OrderFlowConfirmation, OrderFlowSnapshot};
pub use profile::{ValueArea, VolumeProfile, VolumeProfileEngine};
pub use session::{ClockReading, SessionClock, SessionState};
pub use signal::{Signal, SignalComposer, SkipReason};
pub use swings::{LiquiditySweepDetector, SwingPointTracker};
pub use trend::{TrendFilter, TrendPermission};
