//! `sim` — Toy event generator, scenarios and event logs for the finder.

pub mod event_log;
pub mod generator;
pub mod scenarios;

pub use event_log::{load_events, save_events, EventLog};
pub use generator::{EventGenerator, EventInput, GeneratedEvent, GeneratorConfig, Particle};
pub use scenarios::{Scenario, ScenarioKind};
