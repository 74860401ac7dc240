//! Event logs: save generated events for offline replay.

use crate::generator::GeneratedEvent;
use chamber_model::ChamberLayout;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A recorded run: the chamber it was generated for and its events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLog {
    pub scenario_name: String,
    pub seed: u64,
    pub layout: ChamberLayout,
    pub events: Vec<GeneratedEvent>,
}

/// Save an event log to a JSON file.
pub fn save_events(log: &EventLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load an event log from a JSON file.
pub fn load_events(path: &Path) -> anyhow::Result<EventLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: EventLog = serde_json::from_reader(reader)?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{Scenario, ScenarioKind};

    #[test]
    fn log_survives_a_file_round_trip() {
        let scenario = Scenario::build(ScenarioKind::Noisy, 11);
        let generator = scenario.event_generator();
        let log = EventLog {
            scenario_name: scenario.name.clone(),
            seed: scenario.seed,
            layout: scenario.layout.clone(),
            events: (0..2).map(|i| generator.generate(i)).collect(),
        };
        let path = std::env::temp_dir().join(format!("trackfind_log_{}.json", std::process::id()));
        save_events(&log, &path).unwrap();
        let back = load_events(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.scenario_name, "noisy");
        assert_eq!(back.events.len(), 2);
        assert_eq!(back.events[1].hits.len(), log.events[1].hits.len());
        let chamber = back.layout.build();
        let input = back.events[0].input(&chamber).unwrap();
        assert_eq!(input.hit_truth.len(), back.events[0].hits.len());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_events(Path::new("/nonexistent/trackfind.json")).is_err());
    }
}
