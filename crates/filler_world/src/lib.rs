//! Machine definitions: built-in defaults and JSON machine files.

use anyhow::{ensure, Context, Result};
use filler_core::{MachineDef, MachineId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Deserialize)]
struct MachinesFile {
    machines: Vec<MachineDef>,
}

/// The two fillers the dashboard shows when no machine file is given.
pub fn default_machines() -> Vec<MachineDef> {
    vec![
        MachineDef {
            id: MachineId("machine_1".to_string()),
            name: "Filler 1".to_string(),
            limit: 100,
            cycle_time_minutes: 1.0,
        },
        MachineDef {
            id: MachineId("machine_2".to_string()),
            name: "Filler 2".to_string(),
            limit: 120,
            cycle_time_minutes: 1.5,
        },
    ]
}

/// Reads `{"machines": [...]}` from `path`.
///
/// Limits and cycle times are taken as given; a machine with unusable
/// settings simply refuses to start until the operator fixes them.
pub fn load_machines(path: &Path) -> Result<Vec<MachineDef>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading machine file: {}", path.display()))?;
    let file: MachinesFile = serde_json::from_str(&json)
        .with_context(|| format!("parsing machine file: {}", path.display()))?;

    ensure!(!file.machines.is_empty(), "machine file defines no machines");
    let mut seen = HashSet::new();
    for def in &file.machines {
        ensure!(seen.insert(&def.id), "duplicate machine id: {}", def.id);
    }
    Ok(file.machines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_have_two_distinct_machines() {
        let machines = default_machines();
        assert_eq!(machines.len(), 2);
        assert_ne!(machines[0].id, machines[1].id);
    }

    #[test]
    fn loads_machine_file() {
        let file = write_file(
            r#"{"machines": [
                {"id": "line_a", "name": "Line A", "limit": 24, "cycle_time_minutes": 0.5}
            ]}"#,
        );
        let machines = load_machines(file.path()).unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].id.0, "line_a");
        assert_eq!(machines[0].limit, 24);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let file = write_file(
            r#"{"machines": [
                {"id": "m", "name": "A", "limit": 1, "cycle_time_minutes": 1.0},
                {"id": "m", "name": "B", "limit": 1, "cycle_time_minutes": 1.0}
            ]}"#,
        );
        let err = load_machines(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{err}");
    }

    #[test]
    fn rejects_empty_file() {
        let file = write_file(r#"{"machines": []}"#);
        assert!(load_machines(file.path()).is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_machines(Path::new("/nonexistent/machines.json")).unwrap_err();
        assert!(format!("{err:#}").contains("machines.json"));
    }
}
