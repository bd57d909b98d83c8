use std::path::PathBuf;

fn content_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../content/machines.json")
}

#[test]
fn shipped_machine_file_loads() {
    let machines = filler_world::load_machines(&content_path()).unwrap();
    assert!(!machines.is_empty());
}

#[test]
fn shipped_machines_are_startable() {
    for def in filler_world::load_machines(&content_path()).unwrap() {
        let mut state = filler_core::MachineState::new(&def);
        state.start();
        assert!(state.running, "{} does not start", def.id);
    }
}

#[test]
fn shipped_file_matches_builtin_defaults() {
    let shipped = filler_world::load_machines(&content_path()).unwrap();
    let defaults = filler_world::default_machines();
    assert_eq!(shipped.len(), defaults.len());
    for (file_def, builtin) in shipped.iter().zip(&defaults) {
        assert_eq!(file_def.id, builtin.id);
        assert_eq!(file_def.name, builtin.name);
        assert_eq!(file_def.limit, builtin.limit);
        assert!((file_def.cycle_time_minutes - builtin.cycle_time_minutes).abs() < 1e-12);
    }
}
