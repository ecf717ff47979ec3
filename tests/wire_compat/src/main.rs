fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::{TimeDelta, TimeZone, Utc};
    use minimap_protocol::StateSnapshot;
    use minimap_tracker::{CalibrationTable, Sample, Tracker};

    /// Field order the browser client reads.
    const FIELDS: [&str; 12] = [
        "hasData",
        "levelName",
        "playerX",
        "playerY",
        "angle",
        "imagePath",
        "mapWidth",
        "mapHeight",
        "pointerX",
        "pointerY",
        "scale",
        "updated",
    ];

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture as text with the trailing newline removed.
    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
            .trim_end()
            .to_string()
    }

    /// Returns the top-level keys of a JSON object in document order.
    fn keys_in_order(json: &str) -> Vec<String> {
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<(usize, String)> = object
            .keys()
            .map(|k| (json.find(&format!("\"{k}\":")).unwrap(), k.clone()))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k).collect()
    }

    #[test]
    fn fixture_empty_snapshot() {
        let json = StateSnapshot::default().to_json();
        assert_eq!(json, load_fixture("empty_snapshot.json"));
    }

    #[test]
    fn fixture_tracked_snapshot() {
        let mut tracker = Tracker::new(CalibrationTable::builtin());
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + TimeDelta::milliseconds(250);
        let snapshot = tracker
            .observe(
                &Sample {
                    level_name: "Floodways".into(),
                    x: -30.53606,
                    y: 33.62107,
                    angle: 45.0,
                },
                now,
            )
            .expect("known level produces a snapshot");

        assert_eq!(snapshot.to_json(), load_fixture("state_snapshot.json"));
    }

    #[test]
    fn field_order_is_stable() {
        for name in ["empty_snapshot.json", "state_snapshot.json"] {
            assert_eq!(keys_in_order(&load_fixture(name)), FIELDS, "{name}");
        }
    }

    #[test]
    fn fixed_precision_survives_generic_parsers() {
        let value: serde_json::Value =
            serde_json::from_str(&load_fixture("state_snapshot.json")).unwrap();
        assert_eq!(value["playerX"].as_f64(), Some(-30.5361));
        assert_eq!(value["pointerX"].as_f64(), Some(1042.0));
        assert_eq!(value["hasData"], true);
    }
}
