use std::fs;
use std::path::PathBuf;
use toml::Value;

// The UI is a pure view over panel snapshots: every remote effect goes
// through the controller's command channel. Keeping network and integration
// crates out of this manifest holds that boundary in place.
#[test]
fn ui_manifest_stays_free_of_network_and_integration_dependencies() {
    let manifest_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    let manifest = fs::read_to_string(&manifest_path).expect("read testpanel-ui Cargo.toml");
    let parsed: Value = toml::from_str(&manifest).expect("parse testpanel-ui Cargo.toml");

    let dependencies = parsed
        .get("dependencies")
        .and_then(Value::as_table)
        .expect("testpanel-ui manifest should have a dependencies table");

    for forbidden in ["reqwest", "integration-youtrack", "testpanel-config"] {
        assert!(
            !dependencies.contains_key(forbidden),
            "testpanel-ui must not depend on {forbidden}; commands go through the controller",
        );
    }
}
