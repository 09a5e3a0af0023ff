//! The configuration checked in at the workspace root must stay loadable.

use std::path::Path;

use sheriff_core::SheriffConfig;

#[test]
fn shipped_config_loads_and_validates() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../sheriff.toml");
    let config = SheriffConfig::load(&path).expect("sheriff.toml should load");

    assert_eq!(config, {
        let mut defaults = SheriffConfig::default();
        defaults.projects = config.projects.clone();
        defaults
    });
    assert!(config.project("rules_go").is_ok());
    assert_eq!(
        config.project("rules_go").unwrap().last_green_commit_path(),
        "github.com/bazelbuild/rules_go.git/rules-go-golang"
    );
}
