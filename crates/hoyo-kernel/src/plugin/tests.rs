//! Unit tests for `hoyo-kernel` plugin types
//!
//! Covers:
//! - [`PluginState`] transition table
//! - [`PluginVersion`] parsing and display
//! - [`PluginDescriptor`] builder, validation and serde aliases

use crate::plugin::{LoadError, PluginDescriptor, PluginState, PluginVersion};

// =========================================================================
// PluginState
// =========================================================================

#[test]
fn test_plugin_state_happy_path_sequence() {
    let sequence = [
        PluginState::Unloaded,
        PluginState::Loaded,
        PluginState::Enabled,
        PluginState::Disabled,
        PluginState::Enabled,
        PluginState::Disabled,
        PluginState::Unloaded,
    ];

    for pair in sequence.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "{} -> {} must be allowed",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_plugin_state_failed_is_terminal() {
    assert!(PluginState::Loaded.can_transition_to(PluginState::Failed));
    assert!(PluginState::Failed.is_terminal());

    for next in [
        PluginState::Unloaded,
        PluginState::Loaded,
        PluginState::Enabled,
        PluginState::Disabled,
    ] {
        assert!(!PluginState::Failed.can_transition_to(next));
    }
}

#[test]
fn test_plugin_state_never_skips_loaded() {
    assert!(!PluginState::Unloaded.can_transition_to(PluginState::Enabled));
    assert!(!PluginState::Unloaded.can_transition_to(PluginState::Failed));
    assert!(!PluginState::Unloaded.can_transition_to(PluginState::Disabled));
    assert!(PluginState::Loaded.can_transition_to(PluginState::Disabled));
    // An enabled plugin has to be disabled before it can be unloaded.
    assert!(!PluginState::Enabled.can_transition_to(PluginState::Unloaded));
}

#[test]
fn test_plugin_state_same_state_is_not_a_transition() {
    assert!(!PluginState::Enabled.can_transition_to(PluginState::Enabled));
    assert!(!PluginState::Disabled.can_transition_to(PluginState::Disabled));
}

#[test]
fn test_plugin_state_display() {
    assert_eq!(PluginState::Enabled.to_string(), "ENABLED");
    assert_eq!(PluginState::Failed.to_string(), "FAILED");
    assert!(PluginState::Disabled.is_resident());
    assert!(!PluginState::Failed.is_resident());
}

// =========================================================================
// PluginVersion
// =========================================================================

#[test]
fn test_version_parse_full() {
    let v = PluginVersion::parse("1.2.3-beta.1+build42").unwrap();
    assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
    assert_eq!(v.prerelease.as_deref(), Some("beta.1"));
    assert_eq!(v.build.as_deref(), Some("build42"));
    assert_eq!(v.to_string(), "1.2.3-beta.1+build42");
}

#[test]
fn test_version_parse_rejects_malformed() {
    for bad in ["", "1", "1.2", "1.2.3.4", "a.b.c", "1.2.x", "1.2.3-", "1.2.3+"] {
        assert!(PluginVersion::parse(bad).is_err(), "{bad:?} must be rejected");
    }
}

#[test]
fn test_version_ordering() {
    assert!(PluginVersion::new(1, 2, 3) < PluginVersion::new(1, 10, 0));
    assert!(PluginVersion::new(2, 0, 0) > PluginVersion::new(1, 99, 99));
}

// =========================================================================
// PluginDescriptor
// =========================================================================

#[test]
fn test_descriptor_builder() {
    let desc = PluginDescriptor::new("ChatLogger", "1.0.0", "chat_logger")
        .with_dependency("storage")
        .with_description("logs chat")
        .with_author("alice");

    assert_eq!(desc.data_dir_name(), "chatlogger");
    assert!(desc.dependencies.contains("storage"));
    assert_eq!(desc.description.as_deref(), Some("logs chat"));
    assert_eq!(desc.authors, vec!["alice".to_string()]);
    assert!(desc.validate().is_ok());
}

#[test]
fn test_descriptor_validation_failures() {
    let cases = [
        PluginDescriptor::new("", "1.0.0", "main"),
        PluginDescriptor::new("bad name", "1.0.0", "main"),
        PluginDescriptor::new("ok", "one", "main"),
        PluginDescriptor::new("ok", "1.0.0", "  "),
        PluginDescriptor::new("ok", "1.0.0", "main").with_dependency("ok"),
    ];

    for desc in cases {
        let err = desc.validate().unwrap_err();
        assert!(
            matches!(err, LoadError::InvalidDescriptor { .. }),
            "unexpected error {err:?}"
        );
    }
}

#[test]
fn test_descriptor_accepts_aliases() {
    let json = r#"{
        "name": "greeter",
        "version": "0.3.0",
        "main": "greeter",
        "depend": ["storage", "auth"]
    }"#;
    let desc: PluginDescriptor = serde_json::from_str(json).unwrap();
    assert_eq!(desc.entry_point, "greeter");
    assert_eq!(desc.dependencies.len(), 2);
    assert!(desc.description.is_none());
}

#[test]
fn test_load_error_names_plugin() {
    let err = LoadError::MissingDependency {
        plugin: "b".into(),
        dependency: "a".into(),
    };
    assert_eq!(err.plugin(), Some("b"));
    assert!(err.to_string().contains("b requires a"));

    let cycle = LoadError::CircularDependency {
        members: vec!["x".into(), "y".into()],
    };
    assert_eq!(cycle.plugin(), None);
    assert!(cycle.to_string().contains("x, y"));
}
