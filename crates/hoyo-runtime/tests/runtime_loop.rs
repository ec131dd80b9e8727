//! End-to-end tests of the startup sequence and the tick loop.

mod common;

use common::recorder::{Behavior, Journal, builtin, registry};
use hoyo_runtime::kernel::network::{InboundItem, NetworkError, NetworkListener};
use hoyo_runtime::kernel::{HostError, PluginId, PluginResult, PluginState};
use hoyo_runtime::{
    EXIT_OK, Plugin, PluginContext, PluginRegistry, QueueListener, RuntimeBuilder, RuntimeOptions,
    ShutdownHandle, YamlConfig,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn builder(dir: &TempDir, registry: PluginRegistry) -> RuntimeBuilder<QueueListener> {
    RuntimeBuilder::new(QueueListener::new())
        .with_config_path(dir.path().join("bot.yml"))
        .with_plugin_root(dir.path().join("plugins"))
        .with_registry(registry)
}

#[test]
fn startup_writes_defaults_and_keeps_the_header() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("bot.yml"),
        "# HoyoBot host configuration\nport: 8080\nbot_id: bot_abc\n",
    )
    .unwrap();

    let runtime = builder(&dir, PluginRegistry::new()).start().unwrap();
    assert_eq!(runtime.settings().port, 8080);
    assert_eq!(runtime.settings().bot_id, "bot_abc");
    assert_eq!(runtime.settings().callback_path, "/bot");
    assert!(dir.path().join("plugins").is_dir());

    let saved = YamlConfig::open(dir.path().join("bot.yml")).unwrap();
    assert_eq!(saved.header(), ["# HoyoBot host configuration"]);
    let keys: Vec<&str> = saved.keys().collect();
    for key in ["bot_id", "bot_secret", "server-ip", "port", "villa-id", "http_filter", "http_call_back"] {
        assert!(keys.contains(&key), "missing {key}");
    }
}

#[test]
fn plugins_see_host_started_and_run_enabled() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::default();
    let runtime = builder(
        &dir,
        registry(
            &journal,
            &[
                ("base", Behavior::quiet()),
                ("watcher", Behavior::listening(&["host.started"])),
            ],
        ),
    )
    .with_plugin(builtin("watcher", &["base"]))
    .with_plugin(builtin("base", &[]))
    .start()
    .unwrap();

    assert_eq!(runtime.host().load_order(), ["base", "watcher"]);
    assert_eq!(runtime.host().state_of("watcher"), Some(PluginState::Enabled));
    assert_eq!(
        journal.entries(),
        [
            "base:startup",
            "watcher:startup",
            "base:enable",
            "watcher:enable",
            "watcher:event:host.started",
        ]
    );
}

#[test]
fn inbound_items_are_published_in_order_within_the_tick_budget() {
    let dir = TempDir::new().unwrap();
    let mut runtime = builder(&dir, PluginRegistry::new())
        .with_options(RuntimeOptions {
            max_inbound_per_tick: 2,
            ..RuntimeOptions::default()
        })
        .start()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    runtime
        .events()
        .subscribe("network", 0, PluginId::new("test"), move |event| {
            assert_eq!(event.kind().as_str(), "network.inbound");
            sink.lock().push(event.payload()["payload"]["n"].clone());
            Ok(())
        });

    let sender = runtime.listener().sender();
    for n in 0..5 {
        sender.send(InboundItem::new("conn-1", json!({ "n": n }))).unwrap();
    }

    runtime.tick_once();
    assert_eq!(*seen.lock(), [json!(0), json!(1)]);
    runtime.tick_once();
    runtime.tick_once();
    assert_eq!(
        *seen.lock(),
        (0..5).map(|n| json!(n)).collect::<Vec<Value>>()
    );
    assert_eq!(runtime.listener().queued(), 0);
    assert_eq!(runtime.current_tick(), 3);
}

#[test]
fn one_shot_and_repeating_tasks_follow_the_tick_clock() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::default();
    let behavior = Behavior {
        task_period: Some(2),
        once_delay: Some(3),
        ..Behavior::default()
    };
    let mut runtime = builder(&dir, registry(&journal, &[("clock", behavior)]))
        .with_plugin(builtin("clock", &[]))
        .start()
        .unwrap();

    assert_eq!(runtime.run_for(6), 6);
    assert_eq!(
        journal.entries()[2..],
        ["clock:task@2", "clock:once@3", "clock:task@4", "clock:task@6"]
    );
    assert_eq!(runtime.scheduler().pending(), 1);
}

/// Requests shutdown from a scheduled task and records the shutdown sequence.
struct Stopper {
    shutdown: ShutdownHandle,
    journal: Journal,
}

impl Plugin for Stopper {
    fn on_enable(&mut self, ctx: &PluginContext) -> PluginResult<()> {
        let shutdown = self.shutdown.clone();
        ctx.schedule_once(3, move || {
            shutdown.request();
            Ok(())
        });
        let journal = self.journal.clone();
        ctx.subscribe("host.stopping", 0, move |event| {
            journal.record(format!("stopper:event:{}", event.kind()));
            Ok(())
        });
        Ok(())
    }

    fn on_disable(&mut self, _ctx: &PluginContext) -> PluginResult<()> {
        self.journal.record("stopper:disable");
        Ok(())
    }
}

#[test]
fn run_returns_ok_after_a_task_requests_shutdown() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::default();
    let shutdown = ShutdownHandle::new();

    let factory_shutdown = shutdown.clone();
    let factory_journal = journal.clone();
    let registry = PluginRegistry::new().with("stopper", move || {
        Box::new(Stopper {
            shutdown: factory_shutdown.clone(),
            journal: factory_journal.clone(),
        })
    });

    let mut runtime = builder(&dir, registry)
        .with_plugin(builtin("stopper", &[]))
        .with_shutdown(shutdown)
        .with_options(RuntimeOptions {
            tick_interval: Duration::from_millis(1),
            ..RuntimeOptions::default()
        })
        .start()
        .unwrap();

    assert_eq!(runtime.run(), EXIT_OK);
    assert!(runtime.is_stopped());
    assert_eq!(runtime.current_tick(), 3);
    assert_eq!(
        journal.entries(),
        ["stopper:event:host.stopping", "stopper:disable"]
    );
    assert_eq!(runtime.host().state_of("stopper"), Some(PluginState::Disabled));
    assert!(!runtime.listener().is_running());

    // A second stop is a no-op.
    runtime.stop();
    assert_eq!(journal.count("stopper:disable"), 1);
}

#[test]
fn stopped_listener_rejects_new_items() {
    let dir = TempDir::new().unwrap();
    let mut runtime = builder(&dir, PluginRegistry::new()).start().unwrap();
    let sender = runtime.listener().sender();
    assert!(sender.is_accepting());

    runtime.stop();
    assert!(matches!(
        sender.send(InboundItem::new("late", Value::Null)),
        Err(NetworkError::NotAccepting)
    ));
}

struct BrokenListener;

impl NetworkListener for BrokenListener {
    fn start(&mut self) -> Result<(), NetworkError> {
        Err(NetworkError::StartFailed("address already in use".into()))
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }

    fn try_next(&mut self) -> Option<InboundItem> {
        None
    }
}

#[test]
fn listener_failure_aborts_startup() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::default();
    let result = RuntimeBuilder::new(BrokenListener)
        .with_config_path(dir.path().join("bot.yml"))
        .with_plugin_root(dir.path().join("plugins"))
        .with_registry(registry(&journal, &[("never", Behavior::quiet())]))
        .with_plugin(builtin("never", &[]))
        .start();

    let Err(report) = result else {
        panic!("startup should fail");
    };
    assert!(matches!(report.current_context(), HostError::Network(_)));
    assert!(journal.entries().is_empty());
}

#[test]
fn invalid_port_aborts_startup() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bot.yml"), "port: 70000\n").unwrap();

    let Err(report) = builder(&dir, PluginRegistry::new()).start() else {
        panic!("startup should fail");
    };
    assert!(matches!(report.current_context(), HostError::Config(_)));
}
