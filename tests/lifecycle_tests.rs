//! Module lifecycle tests
//!
//! Registration, resolution, failure isolation, shutdown and lookups through
//! the public `ModuleManager` surface.

mod common;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::*;
use survival_modules::{
    Module, ModuleDescriptor, ModuleError, ModuleManager, ModuleState, OrchestratorError,
    PluginConfig, SetupContext,
};

async fn state(manager: &ModuleManager, id: &str) -> ModuleState {
    manager.module_state(id).await.unwrap()
}

#[tokio::test]
async fn test_core_economy_traders() {
    let mut fixture = Fixture::new();
    let core = TestModule::new("core", &fixture.journal);
    let economy = TestModule::new("economy", &fixture.journal).depends_on("core");
    let traders = TestModule::new("traders", &fixture.journal).depends_on("economy");
    let seen_by_traders = traders.seen_dependencies();

    // Registration order deliberately differs from activation order
    fixture.manager.register(traders).await.unwrap();
    fixture.manager.register(core).await.unwrap();
    fixture.manager.register(economy).await.unwrap();

    let mut enablement = BTreeMap::new();
    enablement.insert("traders".to_string(), true);
    fixture.manager.set_enablement(enablement);

    let report = fixture.manager.setup_all().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.activation_order, vec!["core", "economy", "traders"]);
    assert_eq!(fixture.journal.phase("setup"), vec!["core", "economy", "traders"]);
    assert_eq!(*seen_by_traders.lock().unwrap(), vec!["economy"]);

    let statuses = fixture.manager.list_modules().await;
    assert!(statuses.iter().all(|s| s.enabled && s.state == ModuleState::Setup));

    let report = fixture.manager.start_all().await;
    assert_eq!(report.succeeded, vec!["core", "economy", "traders"]);
    assert_eq!(fixture.journal.phase("start"), vec!["core", "economy", "traders"]);
    assert_eq!(state(&fixture.manager, "traders").await, ModuleState::Started);

    let report = fixture.manager.shutdown_all().await;
    assert_eq!(report.stopped, vec!["traders", "economy", "core"]);
    assert_eq!(fixture.journal.phase("shutdown"), vec!["traders", "economy", "core"]);
    for id in ["core", "economy", "traders"] {
        assert_eq!(state(&fixture.manager, id).await, ModuleState::Stopped);
    }
}

#[tokio::test]
async fn test_setup_failure_is_isolated() {
    let mut fixture = Fixture::new();
    let a = TestModule::new("a", &fixture.journal).enabled();
    let b = TestModule::new("b", &fixture.journal).enabled().depends_on("a").failing_setup();
    let c = TestModule::new("c", &fixture.journal).enabled().depends_on("b");
    let d = TestModule::new("d", &fixture.journal).enabled();
    let e = TestModule::new("e", &fixture.journal).enabled().depends_on("c");
    for module in [a, b, c, d, e] {
        fixture.manager.register(module).await.unwrap();
    }

    let report = fixture.manager.setup_all().await.unwrap();
    assert_eq!(report.activation_order, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(report.succeeded, vec!["a", "d"]);
    assert_eq!(report.failed_modules(), vec!["b", "c", "e"]);

    assert!(matches!(
        &report.failures[0],
        OrchestratorError::ModuleSetup { module, source: ModuleError::SetupFailed(_) }
            if module == "b"
    ));
    assert!(matches!(
        &report.failures[1],
        OrchestratorError::DependencyFailed { module, dependency, root }
            if module == "c" && dependency == "b" && root == "b"
    ));
    assert!(matches!(
        &report.failures[2],
        OrchestratorError::DependencyFailed { module, dependency, root }
            if module == "e" && dependency == "c" && root == "b"
    ));

    // Skipped modules never see their setup hook
    assert_eq!(fixture.journal.phase("setup"), vec!["a", "b", "d"]);

    let report = fixture.manager.start_all().await;
    assert_eq!(report.succeeded, vec!["a", "d"]);
    assert_eq!(state(&fixture.manager, "b").await, ModuleState::Error);
    assert_eq!(state(&fixture.manager, "c").await, ModuleState::Error);
    assert_eq!(state(&fixture.manager, "d").await, ModuleState::Started);

    let failure = fixture
        .manager
        .list_modules()
        .await
        .into_iter()
        .find(|s| s.id == "b")
        .and_then(|s| s.failure)
        .unwrap();
    assert!(failure.contains("refused to set up"));

    let report = fixture.manager.shutdown_all().await;
    assert_eq!(report.stopped, vec!["d", "a"]);
    assert_eq!(state(&fixture.manager, "b").await, ModuleState::Error);
}

#[tokio::test]
async fn test_start_failure_skips_dependents() {
    let mut fixture = Fixture::new();
    fixture
        .manager
        .register(TestModule::new("economy", &fixture.journal).enabled().failing_start())
        .await
        .unwrap();
    fixture
        .manager
        .register(TestModule::new("traders", &fixture.journal).enabled().depends_on("economy"))
        .await
        .unwrap();
    fixture.manager.register(TestModule::new("hud", &fixture.journal).enabled()).await.unwrap();

    fixture.manager.setup_all().await.unwrap();
    let report = fixture.manager.start_all().await;

    assert_eq!(report.succeeded, vec!["hud"]);
    assert!(matches!(
        &report.failures[0],
        OrchestratorError::ModuleStart { module, .. } if module == "economy"
    ));
    assert!(matches!(
        &report.failures[1],
        OrchestratorError::DependencyFailed { module, root, .. }
            if module == "traders" && root == "economy"
    ));
    assert_eq!(fixture.journal.phase("start"), vec!["economy", "hud"]);
    assert_eq!(state(&fixture.manager, "traders").await, ModuleState::Error);
}

#[tokio::test]
async fn test_hung_shutdown_times_out_and_teardown_continues() {
    let fixture = Fixture::new();
    let mut manager = fixture
        .manager
        .with_shutdown_timeouts(Duration::from_secs(5), Duration::from_millis(100));

    manager.register(TestModule::new("a", &fixture.journal).enabled()).await.unwrap();
    manager
        .register(
            TestModule::new("b", &fixture.journal)
                .enabled()
                .hanging_shutdown(Duration::from_secs(30)),
        )
        .await
        .unwrap();
    manager
        .register(TestModule::new("c", &fixture.journal).enabled().failing_shutdown())
        .await
        .unwrap();

    manager.setup_all().await.unwrap();
    manager.start_all().await;

    let began = Instant::now();
    let report = manager.shutdown_all().await;
    assert!(began.elapsed() < Duration::from_secs(3));

    assert_eq!(report.stopped, vec!["c", "b", "a"]);
    assert_eq!(report.timed_out, vec!["b"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "c");
    for id in ["a", "b", "c"] {
        assert_eq!(state(&manager, id).await, ModuleState::Stopped);
    }
}

#[tokio::test]
async fn test_shutdown_runs_once() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("claims", &fixture.journal).enabled()).await.unwrap();
    fixture.manager.setup_all().await.unwrap();
    fixture.manager.start_all().await;

    let first = fixture.manager.shutdown_all().await;
    let second = fixture.manager.shutdown_all().await;
    assert_eq!(first.stopped, vec!["claims"]);
    assert!(second.stopped.is_empty());
    assert_eq!(fixture.journal.phase("shutdown"), vec!["claims"]);
}

#[tokio::test]
async fn test_get_module_only_returns_started() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("stats", &fixture.journal).enabled()).await.unwrap();
    fixture.manager.register(TestModule::new("hud", &fixture.journal)).await.unwrap();

    assert!(fixture.manager.get_module("stats").await.is_none());
    fixture.manager.setup_all().await.unwrap();
    assert!(fixture.manager.get_module("stats").await.is_none());

    fixture.manager.start_all().await;
    let handle = fixture.manager.get_module("stats").await.unwrap();
    assert_eq!(handle.id(), "stats");
    assert_eq!(handle.state(), ModuleState::Started);

    assert!(fixture.manager.get_module("hud").await.is_none());
    assert_eq!(state(&fixture.manager, "hud").await, ModuleState::Disabled);
    assert!(fixture.manager.get_module("unknown").await.is_none());

    let lookup = fixture.manager.lookup();
    fixture.manager.shutdown_all().await;
    assert!(!lookup.is_started("stats").await);
}

trait XpSource: Send + Sync {
    fn level_of(&self, player: &str) -> u32;
}

struct FixedXp(u32);

impl XpSource for FixedXp {
    fn level_of(&self, _player: &str) -> u32 {
        self.0
    }
}

/// Reads the leveling capability during setup
struct Quests {
    descriptor: ModuleDescriptor,
    level_seen: Arc<Mutex<Option<u32>>>,
}

#[async_trait]
impl Module for Quests {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn on_setup(&mut self, ctx: SetupContext) -> Result<(), ModuleError> {
        let xp = ctx.require_capability::<dyn XpSource>("leveling")?;
        *self.level_seen.lock().unwrap() = Some(xp.level_of("steve"));
        // Undeclared modules are not visible through the setup context
        assert!(ctx.dependency("hud").is_none());
        Ok(())
    }

    async fn on_start(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_typed_capability_lookup() {
    let mut fixture = Fixture::new();
    let xp: Arc<dyn XpSource> = Arc::new(FixedXp(7));
    fixture
        .manager
        .register(TestModule::new("leveling", &fixture.journal).with_capability(xp))
        .await
        .unwrap();
    fixture.manager.register(TestModule::new("hud", &fixture.journal).enabled()).await.unwrap();

    let level_seen = Arc::new(Mutex::new(None));
    fixture
        .manager
        .register(Quests {
            descriptor: ModuleDescriptor::new("quests")
                .depends_on("leveling")
                .enabled_by_default(true),
            level_seen: Arc::clone(&level_seen),
        })
        .await
        .unwrap();

    let report = fixture.manager.setup_all().await.unwrap();
    assert!(report.is_success());
    assert_eq!(*level_seen.lock().unwrap(), Some(7));

    assert!(fixture.manager.get_capability::<dyn XpSource>("leveling").await.is_none());
    fixture.manager.start_all().await;

    let xp = fixture
        .manager
        .get_capability::<dyn XpSource>("leveling")
        .await
        .unwrap();
    assert_eq!(xp.level_of("alex"), 7);
    assert!(fixture.manager.get_capability::<u64>("leveling").await.is_none());
}

#[tokio::test]
async fn test_missing_capability_fails_setup() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("leveling", &fixture.journal)).await.unwrap();
    fixture
        .manager
        .register(Quests {
            descriptor: ModuleDescriptor::new("quests")
                .depends_on("leveling")
                .enabled_by_default(true),
            level_seen: Arc::new(Mutex::new(None)),
        })
        .await
        .unwrap();

    let report = fixture.manager.setup_all().await.unwrap();
    assert!(matches!(
        &report.failures[0],
        OrchestratorError::ModuleSetup { module, source: ModuleError::MissingCollaborator(_) }
            if module == "quests"
    ));
    assert_eq!(state(&fixture.manager, "leveling").await, ModuleState::Setup);
}

#[tokio::test]
async fn test_cycle_rejected_without_side_effects() {
    let mut fixture = Fixture::new();
    fixture
        .manager
        .register(TestModule::new("x", &fixture.journal).enabled().depends_on("y"))
        .await
        .unwrap();
    fixture.manager.register(TestModule::new("y", &fixture.journal).depends_on("x")).await.unwrap();
    fixture.manager.register(TestModule::new("z", &fixture.journal).enabled()).await.unwrap();

    let err = fixture.manager.setup_all().await.unwrap_err();
    match err {
        OrchestratorError::DependencyCycle { cycle } => {
            assert!(cycle.contains(&"x".to_string()));
            assert!(cycle.contains(&"y".to_string()));
            assert_eq!(cycle.first(), cycle.last());
        }
        other => panic!("expected a cycle, got {other}"),
    }

    assert!(fixture.journal.is_empty());
    let statuses = fixture.manager.list_modules().await;
    let y = statuses.iter().find(|s| s.id == "y").unwrap();
    assert!(!y.enabled);
    assert!(statuses.iter().all(|s| s.state == ModuleState::Disabled));
}

#[tokio::test]
async fn test_missing_dependency_sets_nothing_up() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("core", &fixture.journal).enabled()).await.unwrap();
    fixture
        .manager
        .register(TestModule::new("bounties", &fixture.journal).enabled().depends_on("ghost"))
        .await
        .unwrap();

    let err = fixture.manager.setup_all().await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::UnresolvedDependency { ref module, ref missing }
            if module == "bounties" && missing == "ghost"
    ));
    assert!(err.is_configuration_error());
    assert!(fixture.journal.is_empty());
    assert_eq!(state(&fixture.manager, "core").await, ModuleState::Disabled);
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("claims", &fixture.journal)).await.unwrap();
    let err = fixture
        .manager
        .register(TestModule::new("claims", &fixture.journal))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateModule { ref id } if id == "claims"));
    assert_eq!(fixture.manager.list_modules().await.len(), 1);
}

#[tokio::test]
async fn test_set_enabled_respects_dependents() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("economy", &fixture.journal).enabled()).await.unwrap();
    fixture
        .manager
        .register(TestModule::new("traders", &fixture.journal).enabled().depends_on("economy"))
        .await
        .unwrap();

    let err = fixture.manager.set_enabled("economy", false).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::DependencyRequired { ref module, ref required_by }
            if module == "economy" && required_by == "traders"
    ));

    fixture.manager.set_enabled("traders", false).await.unwrap();
    fixture.manager.set_enabled("economy", false).await.unwrap();
    assert!(matches!(
        fixture.manager.set_enabled("ghost", true).await,
        Err(OrchestratorError::ModuleNotFound(_))
    ));

    let report = fixture.manager.setup_all().await.unwrap();
    assert!(report.activation_order.is_empty());
}

#[tokio::test]
async fn test_reload_stops_disabled_and_starts_newly_enabled() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("a", &fixture.journal).enabled()).await.unwrap();
    fixture.manager.register(TestModule::new("b", &fixture.journal).enabled()).await.unwrap();
    fixture.manager.register(TestModule::new("c", &fixture.journal)).await.unwrap();

    fixture.manager.setup_all().await.unwrap();
    fixture.manager.start_all().await;
    assert_eq!(fixture.manager.activation_order(), ["a", "b"]);

    fixture.manager.set_enabled("b", false).await.unwrap();
    fixture.manager.set_enabled("c", true).await.unwrap();

    let report = fixture.manager.setup_all().await.unwrap();
    assert_eq!(report.stopped, vec!["b"]);
    assert_eq!(report.activation_order, vec!["a", "c"]);
    assert_eq!(report.succeeded, vec!["c"]);
    assert_eq!(fixture.journal.phase("shutdown"), vec!["b"]);
    assert_eq!(state(&fixture.manager, "b").await, ModuleState::Stopped);
    assert!(fixture.manager.get_module("b").await.is_none());

    let report = fixture.manager.start_all().await;
    assert_eq!(report.succeeded, vec!["c"]);
    assert_eq!(fixture.journal.phase("start"), vec!["a", "b", "c"]);

    // Stopped is terminal, so re-enabling does not set the module up again
    fixture.manager.set_enabled("b", true).await.unwrap();
    let report = fixture.manager.setup_all().await.unwrap();
    assert!(report.succeeded.is_empty());
    assert!(report.stopped.is_empty());
    assert_eq!(fixture.journal.phase("setup"), vec!["a", "b", "c"]);
    assert_eq!(state(&fixture.manager, "b").await, ModuleState::Stopped);

    let report = fixture.manager.shutdown_all().await;
    assert_eq!(report.stopped, vec!["c", "a"]);
    assert_eq!(fixture.journal.phase("shutdown"), vec!["b", "c", "a"]);
    for id in ["a", "b", "c"] {
        assert_eq!(state(&fixture.manager, id).await, ModuleState::Stopped);
    }
}

#[tokio::test]
async fn test_reload_stops_dropped_modules_in_reverse_order() {
    let mut fixture = Fixture::new();
    fixture.manager.register(TestModule::new("base", &fixture.journal).enabled()).await.unwrap();
    fixture.manager.register(TestModule::new("bank", &fixture.journal).enabled()).await.unwrap();
    fixture
        .manager
        .register(TestModule::new("shops", &fixture.journal).enabled().depends_on("bank"))
        .await
        .unwrap();

    fixture.manager.setup_all().await.unwrap();
    fixture.manager.start_all().await;
    assert_eq!(fixture.manager.activation_order(), ["bank", "base", "shops"]);

    let mut enablement = BTreeMap::new();
    enablement.insert("bank".to_string(), false);
    enablement.insert("shops".to_string(), false);
    fixture.manager.set_enablement(enablement);

    let report = fixture.manager.setup_all().await.unwrap();
    assert_eq!(report.stopped, vec!["shops", "bank"]);
    assert!(report.succeeded.is_empty());
    assert_eq!(fixture.journal.phase("shutdown"), vec!["shops", "bank"]);
    assert_eq!(state(&fixture.manager, "base").await, ModuleState::Started);

    let report = fixture.manager.shutdown_all().await;
    assert_eq!(report.stopped, vec!["base"]);
    for id in ["bank", "base", "shops"] {
        assert_eq!(state(&fixture.manager, id).await, ModuleState::Stopped);
    }
}

#[tokio::test]
async fn test_config_disable_loses_to_dependent() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let mut config = PluginConfig {
        config_dir: temp_dir.path().display().to_string(),
        ..PluginConfig::default()
    };
    config.modules.insert("core".to_string(), false);
    config.modules.insert("economy".to_string(), true);

    let journal = Journal::new();
    let mut manager = ModuleManager::with_config(&config);
    manager.register(TestModule::new("core", &journal)).await.unwrap();
    manager
        .register(TestModule::new("economy", &journal).depends_on("core"))
        .await
        .unwrap();

    let report = manager.setup_all().await.unwrap();
    assert_eq!(report.activation_order, vec!["core", "economy"]);
    manager.start_all().await;

    let core = manager
        .list_modules()
        .await
        .into_iter()
        .find(|s| s.id == "core")
        .unwrap();
    assert!(core.enabled);
    assert_eq!(core.state, ModuleState::Started);
}

#[tokio::test]
async fn test_background_tasks_cancelled_on_shutdown() {
    let mut fixture = Fixture::new();
    let module = TestModule::new("hunger", &fixture.journal).enabled();
    let slot = module.task_slot();
    fixture.manager.register(module).await.unwrap();

    fixture.manager.setup_all().await.unwrap();
    let tasks = slot.lock().unwrap().clone().unwrap();
    tasks
        .spawn_periodic("decay", Duration::from_millis(10), || async {})
        .await;
    assert_eq!(tasks.active_tasks().await, 1);

    fixture.manager.start_all().await;
    fixture.manager.shutdown_all().await;

    assert!(tasks.is_cancelled());
    assert_eq!(tasks.active_tasks().await, 0);
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct ClaimsConfig {
    max_claims: u32,
}

/// Persists its configuration on first setup and subscribes to events
struct Claims {
    descriptor: ModuleDescriptor,
    config: Option<ClaimsConfig>,
}

#[async_trait]
impl Module for Claims {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn on_setup(&mut self, ctx: SetupContext) -> Result<(), ModuleError> {
        self.config = Some(ctx.config_dir().load_or_init()?);
        let _events = ctx.events().subscribe("claims", &["player.join"]).await;
        ctx.logger().info("claims ready");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<(), ModuleError> {
        match &self.config {
            Some(config) if config.max_claims == 0 => Ok(()),
            Some(_) => Err(ModuleError::ConfigError("unexpected claim limit".to_string())),
            None => Err(ModuleError::ConfigError("not configured".to_string())),
        }
    }

    async fn on_shutdown(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_config_dir_and_event_cleanup() {
    let mut fixture = Fixture::new();
    fixture
        .manager
        .register(Claims {
            descriptor: ModuleDescriptor::new("claims").enabled_by_default(true),
            config: None,
        })
        .await
        .unwrap();

    fixture.manager.setup_all().await.unwrap();
    let config_file = fixture.temp_dir.path().join("claims").join("config.toml");
    assert!(config_file.exists());

    let events = Arc::clone(fixture.manager.context().events());
    assert_eq!(events.get_subscribers("player.join").await, vec!["claims"]);

    assert!(fixture.manager.start_all().await.is_success());
    fixture.manager.shutdown_all().await;
    assert!(events.get_subscribers("player.join").await.is_empty());
}

#[tokio::test]
async fn test_apply_config_reports_unknown_ids() {
    let mut fixture = Fixture::new();
    fixture
        .manager
        .register(TestModule::new("hud", &fixture.journal).enabled())
        .await
        .unwrap();

    let mut config = PluginConfig::default();
    config.modules.insert("hud".to_string(), false);
    config.modules.insert("retired".to_string(), true);

    let unknown = fixture.manager.apply_config(&config).await;
    assert_eq!(unknown, vec!["retired"]);

    let report = fixture.manager.setup_all().await.unwrap();
    assert!(report.activation_order.is_empty());
    assert_eq!(state(&fixture.manager, "hud").await, ModuleState::Disabled);
}

#[tokio::test]
async fn test_host_owned_event_bus() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let bus = Arc::new(survival_modules::module::api::EventBus::with_capacity(8));
    let mut manager =
        ModuleManager::new(temp_dir.path()).map_context(|ctx| ctx.with_event_bus(Arc::clone(&bus)));

    manager
        .register(Claims {
            descriptor: ModuleDescriptor::new("claims").enabled_by_default(true),
            config: None,
        })
        .await
        .unwrap();
    manager.setup_all().await.unwrap();

    assert_eq!(bus.get_subscribers("player.join").await, vec!["claims"]);
    assert!(Arc::ptr_eq(manager.context().events(), &bus));
}
