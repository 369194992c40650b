//! # Config Update Integration Tests
//!
//! Live patches versus restarts, per-fork configs of forkable plugins,
//! propagation of runtime defaults and updates of gated forks.

#[cfg(test)]
mod tests {
    use scope_kernel::{
        Acceptor, Context, EventTopic, KernelConfig, KernelError, KernelEvent, Plugin, Service,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    use crate::support::{record_topics, ConfigLog, Counter};

    fn anomaly_kinds(events: &[KernelEvent]) -> Vec<&'static str> {
        events
            .iter()
            .filter_map(|event| match event {
                KernelEvent::Anomaly(anomaly) => Some(anomaly.kind()),
                _ => None,
            })
            .collect()
    }

    // =============================================================================
    // ACCEPT / DECLINE
    // =============================================================================

    #[test]
    fn test_accepted_key_patches_and_declined_key_restarts() {
        let root = Context::new();
        let runs = ConfigLog::new();
        let patched = ConfigLog::new();
        let plugin = {
            let runs = runs.clone();
            let patched = patched.clone();
            Plugin::function("p", move |ctx, config| {
                runs.push(config.clone());
                let patched = patched.clone();
                ctx.accept(Acceptor::keys(["foo"]).on_change(move |config| {
                    patched.push(config.clone());
                    false
                }));
                Ok(())
            })
        };

        let fork = root.plugin(&plugin, json!({"foo": 1})).unwrap();
        assert_eq!(runs.entries(), vec![json!({"foo": 1})]);

        fork.update(json!({"foo": 2})).unwrap();
        assert_eq!(patched.entries(), vec![json!({"foo": 2})]);
        assert_eq!(runs.len(), 1);
        assert_eq!(*fork.config(), json!({"foo": 2}));

        fork.update(json!({"foo": 2, "bar": 3})).unwrap();
        assert_eq!(patched.len(), 1);
        assert_eq!(
            runs.entries(),
            vec![json!({"foo": 1}), json!({"foo": 2, "bar": 3})]
        );
    }

    #[test]
    fn test_decline_overrides_wildcard() {
        let root = Context::new();
        let runs = Counter::new();
        let plugin = {
            let runs = runs.clone();
            Plugin::function("declining", move |ctx, _| {
                runs.hit();
                ctx.accept(Acceptor::all());
                ctx.decline(["b"]);
                Ok(())
            })
        };
        let fork = root.plugin(&plugin, json!({"a": 1, "b": 1})).unwrap();

        fork.update(json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(runs.get(), 1);

        fork.update(json!({"a": 2, "b": 2})).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_immediate_acceptor_sees_current_config() {
        let root = Context::new();
        let seen = ConfigLog::new();
        let plugin = {
            let seen = seen.clone();
            Plugin::function("eager", move |ctx, _| {
                let seen = seen.clone();
                ctx.accept(
                    Acceptor::keys(["level"])
                        .on_change(move |config| {
                            seen.push(config.clone());
                            false
                        })
                        .immediate(),
                );
                Ok(())
            })
        };
        let fork = root.plugin(&plugin, json!({"level": 1})).unwrap();
        assert_eq!(seen.entries(), vec![json!({"level": 1})]);

        fork.update(json!({"level": 2})).unwrap();
        assert_eq!(seen.entries(), vec![json!({"level": 1}), json!({"level": 2})]);
    }

    // =============================================================================
    // FORKABLE PLUGINS
    // =============================================================================

    #[test]
    fn test_forks_update_independently() {
        let root = Context::new();
        let runs = ConfigLog::new();
        let updates = record_topics(&root, vec![EventTopic::ConfigUpdated]);
        let plugin = {
            let runs = runs.clone();
            Plugin::builder("player")
                .reusable()
                .apply(move |ctx, config| {
                    runs.push(config["label"].clone());
                    ctx.accept(Acceptor::keys(["volume"]));
                    Ok(())
                })
                .build()
        };
        let a = root.plugin(&plugin, json!({"label": "a", "volume": 1})).unwrap();
        let b = root.plugin(&plugin, json!({"label": "b", "volume": 1})).unwrap();
        assert_eq!(runs.len(), 2);

        a.update(json!({"label": "a", "volume": 5})).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(a.config()["volume"], json!(5));
        assert_eq!(b.config()["volume"], json!(1));

        a.update(json!({"label": "a2", "volume": 5})).unwrap();
        assert_eq!(
            runs.entries(),
            vec![json!("a"), json!("b"), json!("a2")]
        );
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_on_fork_runs_per_fork() {
        let root = Context::new();
        let (applied, forked) = (Counter::new(), Counter::new());
        let plugin = {
            let applied = applied.clone();
            let forked = forked.clone();
            Plugin::function("host", move |ctx, _| {
                applied.hit();
                let forked = forked.clone();
                ctx.on_fork(move |_, _| {
                    forked.hit();
                    Ok(())
                });
                Ok(())
            })
        };

        let first = root.plugin(&plugin, json!({})).unwrap();
        root.plugin(&plugin, json!({})).unwrap();
        let runtime = first.runtime();
        assert!(runtime.is_forkable());
        assert_eq!(applied.get(), 1);
        assert_eq!(forked.get(), 2);

        runtime.restart();
        assert_eq!(applied.get(), 2);
        assert_eq!(forked.get(), 4);
    }

    #[test]
    fn test_fork_body_makes_plugin_forkable() {
        let root = Context::new();
        let forked = ConfigLog::new();
        let plugin = {
            let forked = forked.clone();
            Plugin::builder("split")
                .apply(|_, _| Ok(()))
                .fork(move |_, config| {
                    forked.push(config.clone());
                    Ok(())
                })
                .build()
        };
        root.plugin(&plugin, json!({"n": 1})).unwrap();
        root.plugin(&plugin, json!({"n": 2})).unwrap();
        assert_eq!(forked.entries(), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    // =============================================================================
    // RUNTIME DEFAULTS
    // =============================================================================

    #[test]
    fn test_runtime_update_reaches_forks_sharing_default() {
        let root = Context::new();
        let runs = ConfigLog::new();
        let events = record_topics(&root, vec![EventTopic::ConfigUpdated, EventTopic::Anomaly]);
        let plugin = {
            let runs = runs.clone();
            Plugin::function("single", move |_, config| {
                runs.push(config.clone());
                Ok(())
            })
        };

        let shared = root.plugin(&plugin, json!({"x": 1})).unwrap();
        let diverged = root.plugin(&plugin, json!({"x": 1})).unwrap();
        assert_eq!(anomaly_kinds(&events.entries()), vec!["duplicate-plugin"]);

        shared.runtime().update(json!({"x": 2})).unwrap();
        assert_eq!(*shared.config(), json!({"x": 2}));
        assert_eq!(*diverged.config(), json!({"x": 1}));
        assert_eq!(runs.entries(), vec![json!({"x": 1}), json!({"x": 2})]);

        // no body ever saw a diverged config of a shared instance
        diverged.update(json!({"x": 3})).unwrap();
        assert_eq!(*diverged.config(), json!({"x": 1}));
        assert_eq!(*shared.runtime().config(), json!({"x": 2}));
        assert_eq!(runs.len(), 2);

        let updated: Vec<_> = events
            .entries()
            .into_iter()
            .filter(|event| event.topic() == EventTopic::ConfigUpdated)
            .collect();
        assert_eq!(updated.len(), 1);
    }

    #[test]
    fn test_shared_fork_update_announces_only_itself() {
        let root = Context::new();
        let runs = ConfigLog::new();
        let updates = record_topics(&root, vec![EventTopic::ConfigUpdated]);
        let plugin = {
            let runs = runs.clone();
            Plugin::function("single", move |_, config| {
                runs.push(config.clone());
                Ok(())
            })
        };
        let shared = root.plugin(&plugin, json!({"x": 1})).unwrap();
        let other = root.plugin(&plugin, json!({"x": 1})).unwrap();

        shared.update(json!({"x": 2})).unwrap();
        assert_eq!(*shared.config(), json!({"x": 2}));
        assert_eq!(*shared.runtime().config(), json!({"x": 2}));
        assert_eq!(*other.config(), json!({"x": 1}));
        assert_eq!(runs.entries(), vec![json!({"x": 1}), json!({"x": 2})]);

        let announced: Vec<_> = updates
            .entries()
            .into_iter()
            .filter_map(|event| match event {
                KernelEvent::ConfigUpdated { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(announced, vec![shared.uid().unwrap()]);

        // `other` was created with its own snapshot, so it never shared the default
        other.update(json!({"x": 5})).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn test_forkable_runtime_update_is_reported() {
        let root = Context::new();
        let anomalies = record_topics(&root, vec![EventTopic::Anomaly]);
        let plugin = Plugin::builder("many").reusable().apply(|_, _| Ok(())).build();
        let fork = root.plugin(&plugin, json!({"x": 1})).unwrap();

        fork.runtime().update(json!({"x": 2})).unwrap();
        assert_eq!(anomaly_kinds(&anomalies.entries()), vec!["forkable-runtime-update"]);
        assert_eq!(*fork.config(), json!({"x": 2}));
    }

    #[test]
    fn test_strict_mode_rejects_forkable_runtime_update() {
        let root = Context::with_config(KernelConfig::default().with_strict_forkable_updates(true));
        let plugin = Plugin::builder("many").reusable().apply(|_, _| Ok(())).build();
        let fork = root.plugin(&plugin, json!({"x": 1})).unwrap();

        assert_eq!(
            fork.runtime().update(json!({"x": 2})),
            Err(KernelError::AmbiguousUpdate {
                plugin: "many".to_string()
            })
        );
        assert_eq!(*fork.config(), json!({"x": 1}));
    }

    // =============================================================================
    // GATED AND NESTED UPDATES
    // =============================================================================

    #[test]
    fn test_update_of_gated_fork_applies_on_start() {
        let root = Context::new();
        let runs = ConfigLog::new();
        let plugin = {
            let runs = runs.clone();
            Plugin::builder("deferred")
                .inject(["dep"])
                .reusable()
                .apply(move |ctx, config| {
                    runs.push(config.clone());
                    ctx.accept(Acceptor::keys(["mode"]));
                    Ok(())
                })
                .build()
        };
        let fork = root.plugin(&plugin, json!({"mode": "a"})).unwrap();

        fork.update(json!({"mode": "b"})).unwrap();
        assert!(runs.is_empty());
        assert_eq!(fork.disposables(), 2);

        root.set("dep", Some(Service::data(()))).unwrap();
        assert_eq!(runs.entries(), vec![json!({"mode": "b"})]);
        assert_eq!(fork.disposables(), 3);
        assert_eq!(fork.runtime().disposables(), 1);

        fork.update(json!({"mode": "c"})).unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_acceptor_forwards_update_to_nested_fork() {
        let root = Context::new();
        let (parent_runs, child_runs) = (Counter::new(), ConfigLog::new());
        let child = {
            let child_runs = child_runs.clone();
            Plugin::function("child", move |_, config| {
                child_runs.push(config.clone());
                Ok(())
            })
        };
        let parent = {
            let parent_runs = parent_runs.clone();
            Plugin::function("parent", move |ctx, config| {
                parent_runs.hit();
                let nested = ctx.plugin(&child, config["child"].clone())?;
                ctx.accept(Acceptor::keys(["child"]).on_change(move |config| {
                    if let Err(err) = nested.update(config["child"].clone()) {
                        tracing::warn!(error = %err, "nested update failed");
                    }
                    false
                }));
                Ok(())
            })
        };

        let fork = root
            .plugin(&parent, json!({"child": {"level": 1}}))
            .unwrap();
        fork.update(json!({"child": {"level": 2}})).unwrap();

        assert_eq!(parent_runs.get(), 1);
        assert_eq!(
            child_runs.entries(),
            vec![json!({"level": 1}), json!({"level": 2})]
        );
    }

    // =============================================================================
    // VALIDATION
    // =============================================================================

    fn default_max() -> u32 {
        10
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Limits {
        #[serde(default = "default_max")]
        max: u32,
    }

    #[test]
    fn test_schema_normalises_config() {
        let root = Context::new();
        let runs = ConfigLog::new();
        let plugin = {
            let runs = runs.clone();
            Plugin::builder("limited")
                .schema::<Limits>()
                .apply(move |_, config| {
                    runs.push(config.clone());
                    Ok(())
                })
                .build()
        };

        let fork = root.plugin(&plugin, Value::Null).unwrap();
        assert_eq!(runs.entries(), vec![json!({"max": 10})]);

        let err = fork.update(json!({"max": "lots"})).unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig { ref plugin, .. } if plugin == "limited"));
        assert_eq!(*fork.config(), json!({"max": 10}));
    }

    #[test]
    fn test_invalid_config_registers_nothing() {
        let root = Context::new();
        let plugin = Plugin::builder("strict")
            .schema::<Limits>()
            .apply(|_, _| Ok(()))
            .build();

        assert!(root.plugin(&plugin, json!({"max": -1})).is_err());
        assert!(!root.registry().has(&plugin));
    }
}
