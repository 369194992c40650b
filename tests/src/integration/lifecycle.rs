//! # Lifecycle Integration Tests
//!
//! Dependency gating, disposal cascades and reference-counted teardown of
//! runtimes and forks.

#[cfg(test)]
mod tests {
    use scope_kernel::{Context, EventTopic, KernelError, KernelEvent, Plugin, Service};
    use serde_json::json;

    use crate::support::{record_topics, Counter, Journal};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Plugin depending on `foo`, counting starts and stops.
    fn gated(name: &str, reusable: bool, started: &Counter, stopped: &Counter) -> Plugin {
        let started = started.clone();
        let stopped = stopped.clone();
        let builder = Plugin::builder(name).inject(["foo"]).apply(move |ctx, _| {
            started.hit();
            let stopped = stopped.clone();
            ctx.on_dispose(move || stopped.hit());
            Ok(())
        });
        if reusable {
            builder.reusable().build()
        } else {
            builder.build()
        }
    }

    const HOOKS: [&str; 2] = ["listener <ServiceUnbinding>", "listener <ServiceBound>"];

    // =============================================================================
    // DEPENDENCY GATING
    // =============================================================================

    #[test]
    fn test_fork_waits_for_dependency() {
        let root = Context::new();
        let (started, stopped) = (Counter::new(), Counter::new());
        let fork = root
            .plugin(&gated("gated", true, &started, &stopped), json!({}))
            .unwrap();

        assert_eq!(started.get(), 0);
        assert_eq!(fork.using(), vec!["foo"]);
        assert_eq!(fork.disposable_labels(), HOOKS);

        root.set("foo", Some(Service::data(1u8))).unwrap();
        assert_eq!(started.get(), 1);
        assert_eq!(fork.disposables(), 3);

        root.set("foo", None).unwrap();
        assert_eq!(stopped.get(), 1);
        assert_eq!(started.get(), 1);
        assert_eq!(fork.disposable_labels(), HOOKS);

        root.set("foo", Some(Service::data(2u8))).unwrap();
        assert_eq!(started.get(), 2);
        assert_eq!(stopped.get(), 1);
    }

    #[test]
    fn test_runtime_watches_dependency_for_shared_instance() {
        let root = Context::new();
        let (started, stopped) = (Counter::new(), Counter::new());
        let fork = root
            .plugin(&gated("shared", false, &started, &stopped), json!({}))
            .unwrap();
        let runtime = fork.runtime();

        // hooks plus the fork entry, nothing on the fork itself
        assert_eq!(runtime.disposables(), 3);
        assert_eq!(fork.disposables(), 0);

        root.set("foo", Some(Service::data(()))).unwrap();
        assert_eq!(started.get(), 1);
        assert_eq!(runtime.disposables(), 4);

        root.set("foo", None).unwrap();
        assert_eq!(stopped.get(), 1);
        assert_eq!(runtime.disposables(), 3);
    }

    #[test]
    fn test_body_runs_immediately_when_dependency_present() {
        let root = Context::new();
        root.set("foo", Some(Service::data("ready"))).unwrap();
        let (started, stopped) = (Counter::new(), Counter::new());

        root.plugin(&gated("eager", true, &started, &stopped), json!({}))
            .unwrap();
        assert_eq!(started.get(), 1);
    }

    // =============================================================================
    // DISPOSAL
    // =============================================================================

    #[test]
    fn test_dispose_twice_same_as_once() {
        let root = Context::new();
        let plugin = Plugin::function("twice", |_, _| Ok(()));
        let a = root.plugin(&plugin, json!({})).unwrap();
        let b = root.plugin(&plugin, json!({})).unwrap();
        let runtime = a.runtime();

        assert!(a.dispose());
        assert!(!a.dispose());
        assert_eq!(runtime.children(), vec![b]);
        assert!(runtime.is_active());
    }

    #[test]
    fn test_reference_counted_teardown() {
        let root = Context::new();
        let (started, stopped) = (Counter::new(), Counter::new());
        let plugin = gated("counted", true, &started, &stopped);
        let a = root.plugin(&plugin, json!({"n": 1})).unwrap();
        let b = root.plugin(&plugin, json!({"n": 2})).unwrap();
        let runtime = root.registry().get(&plugin).unwrap();

        a.dispose();
        assert!(runtime.is_active());
        assert_eq!(runtime.children().len(), 1);
        assert_eq!(root.registry().len(), 1);

        b.dispose();
        assert!(!runtime.is_active());
        assert!(root.registry().is_empty());
    }

    #[test]
    fn test_registry_delete_disposes_every_fork() {
        let root = Context::new();
        let plugin = Plugin::builder("multi").reusable().apply(|_, _| Ok(())).build();
        let a = root.plugin(&plugin, json!({})).unwrap();
        let b = root.plugin(&plugin, json!({})).unwrap();

        assert!(root.registry().delete(&plugin));
        assert!(!a.is_active());
        assert!(!b.is_active());
        assert!(!root.registry().delete(&plugin));
        assert_eq!(root.state().disposables(), 0);
    }

    #[test]
    fn test_reregistration_reproduces_hooks() {
        let root = Context::new();
        let baseline = root.listener_snapshot();
        let (started, stopped) = (Counter::new(), Counter::new());
        let plugin = gated("leak", false, &started, &stopped);

        let first = root.plugin(&plugin, json!({})).unwrap();
        let labels = first.runtime().disposable_labels();
        let listeners = root.listener_snapshot();
        assert_eq!(labels, vec![HOOKS[0], HOOKS[1], "fork <leak>"]);

        first.dispose();
        assert_eq!(root.listener_snapshot(), baseline);
        assert_eq!(root.state().disposables(), 0);

        let second = root.plugin(&plugin, json!({})).unwrap();
        assert_eq!(second.runtime().disposable_labels(), labels);
        assert_eq!(root.listener_snapshot(), listeners);
        assert_eq!(root.state().disposable_labels(), vec!["fork <leak>"]);
    }

    #[test]
    fn test_parent_restart_replaces_nested_fork() {
        let root = Context::new();
        let (child_started, child_stopped) = (Counter::new(), Counter::new());
        let child = {
            let started = child_started.clone();
            let stopped = child_stopped.clone();
            Plugin::function("child", move |ctx, _| {
                started.hit();
                let stopped = stopped.clone();
                ctx.on_dispose(move || stopped.hit());
                Ok(())
            })
        };
        let parent = Plugin::function("parent", move |ctx, _| {
            ctx.plugin(&child, json!({}))?;
            Ok(())
        });

        let fork = root.plugin(&parent, json!({})).unwrap();
        assert_eq!(child_started.get(), 1);
        assert_eq!(root.registry().len(), 2);

        fork.runtime().restart();
        assert_eq!(child_stopped.get(), 1);
        assert_eq!(child_started.get(), 2);
        assert_eq!(root.registry().len(), 2);

        fork.dispose();
        assert_eq!(child_stopped.get(), 2);
        assert!(root.registry().is_empty());
    }

    #[test]
    fn test_stale_scope_rejects_plugins() {
        let root = Context::new();
        let scopes: Journal<Context> = Journal::new();
        let sink = scopes.clone();
        let plugin = Plugin::builder("holder")
            .reusable()
            .apply(move |ctx, _| {
                sink.push(ctx.clone());
                Ok(())
            })
            .build();

        let fork = root.plugin(&plugin, json!({})).unwrap();
        let saved = scopes.last().unwrap();
        assert!(fork.context().unwrap().same_scope(&saved));
        let id = fork.uid().unwrap();

        fork.dispose();
        let other = Plugin::function("late", |_, _| Ok(()));
        assert_eq!(
            saved.plugin(&other, json!({})).unwrap_err(),
            KernelError::Disposed(id)
        );
        assert!(!root.registry().has(&other));
    }

    // =============================================================================
    // EVENTS AND FAILURES
    // =============================================================================

    #[test]
    fn test_lifecycle_event_order() {
        let root = Context::new();
        let events = record_topics(
            &root,
            vec![
                EventTopic::RuntimeCreated,
                EventTopic::ForkCreated,
                EventTopic::ForkDisposed,
                EventTopic::RuntimeDisposed,
            ],
        );

        let fork = root
            .plugin(&Plugin::function("observed", |_, _| Ok(())), json!({}))
            .unwrap();
        fork.dispose();

        let topics: Vec<EventTopic> = events.entries().iter().map(KernelEvent::topic).collect();
        assert_eq!(
            topics,
            vec![
                EventTopic::RuntimeCreated,
                EventTopic::ForkCreated,
                EventTopic::RuntimeDisposed,
                EventTopic::ForkDisposed,
            ]
        );
    }

    #[test]
    fn test_failing_body_is_reported() {
        let root = Context::new();
        let failures = record_topics(&root, vec![EventTopic::PluginFailed]);

        let fork = root
            .plugin(
                &Plugin::function("broken", |_, _| anyhow::bail!("no luck")),
                json!({}),
            )
            .unwrap();
        assert!(fork.is_active());

        root.plugin(
            &Plugin::function("panicky", |_, _| panic!("boom")),
            json!({}),
        )
        .unwrap();

        let messages: Vec<(String, String)> = failures
            .entries()
            .into_iter()
            .filter_map(|event| match event {
                KernelEvent::PluginFailed {
                    plugin, message, ..
                } => Some((plugin, message)),
                _ => None,
            })
            .collect();
        assert_eq!(
            messages,
            vec![
                ("broken".to_string(), "no luck".to_string()),
                ("panicky".to_string(), "boom".to_string()),
            ]
        );
    }
}
