use avisor_core::testing::{CountingHandler, RecordingHandler};
use avisor_core::{AvisorCore, HookResult, Options, Payload, Value};
use regex::Regex;
use std::sync::{Arc, Mutex};

mod common;
use common::InstallWith;

fn opts(pairs: &[(&str, Value)]) -> Options {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_keyed_hook_only_runs_for_matching_options() {
    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("inspector", {
            let seen = seen.clone();
            move |host| {
                let seen = seen.clone();
                host.before_on.key("limit", move |ctx| {
                    seen.lock().unwrap().push(ctx.option.clone());
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on_with(
        "a",
        handler.handler(),
        opts(&[("limit", Value::Int(3))]),
    )
    .on("b", handler.handler());
    bus.settled().await;

    assert_eq!(*seen.lock().unwrap(), vec![Some(Value::Int(3))]);
}

#[tokio::test]
async fn test_before_on_hook_can_overwrite_the_handler() {
    let replacement = CountingHandler::new();
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("swapper", {
            let replacement = replacement.handler();
            move |host| {
                let replacement = replacement.clone();
                host.before_on.key("swap", move |_ctx| {
                    let replacement = replacement.clone();
                    async move { HookResult::next().overwrite_handler(replacement) }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let original = CountingHandler::new();
    bus.on_with("e", original.handler(), opts(&[("swap", Value::Bool(true))]))
        .emit("e", Payload::none());
    bus.settled().await;

    assert_eq!(original.count(), 0);
    assert_eq!(replacement.count(), 1);
}

#[tokio::test]
async fn test_break_stops_the_phase_but_not_the_dispatch() {
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("breaker", {
            let order = order.clone();
            move |host| {
                let first = order.clone();
                host.before_publish.all(move |_ctx| {
                    first.lock().unwrap().push(1);
                    async { HookResult::next().break_phase() }
                });
                let second = order.clone();
                host.before_publish.all(move |_ctx| {
                    second.lock().unwrap().push(2);
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on("e", handler.handler()).emit("e", Payload::none());
    bus.settled().await;

    assert_eq!(*order.lock().unwrap(), vec![1]);
    assert_eq!(handler.count(), 1);
}

#[tokio::test]
async fn test_kill_in_before_publish_aborts_one_dispatch() {
    let after_ran: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("killer", {
            let after_ran = after_ran.clone();
            move |host| {
                host.before_publish.key("kill", |_ctx| async {
                    HookResult::next().kill()
                });
                let after_ran = after_ran.clone();
                host.after_publish.all(move |_ctx| {
                    after_ran.lock().unwrap().push(1);
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let killed = CountingHandler::new();
    let spared = CountingHandler::new();
    bus.on_with("e", killed.handler(), opts(&[("kill", Value::Bool(true))]))
        .on("e", spared.handler())
        .emit("e", Payload::none());
    bus.settled().await;

    assert_eq!(killed.count(), 0);
    assert_eq!(spared.count(), 1);
    // after-publish only ran for the surviving dispatch
    assert_eq!(after_ran.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_kill_in_on_emit_cancels_the_whole_publish() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("gate", |host| {
            host.on_emit.all(|_ctx| async { HookResult::next().kill() });
            Ok(())
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on("e", handler.handler())
        .on("*", handler.handler())
        .emit("e", Payload::none());
    bus.settled().await;

    assert_eq!(handler.count(), 0);
}

#[tokio::test]
async fn test_on_emit_payload_overwrite_reaches_every_subscriber() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("rewriter", |host| {
            host.on_emit.all(|_ctx| async {
                HookResult::next().overwrite_payload(Payload::new(99i64))
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let first = RecordingHandler::new();
    let second = RecordingHandler::new();
    bus.on("e", first.handler())
        .on("*", second.handler())
        .emit("e", Payload::new(1i64));
    bus.settled().await;

    for recorder in [&first, &second] {
        let payloads = recorder.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].downcast_ref::<i64>(), Some(&99));
    }
}

#[tokio::test]
async fn test_before_publish_payload_overwrite_is_per_dispatch() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("masker", |host| {
            host.before_publish.key("mask", |_ctx| async {
                HookResult::next().overwrite_payload(Payload::new("masked"))
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let masked = RecordingHandler::new();
    let plain = RecordingHandler::new();
    bus.on_with("e", masked.handler(), opts(&[("mask", Value::Bool(true))]))
        .on("e", plain.handler())
        .emit("e", Payload::new(1i64));
    bus.settled().await;

    assert_eq!(masked.payloads()[0].downcast_ref::<&str>(), Some(&"masked"));
    assert_eq!(plain.payloads()[0].downcast_ref::<i64>(), Some(&1));
}

#[tokio::test]
async fn test_after_publish_overwrite_cannot_reach_the_handler() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("late-rewriter", |host| {
            host.after_publish.all(|_ctx| async {
                HookResult::next().overwrite_payload(Payload::new("too late"))
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let recorder = RecordingHandler::new();
    bus.on("e", recorder.handler()).emit("e", Payload::new(1i64));
    bus.settled().await;

    assert_eq!(recorder.payloads()[0].downcast_ref::<i64>(), Some(&1));
}

#[tokio::test]
async fn test_tags_accumulate_through_the_phases() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("tagger", |host| {
            host.on_emit
                .all(|_ctx| async { HookResult::next().add_tag("audited") });
            host.before_publish.all(|_ctx| async {
                HookResult::next().add_tag("final").remove_tag("origin")
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let recorder = RecordingHandler::new();
    bus.on("e", recorder.handler());
    bus.emit_tagged("e", Payload::none(), vec![Value::from("origin")]);
    bus.settled().await;

    let infos = recorder.infos();
    assert_eq!(
        infos[0].tags,
        vec![Value::from("audited"), Value::from("final")],
    );
}

#[tokio::test]
async fn test_one_result_can_rewrite_payload_and_tags_together() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("stamper", |host| {
            host.on_emit.all(|_ctx| async {
                HookResult::next()
                    .overwrite_payload(Payload::new(2i64))
                    .add_tag("stamped")
            });
            host.before_publish.all(|_ctx| async {
                HookResult::next()
                    .overwrite_payload(Payload::new(3i64))
                    .add_tag("sealed")
                    .remove_tag("origin")
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let recorder = RecordingHandler::new();
    bus.on("e", recorder.handler());
    bus.emit_tagged("e", Payload::new(1i64), vec![Value::from("origin")]);
    bus.settled().await;

    assert_eq!(recorder.payloads()[0].downcast_ref::<i64>(), Some(&3));
    assert_eq!(
        recorder.infos()[0].tags,
        vec![Value::from("stamped"), Value::from("sealed")],
    );
}

#[tokio::test]
async fn test_filter_vetoes_candidates() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("gatekeeper", |host| {
            host.filter.all(|ctx| async move {
                if ctx.options.contains_key("skip") {
                    Some(false)
                } else {
                    None
                }
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let skipped = CountingHandler::new();
    let kept = CountingHandler::new();
    bus.on_with("e", skipped.handler(), opts(&[("skip", Value::Bool(true))]))
        .on("e", kept.handler())
        .emit("e", Payload::none());
    bus.settled().await;

    assert_eq!(skipped.count(), 0);
    assert_eq!(kept.count(), 1);
}

#[tokio::test]
async fn test_hook_initiated_commands_preempt_chained_ones() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("defuser", |host| {
            host.before_on.key("defuse", |ctx| {
                ctx.api.off_all();
                async { HookResult::next() }
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on_with(
        "e",
        handler.handler(),
        opts(&[("defuse", Value::Bool(true))]),
    )
    .emit("e", Payload::none());
    bus.settled().await;

    // the hook's off_all lands before the chained emit is processed
    assert_eq!(handler.count(), 0);
}

#[tokio::test]
async fn test_raw_emit_bypasses_on_emit_and_filters() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("blocker", |host| {
            host.on_emit.all(|_ctx| async { HookResult::next().kill() });
            host.filter.all(|_ctx| async move { Some(false) });
            Ok(())
        }))
        .build()
        .unwrap();

    let recorder = RecordingHandler::new();
    bus.on("e", recorder.handler())
        .emit("e", Payload::none());
    bus.settled().await;
    assert_eq!(recorder.count(), 0);

    bus.hook_api().raw_emit(
        "e",
        Payload::none(),
        &recorder.handler(),
        vec![Value::from("replay")],
    );
    bus.settled().await;

    let infos = recorder.infos();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].has_tag(&Value::from("replay")));
}

#[tokio::test]
async fn test_raw_emit_to_an_unsubscribed_handler_is_a_noop() {
    let bus = AvisorCore::builder().build().unwrap();
    let recorder = RecordingHandler::new();

    bus.hook_api()
        .raw_emit("e", Payload::none(), &recorder.handler(), Vec::new());
    bus.settled().await;

    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
async fn test_unsubscribe_phases_run_in_order() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("observer", {
            let order = order.clone();
            move |host| {
                let before = order.clone();
                host.before_off.all(move |_ctx| {
                    before.lock().unwrap().push("before");
                    async { HookResult::next() }
                });
                let after = order.clone();
                host.after_off.all(move |_ctx| {
                    after.lock().unwrap().push("after");
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on("e", handler.handler()).off("e", &handler.handler());
    bus.settled().await;

    assert_eq!(*order.lock().unwrap(), vec!["before", "after"]);
}

#[tokio::test]
async fn test_after_on_sees_the_stored_subscription() {
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("echo", |host| {
            host.after_on.key("announce", |ctx| {
                ctx.api.emit(ctx.event.event.clone(), Payload::none());
                async { HookResult::next() }
            });
            Ok(())
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on_with(
        "ready",
        handler.handler(),
        opts(&[("announce", Value::Bool(true))]),
    );
    bus.settled().await;

    assert_eq!(handler.count(), 1);
}

#[tokio::test]
async fn test_postfix_rule_derives_options() {
    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("limiter", {
            let seen = seen.clone();
            move |host| {
                host.event_str
                    .postfix(Regex::new(r"^\d+$").unwrap(), |token| {
                        opts(&[("limit", Value::Int(token.parse().unwrap_or(0)))])
                    });
                let seen = seen.clone();
                host.before_on.key("limit", move |ctx| {
                    seen.lock().unwrap().push(ctx.option.clone());
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on("job?3", handler.handler()).emit("job", Payload::none());
    bus.settled().await;

    assert_eq!(*seen.lock().unwrap(), vec![Some(Value::Int(3))]);
    assert_eq!(handler.count(), 1);
}

#[tokio::test]
async fn test_prefix_rule_derives_options() {
    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("flagger", {
            let seen = seen.clone();
            move |host| {
                host.event_str
                    .prefix('!', |_| opts(&[("important", Value::Bool(true))]))?;
                let seen = seen.clone();
                host.before_on.key("important", move |ctx| {
                    seen.lock().unwrap().push(ctx.option.clone());
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on("!job", handler.handler()).emit("job", Payload::none());
    bus.settled().await;

    assert_eq!(*seen.lock().unwrap(), vec![Some(Value::Bool(true))]);
    assert_eq!(handler.count(), 1);
}

#[tokio::test]
async fn test_explicit_options_win_over_event_string_options() {
    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let bus = AvisorCore::builder()
        .plugin(InstallWith::new("limiter", {
            let seen = seen.clone();
            move |host| {
                host.event_str
                    .postfix(Regex::new(r"^\d+$").unwrap(), |token| {
                        opts(&[("limit", Value::Int(token.parse().unwrap_or(0)))])
                    });
                let seen = seen.clone();
                host.before_on.key("limit", move |ctx| {
                    seen.lock().unwrap().push(ctx.option.clone());
                    async { HookResult::next() }
                });
                Ok(())
            }
        }))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on_with("job?9", handler.handler(), opts(&[("limit", Value::Int(5))]));
    bus.settled().await;

    assert_eq!(*seen.lock().unwrap(), vec![Some(Value::Int(5))]);
}

#[tokio::test]
async fn test_hooks_run_in_cross_plugin_registration_order() {
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let marker = |order: Arc<Mutex<Vec<u32>>>, id: u32| {
        InstallWith::new("marker", move |host| {
            let order = order.clone();
            host.before_publish.all(move |_ctx| {
                order.lock().unwrap().push(id);
                async { HookResult::next() }
            });
            Ok(())
        })
    };
    let bus = AvisorCore::builder()
        .plugin(marker(order.clone(), 1))
        .plugin(marker(order.clone(), 2))
        .build()
        .unwrap();

    let handler = CountingHandler::new();
    bus.on("e", handler.handler()).emit("e", Payload::none());
    bus.settled().await;

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_duplicate_prefix_across_plugins_fails_the_build() {
    let claim = || {
        InstallWith::new("claimant", |host| {
            host.event_str.prefix('!', |_| Options::new())
        })
    };
    let result = AvisorCore::builder().plugin(claim()).plugin(claim()).build();
    assert!(result.is_err());
}
