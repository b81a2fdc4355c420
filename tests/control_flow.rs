//! Control-flow tests
//!
//! Drives the built-in control charms through the engine with a couple of
//! recording charms standing in for chat-platform utilities.

use charmkit::interpreter::engine::EngineConfig;
use charmkit::interpreter::value::as_number;
use charmkit::runtime::error::CharmResult;
use charmkit::runtime::store::VariableStore;
use charmkit::{
    ActorId, CharmDescriptor, CharmError, CharmRegistryBuilder, Engine, ExecutionContext, Scope,
    charms::register_builtins,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Harness {
    engine: Engine,
    store: Arc<VariableStore>,
    said: Arc<Mutex<Vec<String>>>,
    marks: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let said = Arc::new(Mutex::new(Vec::new()));
        let marks = Arc::new(AtomicUsize::new(0));

        let mut builder = CharmRegistryBuilder::new();
        register_builtins(&mut builder).unwrap();

        let sink = said.clone();
        builder
            .register(CharmDescriptor::from_fn("say", move |args, _ctx| {
                sink.lock().push(args.text().to_string());
                Ok(Value::String(args.text().to_string()))
            }))
            .unwrap();

        builder
            .register(CharmDescriptor::from_fn("upper", |args, _ctx| {
                Ok(Value::String(args.text().to_uppercase()))
            }))
            .unwrap();

        let counter = marks.clone();
        builder
            .register(CharmDescriptor::from_fn("markRan", move |_args, _ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }))
            .unwrap();

        builder
            .register(CharmDescriptor::from_fn("incr", |args, ctx| {
                let name = args.text().trim().to_string();
                let next = ctx
                    .variables()
                    .get(&name)
                    .and_then(|value| as_number(&value))
                    .unwrap_or(0.0)
                    + 1.0;
                ctx.variables().set(&name, json!(next as i64));
                Ok(Value::Null)
            }))
            .unwrap();

        Self {
            engine: Engine::new(builder.build(), config),
            store: Arc::new(VariableStore::new()),
            said,
            marks,
        }
    }

    async fn run(&self, script: &str) -> CharmResult<Value> {
        let mut ctx = ExecutionContext::new(
            ActorId::new("tester"),
            Scope::guild("g1", "c1"),
            self.store.clone(),
        );
        self.engine.evaluate_value(script, &mut ctx).await
    }

    fn said(&self) -> Vec<String> {
        self.said.lock().clone()
    }
}

#[tokio::test]
async fn break_stops_the_innermost_loop() {
    let h = Harness::new();
    h.run(r#"$loop[{"times":5,"body":"$if[$$index==2;$break[]]$say[$$index]"}]"#)
        .await
        .unwrap();
    assert_eq!(h.said(), vec!["0", "1"]);
}

#[tokio::test]
async fn continue_skips_the_rest_of_the_iteration() {
    let h = Harness::new();
    h.run(r#"$loop[{"times":4,"body":"$if[$$index==1;$continue[]]$say[$$index]"}]"#)
        .await
        .unwrap();
    assert_eq!(h.said(), vec!["0", "2", "3"]);
}

#[tokio::test]
async fn break_in_a_nested_loop_leaves_the_outer_loop_running() {
    let h = Harness::new();
    h.run(r#"$loop[2; $loop[{"times":3,"body":"$if[$$index==1;$break[]]$say[$$index]"}]]"#)
        .await
        .unwrap();
    assert_eq!(h.said(), vec!["0", "0"]);
}

#[tokio::test]
async fn break_reason_is_visible_after_the_loop() {
    let h = Harness::new();
    h.run(r#"$loop[{"times":3,"body":"$if[$$index==1;$break[done early]]"}]$say[reason=$$breakReason]"#)
        .await
        .unwrap();
    h.run("$loop[2; tick]$say[after=$$breakReason]").await.unwrap();
    assert_eq!(h.said(), vec!["reason=done early", "after="]);
}

#[tokio::test]
async fn break_outside_a_loop_fails() {
    let h = Harness::new();
    let err = h.run("$break[]").await.unwrap_err();
    assert!(matches!(err, CharmError::NotInLoop(ref name) if name == "break"));

    let err = h.run("$if[true; $continue[]]").await.unwrap_err();
    assert!(matches!(err, CharmError::NotInLoop(ref name) if name == "continue"));
}

#[tokio::test]
async fn foreach_binds_index_and_named_element() {
    let h = Harness::new();
    h.store.set("fruits", json!(["apple", "pear"]));
    let result = h
        .run("$foreach[$$fruits; $say[$$index:$$fruit]; fruit]")
        .await
        .unwrap();
    assert_eq!(h.said(), vec!["0:apple", "1:pear"]);
    assert_eq!(result, json!(["0:apple", "1:pear"]));
}

#[tokio::test]
async fn foreach_over_an_object_exposes_keys() {
    let h = Harness::new();
    h.store.set("scores", json!({"ann": 3, "bob": 5}));
    h.run("$foreach[$$scores; $say[$$key=$$element]]").await.unwrap();
    assert_eq!(h.said(), vec!["ann=3", "bob=5"]);
}

#[tokio::test]
async fn while_reevaluates_its_condition() {
    let h = Harness::new();
    h.store.set("n", json!(0));
    h.run("$while[$$n < 3; $incr[n]]").await.unwrap();
    assert_eq!(h.store.get("n"), Some(json!(3)));
}

#[tokio::test]
async fn while_enforces_its_iteration_cap() {
    let h = Harness::new();
    let err = h.run("$while[true; tick; 30; 5]").await.unwrap_err();
    assert!(matches!(err, CharmError::LoopIterationLimit { limit: 5 }));
}

#[tokio::test]
async fn while_uses_configured_defaults() {
    let h = Harness::with_config(EngineConfig {
        while_max_iterations: 3,
        ..EngineConfig::default()
    });
    let err = h.run("$while[true; tick]").await.unwrap_err();
    assert!(matches!(err, CharmError::LoopIterationLimit { limit: 3 }));
}

#[tokio::test]
async fn while_times_out() {
    let h = Harness::new();
    let err = h
        .run("$while[true; $wait[10ms]; 0.05; 1000]")
        .await
        .unwrap_err();
    match err {
        CharmError::LoopTimeout {
            seconds,
            iterations,
        } => {
            assert_eq!(seconds, 0.05);
            assert!(iterations >= 1 && iterations < 1000);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn try_catches_and_always_runs_finally() {
    let h = Harness::new();
    let result = h
        .run(r#"$try[{"body":"$throw[X]","catch":"$say[Caught:$$error]","finally":"$markRan[]"}]"#)
        .await
        .unwrap();
    assert_eq!(result, json!("Caught: X"));
    assert_eq!(h.said(), vec!["Caught: X"]);
    assert_eq!(h.marks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn try_without_catch_reraises_after_finally() {
    let h = Harness::new();
    let err = h
        .run(r#"$try[{"body":"$throw[nope]","finally":"$markRan[]"}]"#)
        .await
        .unwrap_err();
    assert!(matches!(err, CharmError::Thrown(ref failure) if failure.message == "nope"));
    assert_eq!(h.marks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn finally_failure_takes_precedence() {
    let h = Harness::new();
    let err = h
        .run(r#"$try[{"body":"$throw[first]","catch":"$throw[second]","finally":"$throw[last]"}]"#)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "last");
}

#[tokio::test]
async fn catch_sees_structured_fields() {
    let h = Harness::new();
    h.run(r#"$try[{"body":"$throw[{\"message\":\"bad\",\"code\":\"E7\"}]","catch":"$say[$$error.kind $$error.code $$error.message]"}]"#)
        .await
        .unwrap();
    assert_eq!(h.said(), vec!["ThrownError E7 bad"]);
}

#[tokio::test]
async fn assert_fails_with_message_and_fields() {
    let h = Harness::new();
    let err = h
        .run(r#"$assert[{"condition":false,"message":"m","fields":{"code":"E1"}}]"#)
        .await
        .unwrap_err();
    match err {
        CharmError::AssertionFailed(failure) => {
            assert_eq!(failure.message, "m");
            assert_eq!(failure.field("code"), Some(&json!("E1")));
        }
        other => panic!("expected assertion failure, got {other:?}"),
    }

    h.store.set("n", json!(3));
    assert_eq!(h.run("$assert[$$n == 3; never]").await.unwrap(), json!(true));
    let err = h.run("$assert[$$n > 3]").await.unwrap_err();
    assert_eq!(err.to_string(), "Assertion failed");
}

#[tokio::test]
async fn conditions_use_typed_comparisons() {
    let h = Harness::new();
    h.store.set("name", json!("Charmkit"));
    h.store.set("tags", json!(["a", "b"]));

    for (condition, expected) in [
        ("$$name startsWith Charm", "yes"),
        ("$$name matches ^C.*t$", "yes"),
        ("$$tags contains b", "yes"),
        ("$$tags is array", "yes"),
        ("10 > 9", "yes"),
        ("10 === \"10\"", "no"),
        ("off", "no"),
        ("$$name", "yes"),
    ] {
        let script = format!("$if[{condition}; yes; no]");
        assert_eq!(h.run(&script).await.unwrap(), json!(expected), "{condition}");
    }
}

#[tokio::test]
async fn branch_text_may_contain_a_colon() {
    let h = Harness::new();
    assert_eq!(h.run("$if[1 == 1; Result: yes; no]").await.unwrap(), json!("Result: yes"));
    assert_eq!(h.run("$if[1 == 2; Result: yes; no]").await.unwrap(), json!("no"));
    assert_eq!(
        h.run("$if[1 == 1; Result: $upper[yes]; no]").await.unwrap(),
        json!("Result: YES")
    );
}

#[tokio::test]
async fn nested_calls_inside_key_value_text_are_evaluated() {
    let h = Harness::new();
    h.run("$say[Result: $upper[x]]").await.unwrap();
    assert_eq!(h.said(), vec!["Result: X"]);
}

#[tokio::test]
async fn messages_with_a_colon_stay_whole() {
    let h = Harness::new();
    let err = h.run("$throw[Error: disk full]").await.unwrap_err();
    assert!(matches!(err, CharmError::Thrown(ref failure) if failure.message == "Error: disk full"));

    h.store.set("n", json!(3));
    let err = h.run("$assert[$$n > 3; Expected: more]").await.unwrap_err();
    assert_eq!(err.to_string(), "Expected: more");
}

#[tokio::test]
async fn only_the_chosen_branch_runs() {
    let h = Harness::new();
    h.run("$if[1 == 2; $say[then]; $say[else]]").await.unwrap();
    assert_eq!(h.said(), vec!["else"]);
}

#[tokio::test]
async fn unknown_charms_fail() {
    let h = Harness::new();
    let err = h.run("hello $nope[x]").await.unwrap_err();
    assert!(matches!(err, CharmError::UnknownCapability(ref name) if name == "nope"));
}

#[tokio::test]
async fn interpolated_text_is_not_rescanned() {
    let h = Harness::new();
    h.store.set("payload", json!("$$secret $say[leak]"));
    h.store.set("secret", json!("x"));
    let out = h.run("got $$payload and $$unknown").await.unwrap();
    assert_eq!(out, json!("got $$secret $say[leak] and $$unknown"));
    assert!(h.said().is_empty());
}

#[tokio::test]
async fn nested_invocations_feed_outer_arguments() {
    let h = Harness::new();
    h.run("$setVar[greeting; hi]$say[$getVar[greeting] $getVar[who; there]]")
        .await
        .unwrap();
    assert_eq!(h.said(), vec!["hi there"]);
}
