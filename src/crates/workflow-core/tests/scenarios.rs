//! End-to-end scenarios exercised through the public `Workflow` façade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use workflow_core::{
    Executor, HandlerContext, HandlerExecutor, HandlerRegistration, InMemoryCheckpointStore, RequestResponse, RunState,
    TypeSpec, TypedValue, WorkflowBuilder, WorkflowError,
};

fn handler(
    message_type: TypeSpec,
    output_types: Vec<TypeSpec>,
    workflow_output_types: Vec<TypeSpec>,
    f: impl Fn(serde_json::Value, Arc<HandlerContext>) -> std::pin::Pin<Box<dyn std::future::Future<Output = workflow_core::Result<()>> + Send>>
        + Send
        + Sync
        + 'static,
) -> HandlerRegistration {
    HandlerRegistration {
        message_type,
        output_types,
        workflow_output_types,
        handler: Arc::new(f),
    }
}

/// S1: Executors A->B->C. A upper-cases, B reports length, C yields it.
#[tokio::test]
async fn s1_linear_chain_yields_transformed_length() {
    let a = Arc::new(HandlerExecutor::new("a").with_handler(handler(
        TypeSpec::concrete("String"),
        vec![TypeSpec::concrete("String")],
        vec![],
        |value, ctx| {
            Box::pin(async move {
                let upper = value.as_str().unwrap_or_default().to_uppercase();
                ctx.send_message(TypedValue::concrete("String", serde_json::json!(upper)), None).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;
    let b = Arc::new(HandlerExecutor::new("b").with_handler(handler(
        TypeSpec::concrete("String"),
        vec![TypeSpec::concrete("Int")],
        vec![],
        |value, ctx| {
            Box::pin(async move {
                let len = value.as_str().unwrap_or_default().len() as i64;
                ctx.send_message(TypedValue::concrete("Int", serde_json::json!(len)), None).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;
    let c = Arc::new(HandlerExecutor::new("c").with_handler(handler(
        TypeSpec::concrete("Int"),
        vec![],
        vec![TypeSpec::concrete("Int")],
        |value, ctx| {
            Box::pin(async move {
                ctx.yield_output(value).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;

    let workflow = WorkflowBuilder::new("s1")
        .add_executor(a)
        .add_executor(b)
        .add_executor(c)
        .add_edge("a", "b")
        .add_edge("b", "c")
        .build()
        .unwrap();

    let result = workflow.run(TypedValue::concrete("String", serde_json::json!("hello"))).await.unwrap();
    assert_eq!(result.get_outputs(), vec![serde_json::json!(5)]);
    assert_eq!(result.get_final_state().unwrap(), RunState::Idle);
}

/// S2: fan-out to two sources, fan-in sums their contributions.
#[tokio::test]
async fn s2_fan_in_sums_contributions() {
    let start = Arc::new(HandlerExecutor::new("start").with_handler(handler(
        TypeSpec::concrete("String"),
        vec![TypeSpec::concrete("String")],
        vec![],
        |value, ctx| {
            Box::pin(async move {
                ctx.send_message(TypedValue::concrete("String", value), None).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;
    let s1 = Arc::new(HandlerExecutor::new("s1").with_handler(handler(
        TypeSpec::concrete("String"),
        vec![TypeSpec::concrete("Int")],
        vec![],
        |_value, ctx| {
            Box::pin(async move {
                ctx.send_message(TypedValue::concrete("Int", serde_json::json!(1)), None).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;
    let s2 = Arc::new(HandlerExecutor::new("s2").with_handler(handler(
        TypeSpec::concrete("String"),
        vec![TypeSpec::concrete("Int")],
        vec![],
        |_value, ctx| {
            Box::pin(async move {
                ctx.send_message(TypedValue::concrete("Int", serde_json::json!(2)), None).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;
    let target = Arc::new(HandlerExecutor::new("t").with_handler(handler(
        TypeSpec::Any,
        vec![],
        vec![TypeSpec::concrete("Int")],
        |value, ctx| {
            Box::pin(async move {
                let sum: i64 = value.as_array().map(|a| a.iter().filter_map(|v| v.as_i64()).sum()).unwrap_or(0);
                ctx.yield_output(serde_json::json!(sum)).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;

    let workflow = WorkflowBuilder::new("s2")
        .add_executor(start)
        .add_executor(s1)
        .add_executor(s2)
        .add_executor(target)
        .add_fan_out_edge("start", vec!["s1".to_string(), "s2".to_string()], None)
        .add_fan_in_edge(vec!["s1".to_string(), "s2".to_string()], "t")
        .build()
        .unwrap();

    let result = workflow.run(TypedValue::concrete("String", serde_json::json!("x"))).await.unwrap();
    assert_eq!(result.get_outputs(), vec![serde_json::json!(3)]);
}

/// S3: switch/case dispatches to exactly one case target; default never fires
/// when a case matches.
#[tokio::test]
async fn s3_switch_case_fires_matching_case_only() {
    let a_count = Arc::new(AtomicUsize::new(0));
    let b_count = Arc::new(AtomicUsize::new(0));
    let d_count = Arc::new(AtomicUsize::new(0));

    let src = Arc::new(HandlerExecutor::new("src").with_handler(handler(
        TypeSpec::concrete("String"),
        vec![TypeSpec::concrete("Record")],
        vec![],
        |_value, ctx| {
            Box::pin(async move {
                ctx.send_message(
                    TypedValue::concrete("Record", serde_json::json!({"kind": "b", "payload": "go"})),
                    None,
                )
                .await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;

    fn counting_executor(id: &str, counter: Arc<AtomicUsize>, yields: bool) -> Arc<dyn Executor> {
        Arc::new(HandlerExecutor::new(id).with_handler(handler(
            TypeSpec::concrete("Record"),
            vec![],
            vec![TypeSpec::concrete("Record")],
            move |value, ctx| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if yields {
                        ctx.yield_output(value).await;
                    }
                    Ok(())
                })
            },
        ))) as Arc<dyn Executor>
    }

    let a = counting_executor("a", a_count.clone(), false);
    let b = counting_executor("b", b_count.clone(), true);
    let d = counting_executor("d", d_count.clone(), false);

    let workflow = WorkflowBuilder::new("s3")
        .add_executor(src)
        .add_executor(a)
        .add_executor(b)
        .add_executor(d)
        .add_switch_case_edge(
            "src",
            vec![
                (
                    "is_a".to_string(),
                    Arc::new(|v: &serde_json::Value| Ok(v.get("kind").and_then(|k| k.as_str()) == Some("a"))) as workflow_core::PredicateFn,
                    "a".to_string(),
                ),
                (
                    "is_b".to_string(),
                    Arc::new(|v: &serde_json::Value| Ok(v.get("kind").and_then(|k| k.as_str()) == Some("b"))) as workflow_core::PredicateFn,
                    "b".to_string(),
                ),
            ],
            "d",
        )
        .build()
        .unwrap();

    let result = workflow.run(TypedValue::concrete("String", serde_json::json!("go"))).await.unwrap();
    assert_eq!(a_count.load(Ordering::SeqCst), 0);
    assert_eq!(b_count.load(Ordering::SeqCst), 1);
    assert_eq!(d_count.load(Ordering::SeqCst), 0);
    assert_eq!(result.get_outputs(), vec![serde_json::json!({"kind": "b", "payload": "go"})]);
}

/// S4: a request/response round trip, resumed via `send_responses`.
#[tokio::test]
async fn s4_request_response_round_trip() {
    let r = Arc::new(
        HandlerExecutor::new("r")
            .with_handler(handler(
                TypeSpec::concrete("String"),
                vec![],
                vec![],
                |value, ctx| {
                    Box::pin(async move {
                        let text = value.as_str().unwrap_or_default().to_string();
                        ctx.request_info(serde_json::json!({"text": text}), "DraftReview", "Approval").await;
                        Ok(())
                    })
                },
            ))
            .with_response_handler(workflow_core::ResponseHandlerRegistration {
                request_type: "DraftReview".to_string(),
                response_type: "Approval".to_string(),
                handler: Arc::new(|value, ctx| {
                    Box::pin(async move {
                        let response: RequestResponse = serde_json::from_value(value).map_err(|e| WorkflowError::Runner(e.to_string()))?;
                        let approved = response.data.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                        if approved {
                            let text = response.original_request.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                            ctx.yield_output(serde_json::json!(format!("approved:{text}"))).await;
                        }
                        Ok(())
                    })
                }),
            }),
    ) as Arc<dyn Executor>;

    let workflow = WorkflowBuilder::new("s4").add_executor(r).build().unwrap();

    let first = workflow.run(TypedValue::concrete("String", serde_json::json!("go"))).await.unwrap();
    assert_eq!(first.get_final_state().unwrap(), RunState::IdleWithPendingRequests);
    let request_id = match first.get_request_info_events().first().unwrap() {
        workflow_core::WorkflowEvent::RequestInfo { request_id, .. } => request_id.clone(),
        other => panic!("expected a request_info event, got {other:?}"),
    };

    let second = workflow
        .send_responses(std::collections::HashMap::from([(request_id, serde_json::json!({"ok": true}))]))
        .await
        .unwrap();
    assert_eq!(second.get_outputs(), vec![serde_json::json!("approved:go")]);
    assert_eq!(second.get_final_state().unwrap(), RunState::Idle);
}

/// S5: resuming from a checkpoint taken after the first superstep replays
/// only the work that was still pending at capture time.
///
/// A's own invocation happens before the scheduler's first superstep (the
/// workflow façade seeds the start executor directly), so a three-hop chain
/// is used to get a checkpoint, captured after a real superstep, that still
/// has a message in flight.
#[tokio::test]
async fn s5_resume_from_checkpoint_replays_only_pending_work() {
    fn build(store: Arc<InMemoryCheckpointStore>) -> workflow_core::Workflow {
        let a = Arc::new(HandlerExecutor::new("a").with_handler(handler(
            TypeSpec::concrete("String"),
            vec![TypeSpec::concrete("Int")],
            vec![TypeSpec::concrete("String")],
            |_value, ctx| {
                Box::pin(async move {
                    ctx.yield_output(serde_json::json!("a")).await;
                    ctx.send_message(TypedValue::concrete("Int", serde_json::json!(1)), None).await;
                    Ok(())
                })
            },
        ))) as Arc<dyn Executor>;
        let b = Arc::new(HandlerExecutor::new("b").with_handler(handler(
            TypeSpec::concrete("Int"),
            vec![TypeSpec::concrete("Int")],
            vec![TypeSpec::concrete("String")],
            |_value, ctx| {
                Box::pin(async move {
                    ctx.yield_output(serde_json::json!("mid")).await;
                    ctx.send_message(TypedValue::concrete("Int", serde_json::json!(2)), None).await;
                    Ok(())
                })
            },
        ))) as Arc<dyn Executor>;
        let c = Arc::new(HandlerExecutor::new("c").with_handler(handler(
            TypeSpec::concrete("Int"),
            vec![],
            vec![TypeSpec::concrete("String")],
            |_value, ctx| {
                Box::pin(async move {
                    ctx.yield_output(serde_json::json!("b")).await;
                    Ok(())
                })
            },
        ))) as Arc<dyn Executor>;

        WorkflowBuilder::new("s5")
            .add_executor(a)
            .add_executor(b)
            .add_executor(c)
            .add_edge("a", "b")
            .add_edge("b", "c")
            .with_checkpoint_store(store)
            .build()
            .unwrap()
    }

    let store = Arc::new(InMemoryCheckpointStore::new());
    let original = build(store.clone());
    let result = original.run(TypedValue::concrete("String", serde_json::json!("go"))).await.unwrap();
    assert_eq!(
        result.get_outputs(),
        vec![serde_json::json!("a"), serde_json::json!("mid"), serde_json::json!("b")]
    );

    let checkpoints = store.list_checkpoints("s5").await.unwrap();
    let after_first_superstep = checkpoints
        .into_iter()
        .find(|c| c.iteration_count == 1)
        .expect("a checkpoint was captured after the first superstep, with c's message still pending");

    // A fresh workflow built from the same topology, as if the original
    // runtime had been discarded.
    let resumed_workflow = build(Arc::new(InMemoryCheckpointStore::new()));
    let resumed = resumed_workflow.run_from_checkpoint(after_first_superstep).await.unwrap();
    assert_eq!(resumed.get_outputs(), vec![serde_json::json!("b")]);
    assert_eq!(resumed.get_final_state().unwrap(), RunState::Idle);
}

/// S6: a cyclic graph that never stops sending messages fails with a
/// convergence error once the iteration cap is reached.
#[tokio::test]
async fn s6_iteration_cap_fails_with_convergence_error() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let invocations_clone = invocations.clone();
    let a = Arc::new(HandlerExecutor::new("a").with_handler(handler(
        TypeSpec::Any,
        vec![TypeSpec::Any],
        vec![],
        move |value, ctx| {
            let invocations = invocations_clone.clone();
            Box::pin(async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                ctx.send_message(TypedValue::new(TypeSpec::Any, value), None).await;
                Ok(())
            })
        },
    ))) as Arc<dyn Executor>;

    let workflow = WorkflowBuilder::new("s6")
        .add_executor(a)
        .add_edge("a", "a")
        .with_iteration_cap(3)
        .build()
        .unwrap();

    let result = workflow.run(TypedValue::new(TypeSpec::Any, serde_json::json!(1))).await;
    assert!(matches!(result, Err(WorkflowError::Convergence { iterations: 3, .. })));
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

/// A second run while one is active fails without disturbing the first.
#[tokio::test]
async fn at_most_once_start_rejects_concurrent_runs() {
    let a = Arc::new(HandlerExecutor::new("a").with_handler(handler(TypeSpec::Any, vec![], vec![], |value, ctx| {
        Box::pin(async move {
            ctx.yield_output(value).await;
            Ok(())
        })
    }))) as Arc<dyn Executor>;
    let workflow = Arc::new(WorkflowBuilder::new("solo").add_executor(a).build().unwrap());

    let stream = workflow.run_stream(TypedValue::new(TypeSpec::Any, serde_json::json!(1))).unwrap();
    let second = workflow.run(TypedValue::new(TypeSpec::Any, serde_json::json!(2))).await;
    assert!(matches!(second, Err(WorkflowError::AlreadyRunning(_))));
    drop(stream);

    // Dropping an unpolled stream must still release the run lock, not just
    // one that was driven to completion.
    let third = workflow.run(TypedValue::new(TypeSpec::Any, serde_json::json!(3))).await;
    assert!(third.is_ok());
}
