use super::*;
use std::{
    sync::atomic::AtomicUsize,
    time::Duration,
};

use tokio::sync::Notify;

use crate::query::Query;

#[derive(Default)]
struct CallbackLog {
    successes: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl CallbackLog {
    fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn observed<I, O>(mutation: Mutation<I, O>, log: &Arc<CallbackLog>) -> Mutation<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    let on_success = Arc::clone(log);
    let on_error = Arc::clone(log);
    mutation
        .on_success(move |_| {
            on_success.successes.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |message| {
            on_error
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.to_string());
        })
}

fn echo_mutation() -> Mutation<String, String> {
    Mutation::new("echo", |input: String| async move { Ok(input.to_uppercase()) })
}

fn failing_mutation() -> Mutation<String, String> {
    Mutation::new("save", |_input: String| async move {
        Err(ClientError::Status {
            status: 422,
            message: "new password is too short".to_string(),
        })
    })
}

/// Blocks until `gate` is notified, counting each start.
fn gated_mutation(gate: &Arc<Notify>, starts: &Arc<AtomicUsize>) -> Mutation<u32, u32> {
    let gate = Arc::clone(gate);
    let starts = Arc::clone(starts);
    Mutation::new("pair", move |input: u32| {
        let gate = Arc::clone(&gate);
        let starts = Arc::clone(&starts);
        async move {
            starts.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Ok(input * 2)
        }
    })
}

#[tokio::test]
async fn success_invokes_only_the_success_callback_once() {
    let log = Arc::new(CallbackLog::default());
    let client = QueryClient::new();
    let mutation = observed(echo_mutation(), &log);
    assert!(matches!(mutation.state(), MutationState::Idle));

    let output = mutation
        .mutate(&client, "saved".to_string())
        .await
        .expect("mutate");

    assert_eq!(output.as_str(), "SAVED");
    assert_eq!(log.successes(), 1);
    assert!(log.errors().is_empty());
    assert!(!mutation.is_pending());
    assert!(matches!(mutation.state(), MutationState::Success(_)));
}

#[tokio::test]
async fn failure_invokes_only_the_error_callback_with_a_message() {
    let log = Arc::new(CallbackLog::default());
    let client = QueryClient::new();
    let mutation = observed(failing_mutation(), &log);

    let err = mutation
        .mutate(&client, "x".to_string())
        .await
        .expect_err("must fail");

    assert_eq!(err.status_code(), Some(422));
    assert_eq!(log.successes(), 0);
    assert_eq!(log.errors(), vec!["new password is too short".to_string()]);
    assert!(!mutation.is_pending());
    assert!(matches!(mutation.state(), MutationState::Error(_)));
}

#[tokio::test]
async fn transport_failures_still_produce_a_readable_message() {
    let log = Arc::new(CallbackLog::default());
    let client = QueryClient::new();
    let mutation = observed(
        Mutation::new("save", |_input: ()| async move {
            Err::<(), _>(ClientError::Transport(String::new()))
        }),
        &log,
    );

    let _ = mutation.mutate(&client, ()).await;

    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert!(!errors[0].trim().is_empty());
}

#[tokio::test]
async fn success_invalidates_listed_keys() {
    let client = QueryClient::new();
    let key = ResourceKey::new("medical-profile");
    client.set_query_data(&key, 1usize).await;
    let fetches = Arc::new(AtomicUsize::new(0));
    let query = {
        let fetches = Arc::clone(&fetches);
        Query::new(key.clone(), move || {
            let fetches = Arc::clone(&fetches);
            async move { Ok(fetches.fetch_add(1, Ordering::SeqCst) + 2) }
        })
    };
    let mutation = echo_mutation().invalidates(ResourceKey::new("medical-profile"));
    assert_eq!(mutation.invalidated_keys(), &[key.clone()]);

    mutation
        .mutate(&client, "x".to_string())
        .await
        .expect("mutate");
    let state = client.fetch_query(&query).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(state.data().map(|v| **v), Some(2));
}

#[tokio::test]
async fn failure_does_not_invalidate() {
    let client = QueryClient::new();
    let key = ResourceKey::new("medical-profile");
    client.set_query_data(&key, 1usize).await;
    let mutation = failing_mutation().invalidates(key.clone());

    let _ = mutation.mutate(&client, "x".to_string()).await;

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let state = client
        .fetch_query(&Query::new(key, move || {
            let counter = Arc::clone(&counter);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        }))
        .await;
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert_eq!(state.data().map(|v| **v), Some(1));
}

#[tokio::test]
async fn second_trigger_while_pending_is_rejected_without_callbacks() {
    let log = Arc::new(CallbackLog::default());
    let gate = Arc::new(Notify::new());
    let starts = Arc::new(AtomicUsize::new(0));
    let client = QueryClient::new();
    let mutation = Arc::new(observed(gated_mutation(&gate, &starts), &log));

    let first = mutation.trigger(Arc::clone(&client), 21);
    while !mutation.is_pending() || starts.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(matches!(mutation.state(), MutationState::Pending));

    let rejected = mutation.mutate(&client, 5).await.expect_err("rejected");
    assert_eq!(rejected, ClientError::MutationInFlight("pair"));
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(log.successes(), 0);
    assert!(log.errors().is_empty());

    gate.notify_one();
    let output = first.await.expect("result").expect("mutate");
    assert_eq!(*output, 42);
    assert_eq!(log.successes(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_caller_clears_pending() {
    let gate = Arc::new(Notify::new());
    let starts = Arc::new(AtomicUsize::new(0));
    let client = QueryClient::new();
    let mutation = gated_mutation(&gate, &starts);

    let timed_out =
        tokio::time::timeout(Duration::from_millis(10), mutation.mutate(&client, 1)).await;

    assert!(timed_out.is_err());
    assert!(!mutation.is_pending());
    assert!(matches!(mutation.state(), MutationState::Idle));
}

#[tokio::test]
async fn dropped_receiver_still_runs_callbacks() {
    let log = Arc::new(CallbackLog::default());
    let client = QueryClient::new();
    let mutation = Arc::new(observed(echo_mutation(), &log));

    drop(mutation.trigger(Arc::clone(&client), "bye".to_string()));

    for _ in 0..100 {
        if log.successes() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(log.successes(), 1);
    assert_eq!(mutation.name(), "echo");
}
