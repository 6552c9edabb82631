//! Write side of the resource binding.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, ClientResult},
    query::{QueryClient, ResourceKey},
};

pub type MutateFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, ClientResult<O>> + Send + Sync>;
pub type SuccessCallback<O> = Arc<dyn Fn(&O) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug)]
pub enum MutationState<O> {
    Idle,
    Pending,
    Success(Arc<O>),
    Error(ClientError),
}

impl<O> Clone for MutationState<O> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Pending => Self::Pending,
            Self::Success(output) => Self::Success(Arc::clone(output)),
            Self::Error(error) => Self::Error(error.clone()),
        }
    }
}

pub struct Mutation<I, O> {
    name: &'static str,
    mutate: MutateFn<I, O>,
    invalidates: Vec<ResourceKey>,
    on_success: Option<SuccessCallback<O>>,
    on_error: Option<ErrorCallback>,
    pending: AtomicBool,
    state: Mutex<MutationState<O>>,
}

/// Clears the pending flag even when the caller drops the mutation future.
struct PendingGuard<'a, O> {
    pending: &'a AtomicBool,
    state: &'a Mutex<MutationState<O>>,
}

impl<O> Drop for PendingGuard<'_, O> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, MutationState::Pending) {
            *state = MutationState::Idle;
        }
        self.pending.store(false, Ordering::Release);
    }
}

impl<I, O> Mutation<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: &'static str, mutate: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<O>> + Send + 'static,
    {
        let mutate: MutateFn<I, O> = Arc::new(move |input| mutate(input).boxed());
        Self {
            name,
            mutate,
            invalidates: Vec::new(),
            on_success: None,
            on_error: None,
            pending: AtomicBool::new(false),
            state: Mutex::new(MutationState::Idle),
        }
    }

    /// Key prefix to mark stale once the mutation succeeds.
    pub fn invalidates(mut self, key: ResourceKey) -> Self {
        self.invalidates.push(key);
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&O) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Receives a human-readable message, never empty.
    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn invalidated_keys(&self) -> &[ResourceKey] {
        &self.invalidates
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn state(&self) -> MutationState<O> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: MutationState<O>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub async fn mutate(&self, client: &QueryClient, input: I) -> ClientResult<Arc<O>> {
        if self.pending.swap(true, Ordering::AcqRel) {
            warn!(binding = self.name, "mutation: rejected, previous call still pending");
            return Err(ClientError::MutationInFlight(self.name));
        }
        let guard = PendingGuard {
            pending: &self.pending,
            state: &self.state,
        };
        self.set_state(MutationState::Pending);
        info!(binding = self.name, "mutation: started");

        match (self.mutate)(input).await {
            Ok(output) => {
                let output = Arc::new(output);
                for key in &self.invalidates {
                    client.invalidate(key).await;
                }
                self.set_state(MutationState::Success(Arc::clone(&output)));
                drop(guard);
                info!(binding = self.name, "mutation: succeeded");
                if let Some(callback) = &self.on_success {
                    callback(&output);
                }
                Ok(output)
            }
            Err(error) => {
                warn!(binding = self.name, error = %error, "mutation: failed");
                self.set_state(MutationState::Error(error.clone()));
                drop(guard);
                if let Some(callback) = &self.on_error {
                    callback(&error.user_message());
                }
                Err(error)
            }
        }
    }

    /// Runs the mutation on its own task. Dropping the receiver stops acting on
    /// the result; the request, invalidation and callbacks still complete.
    pub fn trigger(
        self: &Arc<Self>,
        client: Arc<QueryClient>,
        input: I,
    ) -> oneshot::Receiver<ClientResult<Arc<O>>> {
        let (tx, rx) = oneshot::channel();
        let mutation = Arc::clone(self);
        tokio::spawn(async move {
            let result = mutation.mutate(&client, input).await;
            if tx.send(result).is_err() {
                debug!(binding = mutation.name, "mutation: caller gone, result discarded");
            }
        });
        rx
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
