//! REST collaborators: authentication, threads and assistants.

mod client;
mod types;

pub use client::{ApiClient, AssistantsApi, AuthApi, DEFAULT_THREAD_LIMIT, ThreadsApi};
pub use types::{AccessToken, AssistantRecord, RegisterRequest, ThreadRecord, UserRead};
